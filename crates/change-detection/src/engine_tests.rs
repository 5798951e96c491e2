#[cfg(test)]
mod tests {
    use crate::composites::{candidate_months, filter_available, CompositeCache};
    use crate::config::DetectionConfig;
    use crate::engine::{DetectionEngine, VizSettings};
    use crate::thresholds::{ThresholdPair, ThresholdSet};
    use async_trait::async_trait;
    use detection_core::{
        DetectionError, Geometry, ImageExpr, MonthKey, RasterBackend, Reducer, ScalarExpr,
        ThumbnailParams,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ---------------------------------------------------------------------
    // A backend that interprets the expression trees over a tiny pixel grid,
    // so detection runs end to end without a network.
    // ---------------------------------------------------------------------

    type Pixel = Option<Vec<f64>>;

    struct GridBackend {
        /// Per month: per-pixel [NDVI, NBR].
        optical: HashMap<(i32, u32), Vec<[f64; 2]>>,
        /// Per month: per-pixel [VV, VH].
        radar: HashMap<(i32, u32), Vec<[f64; 2]>>,
        pixels: usize,
        pixel_area_m2: f64,
        fail_thumbnails: bool,
        calls: AtomicUsize,
    }

    impl GridBackend {
        fn new(pixels: usize) -> Self {
            Self {
                optical: HashMap::new(),
                radar: HashMap::new(),
                pixels,
                pixel_area_m2: 1e6, // one pixel = one km2
                fail_thumbnails: false,
                calls: AtomicUsize::new(0),
            }
        }

        /// Add a month where every pixel is quiet vegetation.
        fn add_month(&mut self, key: MonthKey) {
            self.optical
                .insert((key.year, key.month), vec![[0.8, 0.5]; self.pixels]);
            self.radar
                .insert((key.year, key.month), vec![[0.0, 0.0]; self.pixels]);
        }

        fn set_ndvi(&mut self, key: MonthKey, pixel: usize, ndvi: f64) {
            self.optical.get_mut(&(key.year, key.month)).unwrap()[pixel][0] = ndvi;
        }

        fn eval_image(&self, expr: &ImageExpr) -> Vec<Pixel> {
            match expr {
                ImageExpr::OpticalIndices { year, month, .. } => match self.optical.get(&(*year, *month)) {
                    Some(px) => px.iter().map(|p| Some(p.to_vec())).collect(),
                    None => vec![None; self.pixels],
                },
                ImageExpr::OpticalRgb { .. } => {
                    vec![Some(vec![0.2, 0.2, 0.2]); self.pixels]
                }
                ImageExpr::RadarComposite { year, month, .. } => match self.radar.get(&(*year, *month)) {
                    Some(px) => px
                        .iter()
                        .map(|p| Some(vec![p[0], p[1], p[0] - p[1]]))
                        .collect(),
                    None => vec![None; self.pixels],
                },
                ImageExpr::Constant { value } => vec![Some(vec![*value]); self.pixels],
                ImageExpr::PixelArea => vec![Some(vec![self.pixel_area_m2]); self.pixels],
                // Tests model a single-extent world, so clipping is a no-op.
                ImageExpr::Clip { source, .. } => self.eval_image(source),
                ImageExpr::Select { source, band } => {
                    let index = match band.as_str() {
                        "NDVI" | "VV" => 0,
                        "NBR" | "VH" => 1,
                        "RATIO" => 2,
                        other => panic!("unknown band {other}"),
                    };
                    self.map_unary(source, |bands| vec![bands[index]])
                }
                ImageExpr::Subtract { left, right } => self.zip(left, right, |a, b| a - b),
                ImageExpr::Multiply { left, right } => self.zip(left, right, |a, b| a * b),
                ImageExpr::Pow { source, exponent } => {
                    let e = *exponent;
                    self.map_unary(source, move |bands| {
                        bands.iter().map(|v| v.powf(e)).collect()
                    })
                }
                ImageExpr::Abs { source } => {
                    self.map_unary(source, |bands| bands.iter().map(|v| v.abs()).collect())
                }
                ImageExpr::Sqrt { source } => {
                    self.map_unary(source, |bands| bands.iter().map(|v| v.sqrt()).collect())
                }
                ImageExpr::SumBands { source } => {
                    self.map_unary(source, |bands| vec![bands.iter().sum()])
                }
                ImageExpr::Gt { left, right } => {
                    self.zip(left, right, |a, b| if a > b { 1.0 } else { 0.0 })
                }
                ImageExpr::Lte { left, right } => {
                    self.zip(left, right, |a, b| if a <= b { 1.0 } else { 0.0 })
                }
                ImageExpr::And { left, right } => self.zip(left, right, |a, b| {
                    if a != 0.0 && b != 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }),
                ImageExpr::Or { left, right } => self.zip(left, right, |a, b| {
                    if a != 0.0 || b != 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }),
                ImageExpr::UpdateMask { source, mask } => {
                    let src = self.eval_image(source);
                    let mask = self.eval_image(mask);
                    src.into_iter()
                        .zip(mask)
                        .map(|(s, m)| match m {
                            Some(bands) if bands[0] != 0.0 => s,
                            _ => None,
                        })
                        .collect()
                }
                ImageExpr::SelfMask { source } => self
                    .eval_image(source)
                    .into_iter()
                    .map(|p| p.filter(|bands| bands[0] != 0.0))
                    .collect(),
            }
        }

        fn map_unary(
            &self,
            source: &ImageExpr,
            f: impl Fn(&[f64]) -> Vec<f64>,
        ) -> Vec<Pixel> {
            self.eval_image(source)
                .into_iter()
                .map(|p| p.map(|bands| f(&bands)))
                .collect()
        }

        fn zip(
            &self,
            left: &ImageExpr,
            right: &ImageExpr,
            f: impl Fn(f64, f64) -> f64,
        ) -> Vec<Pixel> {
            let l = self.eval_image(left);
            let r = self.eval_image(right);
            l.into_iter()
                .zip(r)
                .map(|(a, b)| match (a, b) {
                    (Some(x), Some(y)) => {
                        let bands = if x.len() == y.len() {
                            x.iter().zip(&y).map(|(u, v)| f(*u, *v)).collect()
                        } else if y.len() == 1 {
                            x.iter().map(|u| f(*u, y[0])).collect()
                        } else if x.len() == 1 {
                            y.iter().map(|v| f(x[0], *v)).collect()
                        } else {
                            panic!("band count mismatch: {} vs {}", x.len(), y.len())
                        };
                        Some(bands)
                    }
                    _ => None,
                })
                .collect()
        }

        fn eval_scalar(&self, expr: &ScalarExpr) -> Option<f64> {
            match expr {
                ScalarExpr::BandCount { image } => match image {
                    ImageExpr::OpticalIndices { year, month, .. } => {
                        if self.optical.contains_key(&(*year, *month)) {
                            Some(2.0)
                        } else {
                            Some(0.0)
                        }
                    }
                    other => panic!("band_count on non-composite {other:?}"),
                },
                ScalarExpr::ReduceRegion { image, reducer, .. } => {
                    let values: Vec<f64> = self
                        .eval_image(image)
                        .into_iter()
                        .flatten()
                        .map(|bands| bands[0])
                        .collect();
                    if values.is_empty() {
                        return None;
                    }
                    match reducer {
                        Reducer::Sum => Some(values.iter().sum()),
                        Reducer::Percentile { percentile } => {
                            let mut sorted = values;
                            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                            let n = sorted.len();
                            let rank = ((*percentile as f64 / 100.0) * n as f64).ceil() as usize;
                            Some(sorted[rank.max(1) - 1])
                        }
                    }
                }
                ScalarExpr::GeometryArea { .. } => {
                    Some(self.pixels as f64 * self.pixel_area_m2)
                }
                ScalarExpr::Divide { source, divisor } => {
                    self.eval_scalar(source).map(|v| v / divisor)
                }
                ScalarExpr::IfNull { source, default } => {
                    Some(self.eval_scalar(source).unwrap_or(*default))
                }
            }
        }
    }

    #[async_trait]
    impl RasterBackend for GridBackend {
        async fn evaluate(
            &self,
            exprs: &[ScalarExpr],
        ) -> Result<Vec<Option<f64>>, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(exprs.iter().map(|e| self.eval_scalar(e)).collect())
        }

        async fn render_thumbnail(
            &self,
            _image: &ImageExpr,
            _region: &Geometry,
            _params: &ThumbnailParams,
        ) -> Result<Vec<u8>, DetectionError> {
            if self.fail_thumbnails {
                return Err(DetectionError::Export("render refused".to_string()));
            }
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
    }

    /// Backend whose every reduction comes back null.
    struct NullBackend;

    #[async_trait]
    impl RasterBackend for NullBackend {
        async fn evaluate(
            &self,
            exprs: &[ScalarExpr],
        ) -> Result<Vec<Option<f64>>, DetectionError> {
            Ok(vec![None; exprs.len()])
        }

        async fn render_thumbnail(
            &self,
            _image: &ImageExpr,
            _region: &Geometry,
            _params: &ThumbnailParams,
        ) -> Result<Vec<u8>, DetectionError> {
            unimplemented!("not used")
        }
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn square() -> Geometry {
        Geometry::new(vec![vec![
            [30.0, -2.0],
            [30.1, -2.0],
            [30.1, -1.9],
            [30.0, -1.9],
            [30.0, -2.0],
        ]])
    }

    fn timeline(n: usize) -> Vec<MonthKey> {
        candidate_months(2020, 2020, &[1, 3, 5, 7])[..n].to_vec()
    }

    fn world(pixels: usize, months: &[MonthKey]) -> GridBackend {
        let mut backend = GridBackend::new(pixels);
        for key in months {
            backend.add_month(*key);
        }
        backend
    }

    async fn detect(
        backend: &GridBackend,
        valid: &[MonthKey],
        viz: Option<&VizSettings>,
    ) -> crate::engine::DetectionOutcome {
        let region = square();
        let cache = CompositeCache::build(&region, valid);
        let thresholds = ThresholdSet::precompute(
            backend,
            &cache,
            valid,
            &region,
            &DetectionConfig::default(),
        )
        .await
        .unwrap();
        DetectionEngine::new(backend, DetectionConfig::default())
            .run_zone(&region, valid, &cache, &thresholds, viz)
            .await
            .unwrap()
    }

    fn areas(outcome: &crate::engine::DetectionOutcome) -> Vec<f64> {
        outcome.timeseries.iter().map(|r| r.area_km2).collect()
    }

    // ---------------------------------------------------------------------
    // Tests
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn availability_filter_drops_empty_months() {
        let all = timeline(3);
        // Middle month has no qualifying scene.
        let backend = world(4, &[all[0], all[2]]);

        let valid = filter_available(&backend, &square(), &all).await.unwrap();
        assert_eq!(valid, vec![all[0], all[2]]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_month_spike_never_enters_the_mask() {
        let months = timeline(4);
        let mut backend = world(10, &months);
        // Pixel 0 drops for exactly one period, then the signal is flat again.
        backend.set_ndvi(months[2], 0, 0.2);
        backend.set_ndvi(months[3], 0, 0.2);

        let outcome = detect(&backend, &months, None).await;
        assert_eq!(areas(&outcome), vec![0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn two_consecutive_exceedances_are_confirmed() {
        let months = timeline(4);
        let mut backend = world(10, &months);
        // Pixel 0 degrades over two consecutive periods.
        backend.set_ndvi(months[2], 0, 0.5);
        backend.set_ndvi(months[3], 0, 0.2);

        let outcome = detect(&backend, &months, None).await;
        // Confirmation lands one month after the first exceedance.
        assert_eq!(areas(&outcome), vec![0.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn first_pair_exceedance_counts_immediately() {
        // Three valid months: the second month's candidate has no prior
        // candidate to agree with, so stable = candidate and area can be
        // nonzero right away.
        let months = timeline(3);
        let mut backend = world(20, &months);
        backend.set_ndvi(months[1], 0, 0.5);
        backend.set_ndvi(months[2], 0, 0.5);
        backend.set_ndvi(months[1], 1, 0.5);
        backend.set_ndvi(months[2], 1, 0.2);

        let outcome = detect(&backend, &months, None).await;
        let series = areas(&outcome);

        assert_eq!(series.len(), 2); // seed month emits no row
        assert_eq!(series[0], 2.0);
        // Later cumulative mask is a superset of the earlier one.
        assert!(series[1] >= series[0]);
        assert_eq!(outcome.analysis_start.as_deref(), Some("2020-03-01"));
        assert_eq!(outcome.analysis_end.as_deref(), Some("2020-05-01"));
    }

    #[tokio::test]
    async fn cumulative_area_is_monotonic() {
        let months = timeline(4);
        let mut backend = world(10, &months);
        // Pixel 0 confirmed early, pixel 1 confirmed late.
        backend.set_ndvi(months[1], 0, 0.5);
        backend.set_ndvi(months[2], 0, 0.2);
        backend.set_ndvi(months[3], 0, 0.2);
        backend.set_ndvi(months[2], 1, 0.5);
        backend.set_ndvi(months[3], 1, 0.2);

        let outcome = detect(&backend, &months, None).await;
        let series = areas(&outcome);

        assert_eq!(series.len(), 3);
        for pair in series.windows(2) {
            assert!(pair[1] >= pair[0], "series shrank: {:?}", series);
        }
        assert_eq!(*series.last().unwrap(), 2.0);
    }

    #[tokio::test]
    async fn reference_thresholds_apply_to_every_zone() {
        let months = timeline(3);
        let mut backend = world(10, &months);
        backend.set_ndvi(months[1], 0, 0.5);
        backend.set_ndvi(months[2], 0, 0.2);

        let reference = square();
        let exclusion = Geometry::new(vec![vec![
            [31.0, -3.0],
            [31.1, -3.0],
            [31.1, -2.9],
            [31.0, -2.9],
            [31.0, -3.0],
        ]]);

        let cache = CompositeCache::build(&reference, &months);
        let thresholds = ThresholdSet::precompute(
            &backend,
            &cache,
            &months,
            &reference,
            &DetectionConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(thresholds.len(), months.len() - 1);

        let engine = DetectionEngine::new(&backend, DetectionConfig::default());
        let mine = engine
            .run_zone(&reference, &months, &cache, &thresholds, None)
            .await
            .unwrap();
        let no_go = engine
            .run_zone(&exclusion, &months, &cache, &thresholds, None)
            .await
            .unwrap();

        // Same thresholds, same timeline: detection behaves identically.
        assert_eq!(areas(&mine), areas(&no_go));
    }

    #[tokio::test]
    async fn one_round_trip_per_phase() {
        let candidates = timeline(4);
        let backend = world(10, &candidates);
        let region = square();

        let valid = filter_available(&backend, &region, &candidates).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let cache = CompositeCache::build(&region, &valid);
        let thresholds = ThresholdSet::precompute(
            &backend,
            &cache,
            &valid,
            &region,
            &DetectionConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

        DetectionEngine::new(&backend, DetectionConfig::default())
            .run_zone(&region, &valid, &cache, &thresholds, None)
            .await
            .unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_timeline_yields_empty_outcome() {
        let backend = world(4, &[]);
        let outcome = detect(&backend, &[], None).await;

        assert!(outcome.timeseries.is_empty());
        assert!(outcome.analysis_start.is_none());
        assert!(outcome.analysis_end.is_none());
        // Nothing to resolve: the backend is never contacted.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn seed_only_timeline_yields_no_rows() {
        let months = timeline(1);
        let backend = world(4, &months);
        let outcome = detect(&backend, &months, None).await;

        assert!(outcome.timeseries.is_empty());
        assert!(outcome.analysis_start.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn null_area_reduction_defaults_to_zero() {
        let months = timeline(2);
        let region = square();
        let cache = CompositeCache::build(&region, &months);
        let mut pairs = HashMap::new();
        pairs.insert(
            months[1],
            ThresholdPair {
                optical: 0.1,
                radar: 0.1,
            },
        );
        let thresholds = ThresholdSet::from_pairs(pairs);

        let outcome = DetectionEngine::new(&NullBackend, DetectionConfig::default())
            .run_zone(&region, &months, &cache, &thresholds, None)
            .await
            .unwrap();

        assert_eq!(areas(&outcome), vec![0.0]);
    }

    #[tokio::test]
    async fn null_threshold_is_fatal() {
        let months = timeline(2);
        let region = square();
        let cache = CompositeCache::build(&region, &months);

        let result = ThresholdSet::precompute(
            &NullBackend,
            &cache,
            &months,
            &region,
            &DetectionConfig::default(),
        )
        .await;

        assert!(matches!(result, Err(DetectionError::MissingData(_))));
    }

    #[tokio::test]
    async fn thumbnails_are_exported_for_visualized_zone() {
        let months = timeline(3);
        let mut backend = world(10, &months);
        backend.set_ndvi(months[1], 0, 0.2);
        backend.set_ndvi(months[2], 0, 0.2);

        let output_dir =
            std::env::temp_dir().join(format!("change-detection-test-{}", std::process::id()));
        let viz = VizSettings {
            zone_id: "mine".to_string(),
            output_dir: output_dir.clone(),
            static_prefix: "/static".to_string(),
            params: ThumbnailParams::default(),
        };

        let outcome = detect(&backend, &months, Some(&viz)).await;

        assert_eq!(outcome.thumbnails.len(), 2);
        assert_eq!(
            outcome.thumbnails.get("2020-03-01").map(String::as_str),
            Some("/static/mine/2020-03-01.png")
        );
        assert_eq!(outcome.masks.len(), 2);
        assert!(output_dir.join("mine/2020-03-01.png").exists());

        std::fs::remove_dir_all(&output_dir).ok();
    }

    #[tokio::test]
    async fn thumbnail_failure_is_non_fatal() {
        let months = timeline(3);
        let mut backend = world(10, &months);
        backend.set_ndvi(months[1], 0, 0.5);
        backend.set_ndvi(months[2], 0, 0.2);
        backend.fail_thumbnails = true;

        let output_dir =
            std::env::temp_dir().join(format!("change-detection-fail-{}", std::process::id()));
        let viz = VizSettings {
            zone_id: "mine".to_string(),
            output_dir,
            static_prefix: "/static".to_string(),
            params: ThumbnailParams::default(),
        };

        let outcome = detect(&backend, &months, Some(&viz)).await;

        // Detection state is unaffected by the export failures.
        assert!(outcome.thumbnails.is_empty());
        assert_eq!(areas(&outcome).len(), 2);
        assert_eq!(*areas(&outcome).last().unwrap(), 1.0);
    }
}
