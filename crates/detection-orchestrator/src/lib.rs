//! Sequences the full detection run: availability filter, composite cache,
//! zone areas, threshold precomputation, per-zone detection and analytics,
//! result-document assembly. Progress is published through a shared record a
//! polling reader can snapshot at any time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use change_detection::{
    candidate_months, filter_available, BatchResolver, CompositeCache, DetectionConfig,
    DetectionEngine, DetectionOutcome, ThresholdSet, VizSettings,
};
use detection_core::{
    DetectionError, MineReport, RasterBackend, ResultDocument, RunMetadata, ScalarExpr,
    ThumbnailParams, Zone, ZoneReport,
};

mod progress;
pub use progress::ProgressTracker;


/// Full pipeline configuration. Defaults match the monitored deployment:
/// bimonthly candidates over 2020-2024, 10 m reductions, thumbnails under
/// `outputs/` referenced as `/static/...`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub start_year: i32,
    pub end_year: i32,
    /// Months-of-interest within each year.
    pub months: Vec<u32>,
    pub detection: DetectionConfig,
    pub output_dir: PathBuf,
    pub static_prefix: String,
    /// When set, the result document is also written here as JSON. A write
    /// failure is logged and does not fail the run.
    pub result_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_year: 2020,
            end_year: 2024,
            months: vec![1, 3, 5, 7, 9, 11],
            detection: DetectionConfig::default(),
            output_dir: PathBuf::from("outputs"),
            static_prefix: "/static".to_string(),
            result_path: None,
        }
    }
}

pub struct MiningPipeline<B: RasterBackend> {
    backend: B,
    config: PipelineConfig,
    progress: ProgressTracker,
}

impl<B: RasterBackend> MiningPipeline<B> {
    pub fn new(backend: B, config: PipelineConfig) -> Self {
        Self {
            backend,
            config,
            progress: ProgressTracker::default(),
        }
    }

    /// Handle for polling readers. Cloning is cheap; snapshots stay coherent
    /// while a run is writing.
    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    /// Run the full pipeline for the reference zone and its exclusion zones.
    /// On failure the progress record carries the error and no result
    /// document is produced.
    pub async fn run(
        &self,
        mine: &Zone,
        no_go_zones: &[Zone],
    ) -> Result<ResultDocument, DetectionError> {
        self.progress.start();
        match self.run_inner(mine, no_go_zones).await {
            Ok(document) => {
                self.progress.finish();
                Ok(document)
            }
            Err(e) => {
                tracing::error!("Pipeline run failed: {}", e);
                self.progress.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        mine: &Zone,
        no_go_zones: &[Zone],
    ) -> Result<ResultDocument, DetectionError> {
        let started = Instant::now();
        let reference = &mine.geometry;
        self.progress.set_percent(10);

        let candidates =
            candidate_months(self.config.start_year, self.config.end_year, &self.config.months);
        tracing::info!(
            "Analyzing {} candidate months for {} exclusion zones",
            candidates.len(),
            no_go_zones.len()
        );
        self.progress.set_percent(20);

        let valid_keys = filter_available(&self.backend, reference, &candidates).await?;
        self.progress.set_percent(30);

        let cache = CompositeCache::build(reference, &valid_keys);

        // Zone areas for the reference and every exclusion zone, one batch.
        let mut resolver = BatchResolver::new(&self.backend);
        let mine_area_handle =
            resolver.submit(ScalarExpr::geometry_area(reference).divide(1e6));
        let zone_area_handles: Vec<_> = no_go_zones
            .iter()
            .map(|zone| resolver.submit(ScalarExpr::geometry_area(&zone.geometry).divide(1e6)))
            .collect();
        let zone_areas = resolver.resolve_all().await?;
        self.progress.set_percent(40);

        let thresholds = ThresholdSet::precompute(
            &self.backend,
            &cache,
            &valid_keys,
            reference,
            &self.config.detection,
        )
        .await?;
        self.progress.set_percent(50);

        let engine = DetectionEngine::new(&self.backend, self.config.detection.clone());

        let viz = VizSettings {
            zone_id: mine.name.clone(),
            output_dir: self.config.output_dir.clone(),
            static_prefix: self.config.static_prefix.clone(),
            params: ThumbnailParams::default(),
        };
        let mine_out = engine
            .run_zone(reference, &valid_keys, &cache, &thresholds, Some(&viz))
            .await?;
        self.progress.set_percent(60);

        let mut zone_outs = Vec::with_capacity(no_go_zones.len());
        let total_zones = no_go_zones.len();
        if total_zones == 0 {
            self.progress.set_percent(80);
        }
        for (i, zone) in no_go_zones.iter().enumerate() {
            zone_outs.push(
                engine
                    .run_zone(&zone.geometry, &valid_keys, &cache, &thresholds, None)
                    .await?,
            );
            self.progress
                .set_percent((60 + 20 * (i + 1) / total_zones) as u8);
        }

        let mine_area_km2 = zone_areas.get(mine_area_handle).unwrap_or(0.0);
        let mine_report = self.assemble_mine_report(&mine_out, mine_area_km2);

        let mut no_go_results = BTreeMap::new();
        for ((zone, out), handle) in no_go_zones.iter().zip(&zone_outs).zip(zone_area_handles) {
            let zone_area_km2 = zone_areas.get(handle).unwrap_or(0.0);
            no_go_results.insert(
                zone.name.clone(),
                Self::assemble_zone_report(out, zone_area_km2),
            );
        }
        self.progress.set_percent(90);

        let document = ResultDocument {
            metadata: RunMetadata {
                analysis_start: mine_out.analysis_start.clone(),
                analysis_end: mine_out.analysis_end.clone(),
                valid_months: valid_keys,
            },
            mine: mine_report,
            no_go_zones: no_go_results,
        };

        if let Some(path) = &self.config.result_path {
            self.persist_result(path, &document);
        }

        tracing::info!("Pipeline runtime: {:.1}s", started.elapsed().as_secs_f64());
        Ok(document)
    }

    fn assemble_mine_report(&self, out: &DetectionOutcome, mine_area_km2: f64) -> MineReport {
        let series = &out.timeseries;
        let current_area_km2 = series.last().map(|r| r.area_km2).unwrap_or(0.0);
        let monthly_growth = zone_analytics::monthly_growth(series);
        let current_month_growth = monthly_growth.last().map(|g| g.growth_km2).unwrap_or(0.0);

        MineReport {
            timeseries: series.clone(),
            current_area_km2,
            percentage_mined: zone_analytics::percentage(current_area_km2, mine_area_km2),
            current_month_growth,
            predicted_next_month_area: zone_analytics::predict_next(series),
            monthly_growth,
            quantified_maps: out.thumbnails.clone(),
        }
    }

    fn assemble_zone_report(out: &DetectionOutcome, zone_area_km2: f64) -> ZoneReport {
        let series = &out.timeseries;
        let current_area_km2 = series.last().map(|r| r.area_km2).unwrap_or(0.0);
        let predicted_next_area = zone_analytics::predict_next(series);

        ZoneReport {
            timeseries: series.clone(),
            current_area_km2,
            percentage_mined: zone_analytics::percentage(current_area_km2, zone_area_km2),
            alerts: zone_analytics::build_alert_log(series, zone_area_km2),
            first_violation: zone_analytics::first_violation(series),
            monthly_growth: zone_analytics::monthly_growth(series),
            predicted_next_alert: zone_analytics::classify_alert(
                predicted_next_area.unwrap_or(0.0),
                zone_area_km2,
            ),
            predicted_next_area,
            analysis_start: out.analysis_start.clone(),
            analysis_end: out.analysis_end.clone(),
        }
    }

    fn persist_result(&self, path: &PathBuf, document: &ResultDocument) {
        let write = serde_json::to_string_pretty(document)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));

        match write {
            Ok(()) => tracing::info!("Result document saved to {}", path.display()),
            Err(e) => tracing::error!("Failed to save result document: {}", e),
        }
    }
}
