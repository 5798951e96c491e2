//! The per-zone change detection state machine.
//!
//! Iterates the valid timeline in chronological order, carrying the previous
//! composites, the previous raw candidate mask and the cumulative mask across
//! iterations. Area integrals are deferred and resolved in one round trip per
//! zone after the loop.

use std::collections::BTreeMap;
use std::path::PathBuf;

use detection_core::{
    DetectionError, Geometry, ImageExpr, MonthKey, RasterBackend, Reducer, ThumbnailParams,
    TimeseriesRow,
};

use crate::composites::{CompositeCache, MonthlyComposite};
use crate::config::DetectionConfig;
use crate::cva;
use crate::resolver::BatchResolver;
use crate::thresholds::ThresholdSet;

/// Where and how to export disturbance thumbnails for a visualized zone.
#[derive(Debug, Clone)]
pub struct VizSettings {
    /// Subdirectory and reference-path segment, e.g. "mine".
    pub zone_id: String,
    pub output_dir: PathBuf,
    /// Prefix of the recorded reference path, e.g. "/static".
    pub static_prefix: String,
    pub params: ThumbnailParams,
}

/// Everything one zone's detection run produces.
pub struct DetectionOutcome {
    pub timeseries: Vec<TimeseriesRow>,
    /// date -> cumulative mask expression. Visualized zone only, kept for
    /// potential reuse.
    pub masks: BTreeMap<String, ImageExpr>,
    /// date -> exported thumbnail reference path. Visualized zone only.
    pub thumbnails: BTreeMap<String, String>,
    pub analysis_start: Option<String>,
    pub analysis_end: Option<String>,
}

pub struct DetectionEngine<'a> {
    backend: &'a dyn RasterBackend,
    config: DetectionConfig,
}

impl<'a> DetectionEngine<'a> {
    pub fn new(backend: &'a dyn RasterBackend, config: DetectionConfig) -> Self {
        Self { backend, config }
    }

    /// Run detection for one zone over the valid timeline.
    ///
    /// The first valid month only seeds state and emits no row. Each later
    /// month builds the candidate mask from the reference-derived thresholds,
    /// applies the persistence filter against the previous candidate, and
    /// folds the result into the monotonic cumulative mask.
    pub async fn run_zone(
        &self,
        geometry: &Geometry,
        valid_keys: &[MonthKey],
        cache: &CompositeCache,
        thresholds: &ThresholdSet,
        viz: Option<&VizSettings>,
    ) -> Result<DetectionOutcome, DetectionError> {
        let mut rows: Vec<TimeseriesRow> = Vec::new();
        let mut masks = BTreeMap::new();
        let mut thumbnails = BTreeMap::new();

        let mut resolver = BatchResolver::new(self.backend);
        let mut area_handles = Vec::new();

        let mut prev_optical: Option<ImageExpr> = None;
        let mut prev_radar: Option<ImageExpr> = None;
        let mut prev_candidate: Option<ImageExpr> = None;
        let mut cumulative: Option<ImageExpr> = None;

        for key in valid_keys {
            let composite = cache.get(*key)?;

            // The cache is unclipped; clip to this zone for local analysis.
            let optical = composite.optical.clone().clip(geometry);
            let radar = composite.radar.clone().clip(geometry);

            let (previous_optical, previous_radar) = match (&prev_optical, &prev_radar) {
                (Some(o), Some(r)) => (o.clone(), r.clone()),
                _ => {
                    // Seed month: no detection possible yet.
                    prev_optical = Some(optical);
                    prev_radar = Some(radar);
                    continue;
                }
            };

            let optical_magnitude = cva::optical_magnitude(&optical, &previous_optical);
            let radar_magnitude = cva::radar_magnitude(&radar, &previous_radar);

            // Always the reference-derived thresholds, even for exclusion
            // zones, so detection behavior is comparable across zones.
            let pair = thresholds.get(*key).ok_or_else(|| {
                DetectionError::MissingData(format!("no thresholds for {}", key))
            })?;

            let candidate = optical_magnitude
                .gt(ImageExpr::constant(pair.optical))
                .or(radar_magnitude.gt(ImageExpr::constant(pair.radar)));

            // Persistence filter: exceedance counts only when it co-occurred
            // with exceedance in the adjacent prior period.
            let stable = match &prev_candidate {
                Some(previous) => candidate.clone().and(previous.clone()),
                None => candidate.clone(),
            };

            // Monotonic union: disturbance accumulates, it does not heal.
            let mask = match cumulative.take() {
                Some(accumulated) => accumulated.or(stable),
                None => stable,
            };

            let date_key = key.date_key();

            if let Some(viz) = viz {
                masks.insert(date_key.clone(), mask.clone());
                match self
                    .export_thumbnail(viz, &date_key, &composite, &optical, geometry, &mask)
                    .await
                {
                    Ok(path) => {
                        thumbnails.insert(date_key.clone(), path);
                    }
                    Err(e) => {
                        // A missing thumbnail is tolerated; detection state
                        // is unaffected.
                        tracing::warn!(
                            "Thumbnail export failed for {} {}: {}",
                            viz.zone_id,
                            date_key,
                            e
                        );
                    }
                }
            }

            let area = mask
                .clone()
                .multiply(ImageExpr::pixel_area())
                .reduce_region(
                    Reducer::Sum,
                    geometry,
                    self.config.scale_m,
                    self.config.max_pixels,
                )
                .divide(1e6)
                .if_null(0.0);
            area_handles.push(resolver.submit(area));
            rows.push(TimeseriesRow {
                date: date_key,
                area_km2: 0.0,
            });

            prev_optical = Some(optical);
            prev_radar = Some(radar);
            prev_candidate = Some(candidate);
            cumulative = Some(mask);
        }

        // One round trip resolves every area for this zone.
        if resolver.pending() > 0 {
            let batch = resolver.resolve_all().await?;
            for (row, handle) in rows.iter_mut().zip(area_handles) {
                row.area_km2 = batch.get(handle).unwrap_or(0.0);
            }
        }

        let analysis_start = rows.first().map(|r| r.date.clone());
        let analysis_end = rows.last().map(|r| r.date.clone());

        Ok(DetectionOutcome {
            timeseries: rows,
            masks,
            thumbnails,
            analysis_start,
            analysis_end,
        })
    }

    /// Render the confirmed-disturbance overlay for one month and write it
    /// under `{output_dir}/{zone_id}/{date}.png`. Returns the reference path.
    async fn export_thumbnail(
        &self,
        viz: &VizSettings,
        date_key: &str,
        composite: &MonthlyComposite,
        clipped_optical: &ImageExpr,
        geometry: &Geometry,
        mask: &ImageExpr,
    ) -> Result<String, DetectionError> {
        // Restrict the overlay to pixels that also look bare: confirmed
        // disturbance with NDVI at or below the ceiling.
        let ndvi = clipped_optical.clone().select("NDVI");
        let viz_mask = mask
            .clone()
            .and(ndvi.lte(ImageExpr::constant(self.config.ndvi_ceiling)))
            .self_mask();
        let display = composite.rgb.clone().clip(geometry).update_mask(viz_mask);

        let bytes = self
            .backend
            .render_thumbnail(&display, geometry, &viz.params)
            .await?;

        let dir = viz.output_dir.join(&viz.zone_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(format!("{date_key}.png")), &bytes)?;

        Ok(format!(
            "{}/{}/{date_key}.png",
            viz.static_prefix, viz.zone_id
        ))
    }
}
