//! Adaptive per-period change thresholds.
//!
//! Each consecutive month pair gets its own pair of scalars: a high percentile
//! of the change-magnitude distribution over the reference zone. The same set
//! is applied to the reference and every exclusion zone.

use std::collections::HashMap;

use detection_core::{DetectionError, Geometry, MonthKey, RasterBackend, Reducer};

use crate::composites::CompositeCache;
use crate::config::DetectionConfig;
use crate::cva;
use crate::resolver::BatchResolver;

/// Optical and radar change thresholds for one consecutive month pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPair {
    pub optical: f64,
    pub radar: f64,
}

/// Thresholds keyed by the later month of each pair. Populated once per run.
pub struct ThresholdSet {
    by_month: HashMap<MonthKey, ThresholdPair>,
}

impl ThresholdSet {
    /// Derive thresholds for every consecutive pair of `valid_keys` from the
    /// reference geometry. All reductions across the whole timeline resolve
    /// in a single backend round trip.
    pub async fn precompute(
        backend: &dyn RasterBackend,
        cache: &CompositeCache,
        valid_keys: &[MonthKey],
        reference: &Geometry,
        config: &DetectionConfig,
    ) -> Result<Self, DetectionError> {
        let mut resolver = BatchResolver::new(backend);
        let mut submissions = Vec::new();

        let mut prev: Option<(detection_core::ImageExpr, detection_core::ImageExpr)> = None;
        for key in valid_keys {
            let composite = cache.get(*key)?;

            let (prev_optical, prev_radar) = match prev.replace((
                composite.optical.clone(),
                composite.radar.clone(),
            )) {
                Some(pair) => pair,
                None => continue,
            };

            let optical_handle = resolver.submit(
                cva::optical_magnitude(&composite.optical, &prev_optical).reduce_region(
                    Reducer::Percentile {
                        percentile: config.optical_percentile,
                    },
                    reference,
                    config.scale_m,
                    config.max_pixels,
                ),
            );
            let radar_handle = resolver.submit(
                cva::radar_magnitude(&composite.radar, &prev_radar).reduce_region(
                    Reducer::Percentile {
                        percentile: config.radar_percentile,
                    },
                    reference,
                    config.scale_m,
                    config.max_pixels,
                ),
            );
            submissions.push((*key, optical_handle, radar_handle));
        }

        let batch = resolver.resolve_all().await?;

        let mut by_month = HashMap::with_capacity(submissions.len());
        for (key, optical_handle, radar_handle) in submissions {
            let optical = batch.get(optical_handle).ok_or_else(|| {
                DetectionError::MissingData(format!("null optical threshold for {}", key))
            })?;
            let radar = batch.get(radar_handle).ok_or_else(|| {
                DetectionError::MissingData(format!("null radar threshold for {}", key))
            })?;
            by_month.insert(key, ThresholdPair { optical, radar });
        }

        tracing::info!("Precomputed thresholds for {} month pairs", by_month.len());
        Ok(Self { by_month })
    }

    /// Thresholds for the pair ending at `later`.
    pub fn get(&self, later: MonthKey) -> Option<ThresholdPair> {
        self.by_month.get(&later).copied()
    }

    pub fn len(&self) -> usize {
        self.by_month.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_month.is_empty()
    }

    /// Assemble a set from known pairs. Intended for tests.
    pub fn from_pairs(pairs: HashMap<MonthKey, ThresholdPair>) -> Self {
        Self { by_month: pairs }
    }
}
