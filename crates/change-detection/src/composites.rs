//! Monthly composite construction and the run-scoped composite cache.
//!
//! Composites are lazy expression trees built once against the reference
//! geometry and re-clipped per zone at use time; nothing here costs a network
//! round trip. The availability filter is the only remote touch and it is a
//! single batched call.

use dashmap::DashMap;

use detection_core::{DetectionError, Geometry, ImageExpr, MonthKey, RasterBackend};

use crate::resolver::BatchResolver;

/// The three derived rasters the pipeline needs for one valid month.
#[derive(Debug, Clone)]
pub struct MonthlyComposite {
    /// NDVI/NBR index pair from the cloud-masked optical median.
    pub optical: ImageExpr,
    /// True-color composite for visualization.
    pub rgb: ImageExpr,
    /// Dual-pol radar median plus ratio band.
    pub radar: ImageExpr,
}

impl MonthlyComposite {
    fn build(key: MonthKey, region: &Geometry) -> Self {
        Self {
            optical: ImageExpr::OpticalIndices {
                year: key.year,
                month: key.month,
                region: region.clone(),
            },
            rgb: ImageExpr::OpticalRgb {
                year: key.year,
                month: key.month,
                region: region.clone(),
            },
            radar: ImageExpr::RadarComposite {
                year: key.year,
                month: key.month,
                region: region.clone(),
            },
        }
    }
}

/// Per-run cache of monthly composites, populated once and never mutated
/// afterwards.
pub struct CompositeCache {
    entries: DashMap<MonthKey, MonthlyComposite>,
}

impl CompositeCache {
    /// Build composites for every valid month against the reference geometry.
    pub fn build(region: &Geometry, valid_keys: &[MonthKey]) -> Self {
        let entries = DashMap::new();
        for key in valid_keys {
            entries.insert(*key, MonthlyComposite::build(*key, region));
        }
        Self { entries }
    }

    /// Composite for a valid month; months outside the timeline are an error.
    pub fn get(&self, key: MonthKey) -> Result<MonthlyComposite, DetectionError> {
        self.entries
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(DetectionError::MissingComposite(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Candidate timeline: the configured year range crossed with the
/// months-of-interest, in chronological order.
pub fn candidate_months(start_year: i32, end_year: i32, months: &[u32]) -> Vec<MonthKey> {
    let mut keys: Vec<MonthKey> = (start_year..=end_year)
        .flat_map(|year| months.iter().map(move |&month| MonthKey::new(year, month)))
        .collect();
    keys.sort();
    keys
}

/// Keep the candidates for which the reference geometry has at least one
/// qualifying cloud-filtered optical scene. One batched band-count check; a
/// month with no scenes is silently dropped from the timeline for every zone.
pub async fn filter_available(
    backend: &dyn RasterBackend,
    reference: &Geometry,
    candidates: &[MonthKey],
) -> Result<Vec<MonthKey>, DetectionError> {
    let mut resolver = BatchResolver::new(backend);
    let handles: Vec<_> = candidates
        .iter()
        .map(|key| {
            resolver.submit(
                ImageExpr::OpticalIndices {
                    year: key.year,
                    month: key.month,
                    region: reference.clone(),
                }
                .band_count(),
            )
        })
        .collect();

    let batch = resolver.resolve_all().await?;

    let valid: Vec<MonthKey> = candidates
        .iter()
        .zip(handles)
        .filter(|(_, handle)| batch.get(*handle).unwrap_or(0.0) > 0.0)
        .map(|(key, _)| *key)
        .collect();

    tracing::info!(
        "{} of {} candidate months have qualifying scenes",
        valid.len(),
        candidates.len()
    );
    Ok(valid)
}
