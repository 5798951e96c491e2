/// Numeric knobs of the detection algorithm. Shared by the threshold
/// precomputer and the engine so both reduce at the same ground resolution.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Ground resolution of every zonal reduction, in meters.
    pub scale_m: f64,
    /// Safety cap forwarded to the backend's reducers.
    pub max_pixels: f64,
    /// Percentile of the optical change-magnitude distribution used as the
    /// per-period optical threshold.
    pub optical_percentile: u8,
    /// Percentile of the radar change-magnitude distribution used as the
    /// per-period radar threshold.
    pub radar_percentile: u8,
    /// Vegetation-index ceiling for visualization: confirmed pixels are only
    /// rendered where NDVI is at or below this value.
    pub ndvi_ceiling: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            scale_m: 10.0,
            max_pixels: 1e13,
            optical_percentile: 85,
            radar_percentile: 80,
            ndvi_ceiling: 0.3,
        }
    }
}
