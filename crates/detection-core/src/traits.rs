use async_trait::async_trait;

use crate::error::DetectionError;
use crate::expr::{ImageExpr, ScalarExpr};
use crate::types::Geometry;

/// Rendering parameters for a thumbnail export.
#[derive(Debug, Clone)]
pub struct ThumbnailParams {
    pub bands: Vec<String>,
    pub min: f64,
    pub max: f64,
    pub dimensions: u32,
}

impl Default for ThumbnailParams {
    fn default() -> Self {
        Self {
            bands: vec!["B4".to_string(), "B3".to_string(), "B2".to_string()],
            min: 0.0,
            max: 0.3,
            dimensions: 512,
        }
    }
}

/// The remote raster compute service.
///
/// One `evaluate` call is one network round trip regardless of how many
/// expressions it carries, so callers batch aggressively and never resolve
/// inside a loop over months or zones.
#[async_trait]
pub trait RasterBackend: Send + Sync {
    /// Evaluate a batch of deferred scalars. The returned vector corresponds
    /// index-for-index with `exprs`; `None` marks a null reduction (e.g. an
    /// empty mask over the region).
    async fn evaluate(&self, exprs: &[ScalarExpr]) -> Result<Vec<Option<f64>>, DetectionError>;

    /// Render `image` clipped to `region` as a PNG thumbnail.
    async fn render_thumbnail(
        &self,
        image: &ImageExpr,
        region: &Geometry,
        params: &ThumbnailParams,
    ) -> Result<Vec<u8>, DetectionError>;
}
