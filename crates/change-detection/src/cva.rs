//! Change-vector analysis: per-pixel change magnitude between two periods.

use detection_core::ImageExpr;

/// Euclidean norm of the optical index differences (NDVI, NBR).
pub fn optical_magnitude(current: &ImageExpr, previous: &ImageExpr) -> ImageExpr {
    current
        .clone()
        .subtract(previous.clone())
        .pow(2.0)
        .sum_bands()
        .sqrt()
}

/// Sum of absolute radar band differences (VV, VH, RATIO).
pub fn radar_magnitude(current: &ImageExpr, previous: &ImageExpr) -> ImageExpr {
    current
        .clone()
        .subtract(previous.clone())
        .abs()
        .sum_bands()
}
