//! Lazy expression trees for the remote raster backend.
//!
//! Nothing here touches the network: an `ImageExpr` or `ScalarExpr` is an
//! opaque description of work the backend can perform. Scalars only
//! materialize when a whole batch is shipped through
//! [`RasterBackend::evaluate`](crate::traits::RasterBackend::evaluate), so
//! callers can compose per-month and per-zone computations freely and pay a
//! single round trip per phase.

use serde::{Deserialize, Serialize};

use crate::types::Geometry;

/// A lazy raster. Leaves name month-scoped composites the backend builds
/// server-side; interior nodes are per-pixel arithmetic and masking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ImageExpr {
    /// Cloud-masked monthly median of the optical collection, reduced to the
    /// NDVI/NBR index pair. `region` bounds the scene filter.
    OpticalIndices {
        year: i32,
        month: u32,
        region: Geometry,
    },
    /// Monthly median true-color composite (B4/B3/B2).
    OpticalRgb {
        year: i32,
        month: u32,
        region: Geometry,
    },
    /// Monthly median dual-pol radar composite: VV, VH and their difference
    /// as a RATIO band.
    RadarComposite {
        year: i32,
        month: u32,
        region: Geometry,
    },
    Constant {
        value: f64,
    },
    /// Per-pixel ground area in square meters.
    PixelArea,
    Clip {
        source: Box<ImageExpr>,
        geometry: Geometry,
    },
    Select {
        source: Box<ImageExpr>,
        band: String,
    },
    Subtract {
        left: Box<ImageExpr>,
        right: Box<ImageExpr>,
    },
    Multiply {
        left: Box<ImageExpr>,
        right: Box<ImageExpr>,
    },
    Pow {
        source: Box<ImageExpr>,
        exponent: f64,
    },
    Abs {
        source: Box<ImageExpr>,
    },
    Sqrt {
        source: Box<ImageExpr>,
    },
    /// Collapse all bands of each pixel into their sum (single-band output).
    SumBands {
        source: Box<ImageExpr>,
    },
    Gt {
        left: Box<ImageExpr>,
        right: Box<ImageExpr>,
    },
    Lte {
        left: Box<ImageExpr>,
        right: Box<ImageExpr>,
    },
    And {
        left: Box<ImageExpr>,
        right: Box<ImageExpr>,
    },
    Or {
        left: Box<ImageExpr>,
        right: Box<ImageExpr>,
    },
    /// Mask `source` wherever `mask` is zero or itself masked.
    UpdateMask {
        source: Box<ImageExpr>,
        mask: Box<ImageExpr>,
    },
    /// Mask a boolean image by its own nonzero values.
    SelfMask {
        source: Box<ImageExpr>,
    },
}

impl ImageExpr {
    pub fn constant(value: f64) -> Self {
        ImageExpr::Constant { value }
    }

    pub fn pixel_area() -> Self {
        ImageExpr::PixelArea
    }

    pub fn clip(self, geometry: &Geometry) -> Self {
        ImageExpr::Clip {
            source: Box::new(self),
            geometry: geometry.clone(),
        }
    }

    pub fn select(self, band: impl Into<String>) -> Self {
        ImageExpr::Select {
            source: Box::new(self),
            band: band.into(),
        }
    }

    pub fn subtract(self, other: ImageExpr) -> Self {
        ImageExpr::Subtract {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn multiply(self, other: ImageExpr) -> Self {
        ImageExpr::Multiply {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn pow(self, exponent: f64) -> Self {
        ImageExpr::Pow {
            source: Box::new(self),
            exponent,
        }
    }

    pub fn abs(self) -> Self {
        ImageExpr::Abs {
            source: Box::new(self),
        }
    }

    pub fn sqrt(self) -> Self {
        ImageExpr::Sqrt {
            source: Box::new(self),
        }
    }

    pub fn sum_bands(self) -> Self {
        ImageExpr::SumBands {
            source: Box::new(self),
        }
    }

    pub fn gt(self, other: ImageExpr) -> Self {
        ImageExpr::Gt {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn lte(self, other: ImageExpr) -> Self {
        ImageExpr::Lte {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn and(self, other: ImageExpr) -> Self {
        ImageExpr::And {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn or(self, other: ImageExpr) -> Self {
        ImageExpr::Or {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn update_mask(self, mask: ImageExpr) -> Self {
        ImageExpr::UpdateMask {
            source: Box::new(self),
            mask: Box::new(mask),
        }
    }

    pub fn self_mask(self) -> Self {
        ImageExpr::SelfMask {
            source: Box::new(self),
        }
    }

    /// Zonal reduction of this image over `geometry` at `scale_m` resolution.
    pub fn reduce_region(
        self,
        reducer: Reducer,
        geometry: &Geometry,
        scale_m: f64,
        max_pixels: f64,
    ) -> ScalarExpr {
        ScalarExpr::ReduceRegion {
            image: self,
            reducer,
            geometry: geometry.clone(),
            scale_m,
            max_pixels,
        }
    }

    /// Number of bands in the materialized image. Zero means the source
    /// collection had no qualifying scene for the month.
    pub fn band_count(self) -> ScalarExpr {
        ScalarExpr::BandCount { image: self }
    }
}

/// Statistic applied by a zonal reduction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reducer {
    Sum,
    Percentile { percentile: u8 },
}

/// A deferred scalar computation. Resolved only in bulk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScalarExpr {
    BandCount {
        image: ImageExpr,
    },
    ReduceRegion {
        image: ImageExpr,
        reducer: Reducer,
        geometry: Geometry,
        scale_m: f64,
        max_pixels: f64,
    },
    /// Planar area of the geometry in square meters.
    GeometryArea {
        geometry: Geometry,
    },
    Divide {
        source: Box<ScalarExpr>,
        divisor: f64,
    },
    /// Substitute `default` when `source` resolves to null.
    IfNull {
        source: Box<ScalarExpr>,
        default: f64,
    },
}

impl ScalarExpr {
    pub fn geometry_area(geometry: &Geometry) -> Self {
        ScalarExpr::GeometryArea {
            geometry: geometry.clone(),
        }
    }

    pub fn divide(self, divisor: f64) -> Self {
        ScalarExpr::Divide {
            source: Box::new(self),
            divisor,
        }
    }

    pub fn if_null(self, default: f64) -> Self {
        ScalarExpr::IfNull {
            source: Box::new(self),
            default,
        }
    }
}
