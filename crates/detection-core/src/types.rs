use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

/// A (year, month) key in the detection timeline.
///
/// Ordering is chronological, which makes a sorted `Vec<MonthKey>` the
/// canonical timeline representation. Serialized as a `(year, month)` tuple
/// to match the result-document wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "(i32, u32)", from = "(i32, u32)")]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// First day of the month, the timestamp every row of this month carries.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Date string used as row/thumbnail key, e.g. "2021-03-01".
    pub fn date_key(&self) -> String {
        format!("{}-{:02}-01", self.year, self.month)
    }
}

impl From<MonthKey> for (i32, u32) {
    fn from(key: MonthKey) -> Self {
        (key.year, key.month)
    }
}

impl From<(i32, u32)> for MonthKey {
    fn from((year, month): (i32, u32)) -> Self {
        Self { year, month }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Polygon geometry in lon/lat, outer ring first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub rings: Vec<Vec<[f64; 2]>>,
}

impl Geometry {
    pub fn new(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Self { rings }
    }

    /// Extract a polygon from a GeoJSON document. Accepts a FeatureCollection
    /// (first feature wins), a single Feature, or a bare Polygon geometry.
    pub fn from_geojson(doc: &serde_json::Value) -> Result<Self, DetectionError> {
        let geometry = match doc.get("type").and_then(|t| t.as_str()) {
            Some("FeatureCollection") => doc
                .get("features")
                .and_then(|f| f.as_array())
                .and_then(|f| f.first())
                .and_then(|f| f.get("geometry"))
                .ok_or_else(|| {
                    DetectionError::InvalidGeometry("FeatureCollection has no features".to_string())
                })?,
            Some("Feature") => doc.get("geometry").ok_or_else(|| {
                DetectionError::InvalidGeometry("Feature has no geometry".to_string())
            })?,
            _ => doc,
        };

        match geometry.get("type").and_then(|t| t.as_str()) {
            Some("Polygon") => {}
            other => {
                return Err(DetectionError::InvalidGeometry(format!(
                    "expected Polygon geometry, got {:?}",
                    other
                )))
            }
        }

        let coordinates = geometry
            .get("coordinates")
            .ok_or_else(|| DetectionError::InvalidGeometry("missing coordinates".to_string()))?;
        let rings: Vec<Vec<[f64; 2]>> = serde_json::from_value(coordinates.clone())
            .map_err(|e| DetectionError::InvalidGeometry(format!("bad coordinates: {}", e)))?;

        if rings.is_empty() || rings[0].len() < 4 {
            return Err(DetectionError::InvalidGeometry(
                "polygon needs a closed outer ring".to_string(),
            ));
        }

        Ok(Self { rings })
    }
}

/// Role of a zone within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    /// The monitored mine boundary; thresholds are derived from it.
    Reference,
    /// A no-go zone watched for encroachment.
    Exclusion,
}

/// A monitored polygon. Immutable once loaded; all derived state is keyed
/// externally by the zone's name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub kind: ZoneKind,
    pub geometry: Geometry,
}

impl Zone {
    pub fn reference(name: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            name: name.into(),
            kind: ZoneKind::Reference,
            geometry,
        }
    }

    pub fn exclusion(name: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            name: name.into(),
            kind: ZoneKind::Exclusion,
            geometry,
        }
    }
}

/// One resolved point of a zone's cumulative-disturbance series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeseriesRow {
    pub date: String,
    pub area_km2: f64,
}

/// Row-to-row area delta. Non-negative as long as the cumulative mask only
/// ever grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthRow {
    pub date: String,
    pub growth_km2: f64,
}

/// Alert severity for an exclusion zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTier {
    None,
    Soft,
    Hard,
}

/// One alert-log entry for an exclusion zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub date: String,
    pub area_km2: f64,
    pub growth_km2: f64,
    pub alert: AlertTier,
}

/// Pipeline run status as seen by a polling reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Done,
    Error,
}

/// Shared progress record. Overwritten wholesale at run start; single writer,
/// any number of polling readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub status: RunStatus,
    pub progress: u8,
    pub error: Option<String>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            progress: 0,
            error: None,
        }
    }
}

/// Timeline bookkeeping for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub analysis_start: Option<String>,
    pub analysis_end: Option<String>,
    pub valid_months: Vec<MonthKey>,
}

/// Reference-zone section of the result document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MineReport {
    pub timeseries: Vec<TimeseriesRow>,
    pub current_area_km2: f64,
    pub percentage_mined: f64,
    pub monthly_growth: Vec<GrowthRow>,
    pub current_month_growth: f64,
    pub predicted_next_month_area: Option<f64>,
    /// date -> static path of the rendered disturbance thumbnail.
    pub quantified_maps: BTreeMap<String, String>,
}

/// Per-exclusion-zone section of the result document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneReport {
    pub timeseries: Vec<TimeseriesRow>,
    pub current_area_km2: f64,
    pub percentage_mined: f64,
    pub alerts: Vec<AlertRecord>,
    pub first_violation: Option<String>,
    pub monthly_growth: Vec<GrowthRow>,
    pub predicted_next_area: Option<f64>,
    pub predicted_next_alert: AlertTier,
    pub analysis_start: Option<String>,
    pub analysis_end: Option<String>,
}

/// The single document a run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDocument {
    pub metadata: RunMetadata,
    pub mine: MineReport,
    pub no_go_zones: BTreeMap<String, ZoneReport>,
}
