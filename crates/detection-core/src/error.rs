use thiserror::Error;

use crate::types::MonthKey;

#[derive(Error, Debug)]
pub enum DetectionError {
    /// A composite lookup for a month outside the valid timeline.
    #[error("No composite cached for {0}")]
    MissingComposite(MonthKey),

    /// A reduction that must yield a value came back null.
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Remote evaluation / transport failure. Fatal to the run.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Thumbnail rendering or write failure. Callers treat this as non-fatal.
    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
