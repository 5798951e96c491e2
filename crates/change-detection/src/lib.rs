pub mod composites;
pub mod config;
pub mod cva;
pub mod engine;
pub mod resolver;
pub mod thresholds;

#[cfg(test)]
mod engine_tests;

pub use composites::*;
pub use config::*;
pub use engine::*;
pub use resolver::*;
pub use thresholds::*;
