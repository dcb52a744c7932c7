pub mod config;
pub mod error;
pub mod geo;
pub mod types;

pub use config::{Config, DeletionPolicy, PipelineSettings};
pub use error::HeatmapError;
pub use geo::*;
pub use types::*;
