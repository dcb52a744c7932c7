use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeatmapError {
    #[error("Configuration error: {0}")]
    Config(String),
}
