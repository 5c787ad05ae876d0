use arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use parquet::errors::ParquetError;
use thiserror::Error;

pub mod config;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("source table '{0}' does not exist; run ingestion first")]
    SourceMissing(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("stage '{stage}' failed after {elapsed_ms}ms: {source}")]
    Stage {
        stage: String,
        elapsed_ms: u128,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wraps a stage failure with its label and elapsed time so the caller
    /// can diagnose without inspecting pipeline internals.
    pub fn stage(stage: &str, elapsed_ms: u128, source: Error) -> Self {
        Error::Stage {
            stage: stage.to_string(),
            elapsed_ms,
            source: Box::new(source),
        }
    }
}
