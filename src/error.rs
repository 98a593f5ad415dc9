use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Failed to parse CSV fragment {}: {source}", path.display())]
    FragmentParse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Metric computation error: {0}")]
    MetricComputation(String),

    #[error("Failed to write output {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Wrap any I/O failure on `path` as a write error.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Write {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly label, used for metric labels and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DataSource(_) => "data_source",
            PipelineError::FragmentParse { .. } => "fragment_parse",
            PipelineError::Schema(_) => "schema",
            PipelineError::MetricComputation(_) => "metric_computation",
            PipelineError::Write { .. } => "write",
            PipelineError::Config(_) => "config",
            PipelineError::Toml(_) => "toml",
            PipelineError::Json(_) => "json",
            PipelineError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
