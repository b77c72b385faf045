use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single pipeline run. Anything here fails the run as a whole;
/// no partial output is written.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn input(msg: impl Into<String>) -> Self {
        PipelineError::Input(msg.into())
    }
}
