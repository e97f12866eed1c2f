use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::LifecycleError;
use crate::media::ToolError;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("{0} is already being handled elsewhere")]
    Busy(PathBuf),
    #[error("{0} disappeared before recovery")]
    Vanished(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("recovery exhausted for {source_path}; moved to {destination}")]
    Quarantined {
        source_path: PathBuf,
        destination: PathBuf,
        failures: Vec<String>,
    },
    #[error("media tool failed: {0}")]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RecoveryError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RecoveryError::Io {
            source,
            path: path.into(),
        }
    }
}

impl From<serde_json::Error> for RecoveryError {
    fn from(error: serde_json::Error) -> Self {
        RecoveryError::Serialization(error.to_string())
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
