use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
    #[error("acquisition exited with status {status:?}: {detail}")]
    Failed { status: Option<i32>, detail: String },
    #[error("acquisition finished but {0} does not exist")]
    MissingOutput(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("acquisition cancelled")]
    Cancelled,
    #[error("acquisition task aborted: {0}")]
    Aborted(String),
}

pub type AcquisitionResult<T> = Result<T, AcquisitionError>;
