use std::path::PathBuf;

use thiserror::Error;

use crate::media::ToolError;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport recognized the payload as over its size limit.
    #[error("payload too large for transport: {message}")]
    TooLarge { message: String },
    #[error("transport rejected upload (status {status:?}): {message}")]
    Rejected { status: Option<u16>, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl TransportError {
    pub fn is_too_large(&self) -> bool {
        matches!(self, TransportError::TooLarge { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        TransportError::Network(error.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{path} is {state}, not ready for delivery")]
    NotDeliverable {
        path: PathBuf,
        state: crate::artifact::ArtifactState,
    },
    #[error("{0} is already being handled elsewhere")]
    Busy(PathBuf),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Lifecycle(#[from] crate::artifact::LifecycleError),
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
