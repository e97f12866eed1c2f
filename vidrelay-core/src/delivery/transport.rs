use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::TransportResult;
use crate::media::MediaInfo;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub caption: String,
    pub size: u64,
    /// Hints only. Missing fields never block an upload.
    pub media: MediaInfo,
}

impl UploadRequest {
    pub fn new(path: &Path, caption: impl Into<String>, size: u64, media: MediaInfo) -> Self {
        Self {
            path: path.to_path_buf(),
            caption: caption.into(),
            size,
            media,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// One delivery tier.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upload(&self, request: &UploadRequest) -> TransportResult<()>;
}
