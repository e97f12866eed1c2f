use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;

use crate::media::MediaInfo;
use crate::stability::is_stable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Writing,
    Partial,
    Ready,
    Delivered,
    Quarantined,
}

impl ArtifactState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactState::Writing => "writing",
            ArtifactState::Partial => "partial",
            ArtifactState::Ready => "ready",
            ArtifactState::Delivered => "delivered",
            ArtifactState::Quarantined => "quarantined",
        }
    }

    pub fn can_advance_to(&self, next: ArtifactState) -> bool {
        use ArtifactState::*;
        matches!(
            (self, next),
            (Writing, Partial) | (Partial, Ready) | (Partial, Quarantined) | (Ready, Delivered)
        )
    }

    pub fn is_deliverable(&self) -> bool {
        matches!(self, ArtifactState::Ready)
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("illegal artifact transition {from} -> {to} for {path}")]
    IllegalTransition {
        path: PathBuf,
        from: ArtifactState,
        to: ArtifactState,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    #[serde(with = "system_time_secs")]
    pub modified: SystemTime,
    pub media: Option<MediaInfo>,
    pub state: ArtifactState,
}

impl Artifact {
    pub fn from_path(path: &Path, state: ArtifactState) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified()?,
            media: None,
            state,
        })
    }

    /// `Partial` once the writer has been quiet for `partial_min_age`, else `Writing`.
    pub fn classify_partial(path: &Path, partial_min_age: Duration) -> std::io::Result<Self> {
        let state = if is_stable(path, partial_min_age) {
            ArtifactState::Partial
        } else {
            ArtifactState::Writing
        };
        Self::from_path(path, state)
    }

    pub fn advance(&mut self, next: ArtifactState) -> Result<(), LifecycleError> {
        if !self.state.can_advance_to(next) {
            return Err(LifecycleError::IllegalTransition {
                path: self.path.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

mod system_time_secs {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde::Serializer;

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        serializer.serialize_u64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(state: ArtifactState) -> Artifact {
        Artifact {
            path: PathBuf::from("/tmp/a.mp4"),
            size: 1,
            modified: SystemTime::now(),
            media: None,
            state,
        }
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut item = artifact(ArtifactState::Writing);
        item.advance(ArtifactState::Partial).unwrap();
        item.advance(ArtifactState::Ready).unwrap();
        item.advance(ArtifactState::Delivered).unwrap();
        let err = item.advance(ArtifactState::Ready).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::IllegalTransition {
                from: ArtifactState::Delivered,
                to: ArtifactState::Ready,
                ..
            }
        ));
    }

    #[test]
    fn quarantine_only_from_partial() {
        assert!(ArtifactState::Partial.can_advance_to(ArtifactState::Quarantined));
        assert!(!ArtifactState::Ready.can_advance_to(ArtifactState::Quarantined));
        assert!(!ArtifactState::Writing.can_advance_to(ArtifactState::Quarantined));
        assert!(!ArtifactState::Writing.can_advance_to(ArtifactState::Ready));
    }

    #[test]
    fn only_ready_is_deliverable() {
        assert!(ArtifactState::Ready.is_deliverable());
        assert!(!ArtifactState::Partial.is_deliverable());
        assert!(!ArtifactState::Writing.is_deliverable());
    }
}
