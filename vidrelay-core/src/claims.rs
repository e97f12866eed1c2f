use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::fsutil::canonical_or_self;

/// Registry of paths currently owned by one component.
#[derive(Debug, Clone, Default)]
pub struct PathClaims {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `path`, or returns `None` when someone else already holds it.
    pub fn try_claim(&self, path: &Path) -> Option<ClaimGuard> {
        let key = claim_key(path);
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.insert(key.clone()) {
            return None;
        }
        Some(ClaimGuard {
            claims: self.clone(),
            path: key,
        })
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&claim_key(path))
    }

    fn release(&self, path: &Path) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }
}

// Relative and absolute spellings of one file must collide. The file itself
// may not exist yet, so only the parent is resolved.
fn claim_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            canonical_or_self(parent).join(name)
        }
        (_, Some(name)) => canonical_or_self(Path::new(".")).join(name),
        _ => path.to_path_buf(),
    }
}

#[derive(Debug)]
pub struct ClaimGuard {
    claims: PathClaims,
    path: PathBuf,
}

impl ClaimGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.release(&self.path);
    }
}
