use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use walkdir::WalkDir;

use crate::artifact::{Artifact, ArtifactState};
use crate::config::RelayConfig;
use crate::fsutil::{canonical_or_self, is_internal_temp};
use crate::recovery::is_sidecar;
use crate::stability::is_stable;

/// Finds finished artifacts that are eligible for delivery.
#[derive(Debug, Clone)]
pub struct ReadinessScanner {
    extensions: Vec<String>,
    partial_suffix: String,
    min_age: Duration,
    min_size: u64,
    max_size: Option<u64>,
    excluded: Vec<PathBuf>,
}

impl ReadinessScanner {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            extensions: config.scan.normalized_extensions(),
            partial_suffix: config.scan.partial_suffix.clone(),
            min_age: config.scan.stable_age(),
            min_size: config.scan.min_size_bytes,
            max_size: config.scan.max_size(),
            excluded: vec![PathBuf::from(&config.paths.quarantine_dir)],
        }
    }

    pub fn scan(&self, root: &Path) -> Vec<Artifact> {
        let excluded: Vec<PathBuf> = self.excluded.iter().map(|d| canonical_or_self(d)).collect();
        let walker = WalkDir::new(canonical_or_self(root))
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && excluded.iter().any(|dir| entry.path().starts_with(dir)))
            });

        let mut ready = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !self.accepts_name(path) {
                continue;
            }
            // Vanished or unreadable entries are picked up again next cycle.
            let Ok(artifact) = Artifact::from_path(path, ArtifactState::Ready) else {
                continue;
            };
            if artifact.size < self.min_size {
                continue;
            }
            if !is_stable(path, self.min_age) {
                continue;
            }
            if self.max_size.is_some_and(|max| artifact.size > max) {
                debug!(path = %path.display(), size = artifact.size, "over size ceiling; not in scope");
                continue;
            }
            ready.push(artifact);
        }
        ready.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        ready
    }

    fn accepts_name(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_lowercase(),
            None => return false,
        };
        if name.ends_with(&self.partial_suffix) || is_internal_temp(path) || is_sidecar(path) {
            return false;
        }
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }
}

/// One-shot form of [`ReadinessScanner::scan`].
pub fn scan(
    root: &Path,
    extensions: &[String],
    min_age: Duration,
    min_size: u64,
    max_size: Option<u64>,
) -> Vec<Artifact> {
    ReadinessScanner {
        extensions: crate::config::normalize_extensions(extensions.iter().map(String::as_str)),
        partial_suffix: ".part".into(),
        min_age,
        min_size,
        max_size,
        excluded: Vec::new(),
    }
    .scan(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::SystemTime;

    fn write_aged(path: &Path, bytes: usize, age: Duration) {
        std::fs::write(path, vec![0u8; bytes]).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn exts() -> Vec<String> {
        vec![".mp4".into(), ".mkv".into()]
    }

    #[test]
    fn excludes_partials_temps_and_foreign_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let old = Duration::from_secs(120);
        write_aged(&dir.path().join("a.mp4"), 10, old);
        write_aged(&dir.path().join("b.mp4.part"), 10, old);
        write_aged(&dir.path().join("c.__vidrelay_tmp__.copy-remux.mp4"), 10, old);
        write_aged(&dir.path().join("d.txt"), 10, old);

        let found = scan(dir.path(), &exts(), Duration::from_secs(20), 1, None);
        let names: Vec<_> = found.iter().map(|a| a.file_name()).collect();
        assert_eq!(names, vec!["a.mp4"]);
    }

    #[test]
    fn size_and_age_filters_apply() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(&dir.path().join("tiny.mp4"), 2, Duration::from_secs(120));
        write_aged(&dir.path().join("young.mp4"), 100, Duration::from_secs(5));
        write_aged(&dir.path().join("huge.mkv"), 5000, Duration::from_secs(120));
        write_aged(&dir.path().join("fine.mkv"), 100, Duration::from_secs(120));

        let found = scan(dir.path(), &exts(), Duration::from_secs(20), 10, Some(1000));
        let names: Vec<_> = found.iter().map(|a| a.file_name()).collect();
        assert_eq!(names, vec!["fine.mkv"]);
    }

    #[test]
    fn oldest_first_across_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("user").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        write_aged(&dir.path().join("new.mp4"), 10, Duration::from_secs(30));
        write_aged(&nested.join("oldest.mp4"), 10, Duration::from_secs(900));
        write_aged(&dir.path().join("user").join("mid.MP4"), 10, Duration::from_secs(300));

        let found = scan(dir.path(), &exts(), Duration::from_secs(20), 1, None);
        let names: Vec<_> = found.iter().map(|a| a.file_name()).collect();
        assert_eq!(names, vec!["oldest.mp4", "mid.MP4", "new.mp4"]);
        assert!(found.iter().all(|a| a.state == ArtifactState::Ready));
    }
}
