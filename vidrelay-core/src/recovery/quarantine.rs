use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{RecoveryError, RecoveryResult};
use crate::fsutil::{move_file, unique_path};

const SIDECAR_SUFFIX: &str = ".quarantine.json";

/// Sidecar written next to every quarantined file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuarantineRecord {
    pub original_path: PathBuf,
    pub quarantined_path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
    pub reason: String,
    pub failures: Vec<String>,
    pub quarantined_at: DateTime<Utc>,
}

pub fn sidecar_path(quarantined: &Path) -> PathBuf {
    let name = quarantined
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    quarantined.with_file_name(format!("{name}{SIDECAR_SUFFIX}"))
}

pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(SIDECAR_SUFFIX))
        .unwrap_or(false)
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Moves `source` into `dir` untouched and records why.
pub fn quarantine_file(
    source: &Path,
    dir: &Path,
    reason: &str,
    failures: Vec<String>,
) -> RecoveryResult<QuarantineRecord> {
    let metadata = std::fs::metadata(source).map_err(|err| RecoveryError::io(err, source))?;
    let sha256 = sha256_file(source).map_err(|err| RecoveryError::io(err, source))?;
    std::fs::create_dir_all(dir).map_err(|err| RecoveryError::io(err, dir))?;
    let file_name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "artifact".into());
    let destination = unique_path(&dir.join(file_name));
    move_file(source, &destination).map_err(|err| RecoveryError::io(err, &destination))?;

    let record = QuarantineRecord {
        original_path: source.to_path_buf(),
        quarantined_path: destination.clone(),
        size_bytes: metadata.len(),
        sha256,
        reason: reason.to_string(),
        failures,
        quarantined_at: Utc::now(),
    };
    let sidecar = sidecar_path(&destination);
    std::fs::write(&sidecar, serde_json::to_vec_pretty(&record)?)
        .map_err(|err| RecoveryError::io(err, &sidecar))?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarantine_moves_file_and_writes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.mp4.part");
        std::fs::write(&source, b"abc").unwrap();
        let holding = dir.path().join("quarantine");

        let record = quarantine_file(&source, &holding, "recovery exhausted", vec!["x".into()])
            .unwrap();
        assert!(!source.exists());
        assert_eq!(std::fs::read(&record.quarantined_path).unwrap(), b"abc");
        assert_eq!(
            record.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let raw = std::fs::read(sidecar_path(&record.quarantined_path)).unwrap();
        let parsed: QuarantineRecord = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, record);
        assert!(is_sidecar(&sidecar_path(&record.quarantined_path)));
    }

    #[test]
    fn quarantine_never_overwrites_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let holding = dir.path().join("q");
        for body in [b"one".as_slice(), b"two".as_slice()] {
            let source = dir.path().join("clip.mp4");
            std::fs::write(&source, body).unwrap();
            quarantine_file(&source, &holding, "test", Vec::new()).unwrap();
        }
        let media = std::fs::read_dir(&holding)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| !is_sidecar(&e.path()))
            .count();
        assert_eq!(media, 2);
    }
}
