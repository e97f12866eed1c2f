mod cascade;
mod error;
mod quarantine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::artifact::{Artifact, ArtifactState};
use crate::claims::PathClaims;
use crate::config::{RelayConfig, ScanSection};
use crate::fsutil::{
    canonical_or_self, human_size, is_internal_temp, remove_if_exists, unique_path, TEMP_MARKER,
};
use crate::media::{
    fit_within_box, CommandExecutor, MediaToolkit, ReencodeTarget, ToolError, TranscodeMode,
};

pub use cascade::{CascadeState, RecoveryTier, TierOutcome};
pub use error::{RecoveryError, RecoveryResult};
pub use quarantine::{is_sidecar, quarantine_file, sha256_file, sidecar_path, QuarantineRecord};

#[derive(Debug, Clone, Serialize)]
pub struct RecoveredArtifact {
    pub source: PathBuf,
    pub artifact: Artifact,
    pub tier: RecoveryTier,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub recovered: Vec<RecoveredArtifact>,
    pub quarantined: Vec<QuarantineRecord>,
    /// Partials still being written or owned by another component.
    pub skipped: usize,
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.recovered.is_empty()
            && self.quarantined.is_empty()
            && self.failed.is_empty()
            && self.skipped == 0
    }
}

/// Turns partial downloads into playable files, cheapest strategy first.
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    toolkit: MediaToolkit,
    scan: ScanSection,
    quarantine_dir: PathBuf,
    claims: PathClaims,
}

impl RecoveryEngine {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            toolkit: MediaToolkit::new(config.recovery.clone(), None),
            scan: config.scan.clone(),
            quarantine_dir: PathBuf::from(&config.paths.quarantine_dir),
            claims: PathClaims::new(),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.toolkit = MediaToolkit::new(self.toolkit.settings().clone(), Some(executor));
        self
    }

    pub fn with_claims(mut self, claims: PathClaims) -> Self {
        self.claims = claims;
        self
    }

    pub fn claims(&self) -> &PathClaims {
        &self.claims
    }

    pub fn toolkit(&self) -> &MediaToolkit {
        &self.toolkit
    }

    pub fn is_partial(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| n.to_string_lossy().ends_with(&self.scan.partial_suffix))
            .unwrap_or(false)
    }

    /// Name the recovered file should take, before collision handling.
    pub fn final_path_for(&self, partial: &Path) -> PathBuf {
        let name = partial
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stripped = name
            .strip_suffix(self.scan.partial_suffix.as_str())
            .unwrap_or(&name);
        let target_ext = &self.toolkit.settings().target_extension;
        let candidate = Path::new(stripped);
        let known = candidate
            .extension()
            .map(|ext| {
                let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
                self.scan.normalized_extensions().contains(&ext)
                    || ext.trim_start_matches('.') == target_ext
            })
            .unwrap_or(false);
        let file_name = if known {
            candidate
                .with_extension(target_ext)
                .to_string_lossy()
                .to_string()
        } else {
            format!("{stripped}.{target_ext}")
        };
        partial.with_file_name(file_name)
    }

    pub async fn finalize(&self, partial: &Path) -> RecoveryResult<PathBuf> {
        self.recover(partial)
            .await
            .map(|recovered| recovered.artifact.path)
    }

    /// Runs the cascade for one partial. The source is removed only after a
    /// tier produced a non-empty file that now sits at its final name.
    pub async fn recover(&self, partial: &Path) -> RecoveryResult<RecoveredArtifact> {
        let _claim = self
            .claims
            .try_claim(partial)
            .ok_or_else(|| RecoveryError::Busy(partial.to_path_buf()))?;
        let mut artifact = Artifact::from_path(partial, ArtifactState::Partial).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RecoveryError::Vanished(partial.to_path_buf())
            } else {
                RecoveryError::io(err, partial)
            }
        })?;
        info!(
            path = %partial.display(),
            size = %human_size(artifact.size),
            "recovering partial artifact"
        );

        let target = unique_path(&self.final_path_for(partial));
        let mut failures = Vec::new();
        let mut state = CascadeState::start();
        while let CascadeState::Attempting(tier) = state {
            let temp = temp_output(&target, tier.as_str());
            remove_if_exists(&temp).map_err(|err| RecoveryError::io(err, &temp))?;
            let mode = self.mode_for(tier, partial).await;
            let outcome = match self.toolkit.transcode(partial, &temp, &mode).await {
                Ok(()) => TierOutcome::Succeeded,
                Err(err @ ToolError::Io { .. }) => return Err(err.into()),
                Err(err) => {
                    debug!(path = %partial.display(), tier = %tier, error = %err, "recovery tier failed");
                    failures.push(format!("{tier}: {err}"));
                    TierOutcome::Failed
                }
            };
            state = state.transition(outcome);
        }

        match state {
            CascadeState::Recovered(tier) => {
                let temp = temp_output(&target, tier.as_str());
                let output = unique_path(&target);
                if let Err(err) = std::fs::rename(&temp, &output) {
                    let _ = remove_if_exists(&temp);
                    return Err(RecoveryError::io(err, &output));
                }
                remove_if_exists(partial).map_err(|err| RecoveryError::io(err, partial))?;
                artifact.advance(ArtifactState::Ready)?;
                let ready = Artifact::from_path(&output, ArtifactState::Ready)
                    .map_err(|err| RecoveryError::io(err, &output))?;
                info!(
                    source = %partial.display(),
                    output = %output.display(),
                    tier = %tier,
                    "partial artifact recovered"
                );
                Ok(RecoveredArtifact {
                    source: partial.to_path_buf(),
                    artifact: ready,
                    tier,
                })
            }
            _ => {
                artifact.advance(ArtifactState::Quarantined)?;
                let record = quarantine_file(
                    partial,
                    &self.quarantine_dir,
                    "recovery exhausted",
                    failures.clone(),
                )?;
                warn!(
                    source = %partial.display(),
                    destination = %record.quarantined_path.display(),
                    "recovery exhausted; artifact quarantined"
                );
                Err(RecoveryError::Quarantined {
                    source_path: partial.to_path_buf(),
                    destination: record.quarantined_path,
                    failures,
                })
            }
        }
    }

    /// Stable, unclaimed partials under `root`, oldest first.
    pub fn find_partials(&self, root: &Path) -> (Vec<Artifact>, usize) {
        let mut ready = Vec::new();
        let mut waiting = 0;
        let holding = canonical_or_self(&self.quarantine_dir);
        for entry in WalkDir::new(canonical_or_self(root))
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && e.path().starts_with(&holding)))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !self.is_partial(path) || is_internal_temp(path) {
                continue;
            }
            if self.claims.is_claimed(path) {
                waiting += 1;
                continue;
            }
            match Artifact::classify_partial(path, self.scan.partial_stable_age()) {
                Ok(artifact) if artifact.state == ArtifactState::Partial => ready.push(artifact),
                Ok(_) => waiting += 1,
                Err(_) => continue,
            }
        }
        ready.sort_by_key(|artifact| artifact.modified);
        (ready, waiting)
    }

    pub async fn sweep(&self, root: &Path) -> SweepReport {
        let (partials, waiting) = self.find_partials(root);
        let mut report = SweepReport {
            skipped: waiting,
            ..SweepReport::default()
        };
        for artifact in partials {
            match self.recover(&artifact.path).await {
                Ok(recovered) => report.recovered.push(recovered),
                Err(RecoveryError::Busy(_)) | Err(RecoveryError::Vanished(_)) => {
                    report.skipped += 1
                }
                Err(RecoveryError::Quarantined { destination, .. }) => {
                    match std::fs::read(sidecar_path(&destination))
                        .ok()
                        .and_then(|raw| serde_json::from_slice(&raw).ok())
                    {
                        Some(record) => report.quarantined.push(record),
                        None => report
                            .failed
                            .push(format!("{}: quarantined", artifact.path.display())),
                    }
                }
                Err(err) => {
                    warn!(path = %artifact.path.display(), error = %err, "recovery failed");
                    report
                        .failed
                        .push(format!("{}: {err}", artifact.path.display()));
                }
            }
        }
        if !report.is_empty() {
            info!(
                recovered = report.recovered.len(),
                quarantined = report.quarantined.len(),
                skipped = report.skipped,
                failed = report.failed.len(),
                "recovery sweep finished"
            );
        }
        report
    }

    /// Re-encodes a finished file to h264/aac in place.
    pub async fn normalize_in_place(&self, path: &Path, min_fps: u32) -> RecoveryResult<()> {
        let _claim = self
            .claims
            .try_claim(path)
            .ok_or_else(|| RecoveryError::Busy(path.to_path_buf()))?;
        let temp = temp_output(path, "normalize");
        self.toolkit
            .transcode(path, &temp, &TranscodeMode::Normalize { min_fps })
            .await?;
        if let Err(err) = std::fs::rename(&temp, path) {
            let _ = remove_if_exists(&temp);
            return Err(RecoveryError::io(err, path));
        }
        info!(path = %path.display(), min_fps, "artifact normalized");
        Ok(())
    }

    async fn mode_for(&self, tier: RecoveryTier, partial: &Path) -> TranscodeMode {
        match tier {
            RecoveryTier::CopyRemux => TranscodeMode::CopyRemux,
            RecoveryTier::AudioRepair => TranscodeMode::AudioRepair,
            RecoveryTier::FullReencode => {
                let settings = self.toolkit.settings();
                let info = self.toolkit.probe(partial).await;
                let target = match info.dimensions() {
                    Some((width, height)) => {
                        let (width, height) =
                            fit_within_box(width, height, settings.box_width, settings.box_height);
                        ReencodeTarget::Exact { width, height }
                    }
                    None => ReencodeTarget::FitBox {
                        max_width: settings.box_width,
                        max_height: settings.box_height,
                    },
                };
                TranscodeMode::FullReencode(target)
            }
        }
    }
}

fn temp_output(target: &Path, label: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = target
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".into());
    target.with_file_name(format!("{stem}{TEMP_MARKER}.{label}.{ext}"))
}
