mod bot;
mod caption;
mod command_upload;
mod error;
mod route;
mod segment;
mod transport;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artifact::{Artifact, ArtifactState};
use crate::claims::PathClaims;
use crate::config::{DeliverySection, RelayConfig};
use crate::fsutil::{human_size, non_empty_file, remove_if_exists};
use crate::media::{CommandExecutor, MediaInfo, MediaToolkit};

pub use bot::{classify_response, BotApiTransport};
pub use caption::{part_caption, render_caption};
pub use command_upload::CommandUploadTransport;
pub use error::{DeliveryError, DeliveryResult, TransportError, TransportResult};
pub use route::{DeliveryTier, RoutePolicy, RouteSignal, RouteState};
pub use segment::{segment_path, segment_siblings, Segment, SegmentPlan};
pub use transport::{Transport, UploadRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Worth trying again on a later pass.
    Retryable,
    /// This tier will never carry the payload as it is.
    Fatal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryAttempt {
    pub tier: DeliveryTier,
    pub outcome: AttemptOutcome,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub path: PathBuf,
    pub size: u64,
    pub attempts: Vec<DeliveryAttempt>,
    pub delivered_via: Option<DeliveryTier>,
    pub removed: bool,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.delivered_via.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    path: PathBuf,
    size: u64,
    modified: u64,
}

impl LedgerKey {
    fn for_artifact(artifact: &Artifact) -> Self {
        Self {
            path: artifact.path.clone(),
            size: artifact.size,
            modified: artifact
                .modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }
}

/// Sends one ready artifact at a time through the tier chain.
pub struct DeliveryRouter {
    settings: DeliverySection,
    toolkit: MediaToolkit,
    lightweight: Option<Arc<dyn Transport>>,
    high_capacity: Option<Arc<dyn Transport>>,
    claims: PathClaims,
    /// Parts already delivered for segmented artifacts, for resuming.
    ledger: Mutex<HashMap<LedgerKey, usize>>,
}

impl DeliveryRouter {
    pub fn new(settings: DeliverySection, toolkit: MediaToolkit) -> Self {
        Self {
            settings,
            toolkit,
            lightweight: None,
            high_capacity: None,
            claims: PathClaims::new(),
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Router with the transports enabled in `config`.
    pub fn from_config(
        config: &RelayConfig,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> TransportResult<Self> {
        let toolkit = MediaToolkit::new(config.recovery.clone(), executor.clone());
        let mut router = Self::new(config.delivery.clone(), toolkit);
        if config.delivery.lightweight.enabled {
            let bot = BotApiTransport::new(config.delivery.lightweight.clone())?;
            router = router.with_lightweight(Arc::new(bot));
        }
        if config.delivery.high_capacity.enabled {
            let mut upload = CommandUploadTransport::new(config.delivery.high_capacity.clone());
            if let Some(executor) = executor {
                upload = upload.with_executor(executor);
            }
            router = router.with_high_capacity(Arc::new(upload));
        }
        Ok(router)
    }

    pub fn with_lightweight(mut self, transport: Arc<dyn Transport>) -> Self {
        self.lightweight = Some(transport);
        self
    }

    pub fn with_high_capacity(mut self, transport: Arc<dyn Transport>) -> Self {
        self.high_capacity = Some(transport);
        self
    }

    pub fn with_claims(mut self, claims: PathClaims) -> Self {
        self.claims = claims;
        self
    }

    pub fn settings(&self) -> &DeliverySection {
        &self.settings
    }

    pub fn policy(&self, size: u64) -> RoutePolicy {
        RoutePolicy {
            size,
            lightweight_limit: self
                .lightweight
                .as_ref()
                .map(|_| self.settings.lightweight.limit_bytes),
            high_capacity_ceiling: self
                .high_capacity
                .as_ref()
                .map(|_| self.settings.high_capacity.ceiling_bytes()),
            segmentation: self.settings.segmentation.enabled,
            fallthrough_on_error: self.settings.fallthrough_on_error,
        }
    }

    pub async fn send(&self, artifact: &mut Artifact) -> DeliveryResult<DeliveryReport> {
        if !artifact.state.is_deliverable() {
            return Err(DeliveryError::NotDeliverable {
                path: artifact.path.clone(),
                state: artifact.state,
            });
        }
        let _claim = self
            .claims
            .try_claim(&artifact.path)
            .ok_or_else(|| DeliveryError::Busy(artifact.path.clone()))?;

        let media = match artifact.media {
            Some(info) => info,
            None => {
                let info = self.toolkit.probe(&artifact.path).await;
                artifact.media = Some(info);
                info
            }
        };
        let caption = render_caption(&self.settings.caption_template, &artifact.path);
        let request = UploadRequest::new(&artifact.path, caption, artifact.size, media);
        let policy = self.policy(artifact.size);

        let mut attempts = Vec::new();
        let mut state = policy.transition(RouteState::Start, None);
        while !state.is_terminal() {
            let signal = match state {
                RouteState::Lightweight => {
                    self.attempt(DeliveryTier::Lightweight, &self.lightweight, &request, &mut attempts)
                        .await
                }
                RouteState::HighCapacity => {
                    self.attempt(
                        DeliveryTier::HighCapacity,
                        &self.high_capacity,
                        &request,
                        &mut attempts,
                    )
                    .await
                }
                RouteState::Segmentation => {
                    self.deliver_segments(artifact, &request, &mut attempts).await
                }
                _ => RouteSignal::Failed,
            };
            state = policy.transition(state, Some(signal));
        }

        let mut report = DeliveryReport {
            path: artifact.path.clone(),
            size: artifact.size,
            attempts,
            delivered_via: None,
            removed: false,
        };
        match state {
            RouteState::Delivered(tier) => {
                artifact.advance(ArtifactState::Delivered)?;
                report.delivered_via = Some(tier);
                info!(
                    path = %artifact.path.display(),
                    size = %human_size(artifact.size),
                    tier = %tier,
                    "artifact delivered"
                );
                if self.settings.delete_after_delivery {
                    match remove_if_exists(&artifact.path) {
                        Ok(()) => {
                            report.removed = true;
                            info!(path = %artifact.path.display(), "delivered artifact removed");
                        }
                        Err(err) => {
                            error!(path = %artifact.path.display(), error = %err, "failed to remove delivered artifact")
                        }
                    }
                }
            }
            _ => {
                if report.attempts.is_empty() {
                    error!(
                        path = %artifact.path.display(),
                        size = %human_size(artifact.size),
                        "no configured transport can carry this artifact"
                    );
                } else {
                    error!(
                        path = %artifact.path.display(),
                        attempts = report.attempts.len(),
                        "delivery failed for this pass"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn attempt(
        &self,
        tier: DeliveryTier,
        transport: &Option<Arc<dyn Transport>>,
        request: &UploadRequest,
        attempts: &mut Vec<DeliveryAttempt>,
    ) -> RouteSignal {
        let Some(transport) = transport else {
            return RouteSignal::Failed;
        };
        let (signal, attempt) = run_upload(tier, transport.as_ref(), request).await;
        attempts.push(attempt);
        signal
    }

    async fn deliver_segments(
        &self,
        artifact: &Artifact,
        request: &UploadRequest,
        attempts: &mut Vec<DeliveryAttempt>,
    ) -> RouteSignal {
        let tier = DeliveryTier::Segmented;
        let Some(transport) = self.high_capacity.as_ref() else {
            return RouteSignal::Failed;
        };
        let Some(duration) = request.media.duration else {
            attempts.push(DeliveryAttempt {
                tier,
                outcome: AttemptOutcome::Fatal,
                detail: "duration unknown; cannot segment".into(),
            });
            return RouteSignal::Failed;
        };
        let target = self
            .settings
            .segmentation
            .target_bytes
            .min(self.settings.high_capacity.ceiling_bytes());
        let Some(plan) = SegmentPlan::compute(
            artifact.size,
            duration,
            target,
            self.settings.segmentation.min_segment_seconds,
        ) else {
            attempts.push(DeliveryAttempt {
                tier,
                outcome: AttemptOutcome::Fatal,
                detail: "no segment plan".into(),
            });
            return RouteSignal::Failed;
        };

        let key = LedgerKey::for_artifact(artifact);
        let total = plan.len();
        let already = self.ledger_get(&key);
        if already > 0 {
            info!(path = %artifact.path.display(), delivered = already, total, "resuming segmented delivery");
        } else {
            // Parts from an earlier version of the file cannot be trusted.
            self.forget(&artifact.path);
        }
        for segment in plan.segments.iter().skip(already) {
            let part = segment_path(&artifact.path, segment.index, total);
            if !non_empty_file(&part) {
                if let Err(err) = self
                    .toolkit
                    .extract_segment(&artifact.path, &part, segment.start, segment.duration)
                    .await
                {
                    warn!(path = %artifact.path.display(), part = segment.index, error = %err, "segment extraction failed");
                    attempts.push(DeliveryAttempt {
                        tier,
                        outcome: AttemptOutcome::Retryable,
                        detail: format!("part {}/{total}: {err}", segment.index),
                    });
                    return RouteSignal::Failed;
                }
            }
            let size = std::fs::metadata(&part).map(|m| m.len()).unwrap_or_default();
            let part_request = UploadRequest::new(
                &part,
                part_caption(&request.caption, segment.index, total),
                size,
                MediaInfo {
                    duration: Some(segment.duration),
                    ..request.media
                },
            );
            let (signal, attempt) = run_upload(tier, transport.as_ref(), &part_request).await;
            attempts.push(attempt);
            if signal != RouteSignal::Succeeded {
                return RouteSignal::Failed;
            }
            self.ledger_set(&key, segment.index);
        }

        self.ledger_remove(&key);
        self.discard_segments(&artifact.path);
        RouteSignal::Succeeded
    }

    fn ledger_get(&self, key: &LedgerKey) -> usize {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn ledger_set(&self, key: &LedgerKey, delivered: usize) {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), delivered);
    }

    fn ledger_remove(&self, key: &LedgerKey) {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Forgets progress recorded for `path` and deletes its part files.
    pub fn forget(&self, path: &Path) {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|key, _| key.path != path);
        self.discard_segments(path);
    }

    /// Removes every part file cut from `path`; returns how many went.
    pub fn discard_segments(&self, path: &Path) -> usize {
        let mut removed = 0;
        for part in segment_siblings(path) {
            match remove_if_exists(&part) {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(path = %part.display(), error = %err, "failed to remove segment file")
                }
            }
        }
        if removed > 0 {
            debug!(path = %path.display(), removed, "segment files discarded");
        }
        removed
    }
}

async fn run_upload(
    tier: DeliveryTier,
    transport: &dyn Transport,
    request: &UploadRequest,
) -> (RouteSignal, DeliveryAttempt) {
    match transport.upload(request).await {
        Ok(()) => (
            RouteSignal::Succeeded,
            DeliveryAttempt {
                tier,
                outcome: AttemptOutcome::Success,
                detail: format!("{} accepted {}", transport.name(), request.file_name()),
            },
        ),
        Err(err @ TransportError::TooLarge { .. }) => {
            debug!(file = %request.file_name(), tier = %tier, error = %err, "payload too large for tier");
            (
                RouteSignal::TooLarge,
                DeliveryAttempt {
                    tier,
                    outcome: AttemptOutcome::Fatal,
                    detail: err.to_string(),
                },
            )
        }
        Err(err) => {
            error!(file = %request.file_name(), tier = %tier, error = %err, "upload failed");
            let outcome = match &err {
                TransportError::Rejected {
                    status: Some(status),
                    ..
                } if (400..500).contains(status) && *status != 429 => AttemptOutcome::Fatal,
                _ => AttemptOutcome::Retryable,
            };
            (
                RouteSignal::Failed,
                DeliveryAttempt {
                    tier,
                    outcome,
                    detail: err.to_string(),
                },
            )
        }
    }
}
