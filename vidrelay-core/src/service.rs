use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::delivery::{DeliveryError, DeliveryReport, DeliveryRouter, TransportError};
use crate::error::ConfigError;
use crate::media::CommandExecutor;
use crate::recovery::{quarantine_file, QuarantineRecord, RecoveryEngine, SweepReport};
use crate::scanner::ReadinessScanner;

pub const UNDELIVERABLE_DIR: &str = "undeliverable";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub sweep: SweepReport,
    pub ready: usize,
    pub deliveries: Vec<DeliveryReport>,
    pub dead_lettered: Vec<QuarantineRecord>,
    /// Set when shutdown was requested before every ready artifact was handled.
    pub interrupted: bool,
}

impl PassReport {
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|d| d.delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries.len() - self.delivered()
    }
}

/// Periodic recover, scan and deliver loop over the watched directory.
pub struct RelayService {
    config: RelayConfig,
    root: PathBuf,
    scanner: ReadinessScanner,
    recovery: Arc<RecoveryEngine>,
    router: DeliveryRouter,
    failed_passes: Mutex<HashMap<PathBuf, u32>>,
}

impl RelayService {
    pub fn new(
        config: RelayConfig,
        root: PathBuf,
        recovery: Arc<RecoveryEngine>,
        router: DeliveryRouter,
    ) -> Self {
        let router = router.with_claims(recovery.claims().clone());
        Self {
            scanner: ReadinessScanner::new(&config),
            config,
            root,
            recovery,
            router,
            failed_passes: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: RelayConfig,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> ServiceResult<Self> {
        let root = config
            .paths
            .resolve_watch_root()
            .map_err(|source| ServiceError::Io {
                source,
                path: PathBuf::from(&config.paths.watch_dir),
            })?;
        let mut engine = RecoveryEngine::new(&config);
        if let Some(executor) = executor.clone() {
            engine = engine.with_executor(executor);
        }
        let router = DeliveryRouter::from_config(&config, executor)?;
        Ok(Self::new(config, root, Arc::new(engine), router))
    }

    pub async fn run_once(&self) -> PassReport {
        self.pass(&CancellationToken::new()).await
    }

    /// Runs passes until `cancel` fires, then one last recovery sweep.
    pub async fn run(&self, cancel: CancellationToken) -> SweepReport {
        let interval = self.config.scan.poll_interval();
        info!(root = %self.root.display(), interval_secs = interval.as_secs(), "relay loop started");
        while !cancel.is_cancelled() {
            let report = self.pass(&cancel).await;
            if !report.deliveries.is_empty() || !report.sweep.is_empty() {
                info!(
                    pass = %report.pass_id,
                    ready = report.ready,
                    delivered = report.delivered(),
                    failed = report.failed(),
                    recovered = report.sweep.recovered.len(),
                    quarantined = report.sweep.quarantined.len(),
                    "pass finished"
                );
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("shutdown requested; running final recovery sweep");
        self.recovery.sweep(&self.root).await
    }

    async fn pass(&self, cancel: &CancellationToken) -> PassReport {
        let started_at = Utc::now();
        let sweep = self.recovery.sweep(&self.root).await;
        let ready = self.scanner.scan(&self.root);
        let mut report = PassReport {
            pass_id: Uuid::new_v4(),
            started_at,
            sweep,
            ready: ready.len(),
            deliveries: Vec::new(),
            dead_lettered: Vec::new(),
            interrupted: false,
        };

        for mut artifact in ready {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            match self.router.send(&mut artifact).await {
                Ok(delivery) => {
                    if delivery.delivered() {
                        self.clear_failures(&artifact.path);
                    } else if let Some(record) = self.note_failure(&artifact.path) {
                        report.dead_lettered.push(record);
                    }
                    report.deliveries.push(delivery);
                }
                Err(DeliveryError::Busy(path)) => {
                    info!(path = %path.display(), "artifact busy; deferring to next pass");
                }
                Err(err) => {
                    error!(path = %artifact.path.display(), error = %err, "delivery aborted");
                }
            }
        }
        self.prune_failures();
        report
    }

    fn clear_failures(&self, path: &Path) {
        self.failed_passes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    /// Counts a failed pass and dead-letters the artifact once the limit is hit.
    fn note_failure(&self, path: &Path) -> Option<QuarantineRecord> {
        let limit = self.config.delivery.max_failed_passes;
        if limit == 0 {
            return None;
        }
        let count = {
            let mut guard = self.failed_passes.lock().unwrap_or_else(|e| e.into_inner());
            let count = guard.entry(path.to_path_buf()).or_insert(0);
            *count += 1;
            *count
        };
        if count < limit {
            return None;
        }
        self.clear_failures(path);
        self.router.forget(path);
        let dir = Path::new(&self.config.paths.quarantine_dir).join(UNDELIVERABLE_DIR);
        match quarantine_file(
            path,
            &dir,
            "delivery failed",
            vec![format!("{count} consecutive failed passes")],
        ) {
            Ok(record) => {
                warn!(
                    path = %path.display(),
                    destination = %record.quarantined_path.display(),
                    passes = count,
                    "artifact moved to undeliverable"
                );
                Some(record)
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to dead-letter artifact");
                None
            }
        }
    }

    fn prune_failures(&self) {
        self.failed_passes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|path, _| path.exists());
    }
}
