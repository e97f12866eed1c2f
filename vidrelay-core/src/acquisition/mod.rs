mod error;
mod ytdlp;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::claims::PathClaims;
use crate::config::RelayConfig;
use crate::recovery::RecoveryEngine;

pub use error::{AcquisitionError, AcquisitionResult};
pub use ytdlp::{locator_label, target_for, YtDlpAcquirer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionJob {
    pub id: usize,
    pub locator: String,
    pub target: PathBuf,
    pub partial: PathBuf,
    pub status: JobStatus,
    pub error: Option<String>,
    /// Set when a failed job's partial output was salvaged.
    pub recovered: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AcquisitionJob {
    pub fn new(id: usize, locator: impl Into<String>, target: PathBuf) -> Self {
        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        Self {
            id,
            locator: locator.into(),
            target,
            partial: PathBuf::from(partial),
            status: JobStatus::Queued,
            error: None,
            recovered: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Produces bytes on disk for one job.
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn acquire(&self, job: &AcquisitionJob) -> AcquisitionResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerReport {
    pub counts: StatusCounts,
    pub peak_active: usize,
    pub duplicates_skipped: usize,
    pub cancelled: bool,
    pub jobs: Vec<AcquisitionJob>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    backlog: VecDeque<AcquisitionJob>,
    active: HashMap<usize, AcquisitionJob>,
    finished: Vec<AcquisitionJob>,
    peak_active: usize,
}

impl SchedulerState {
    fn counts(&self) -> StatusCounts {
        let done = self
            .finished
            .iter()
            .filter(|j| j.status == JobStatus::Done)
            .count();
        let counts = StatusCounts {
            queued: self.backlog.len(),
            running: self.active.len(),
            done,
            error: self.finished.len() - done,
            total: 0,
        };
        StatusCounts {
            total: counts.queued + counts.running + self.finished.len(),
            ..counts
        }
    }

    /// Moves the next backlog entry into the active set.
    fn promote(&mut self) -> Option<AcquisitionJob> {
        let mut job = self.backlog.pop_front()?;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        self.active.insert(job.id, job.clone());
        self.peak_active = self.peak_active.max(self.active.len());
        Some(job)
    }
}

/// Keeps at most `max_active` acquisition jobs running until the backlog drains.
pub struct AcquisitionScheduler {
    acquirer: Arc<dyn Acquirer>,
    download_dir: PathBuf,
    status_interval: Duration,
    normalize: Option<u32>,
    recovery: Option<Arc<RecoveryEngine>>,
    claims: PathClaims,
}

impl AcquisitionScheduler {
    pub fn new(acquirer: Arc<dyn Acquirer>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            acquirer,
            download_dir: download_dir.into(),
            status_interval: Duration::from_secs(5),
            normalize: None,
            recovery: None,
            claims: PathClaims::new(),
        }
    }

    pub fn from_config(config: &RelayConfig, download_dir: impl Into<PathBuf>) -> Self {
        let acquirer = Arc::new(YtDlpAcquirer::new(config.acquisition.clone()));
        let mut scheduler = Self::new(acquirer, download_dir).with_status_interval(
            Duration::from_secs(config.acquisition.status_interval_seconds.max(1)),
        );
        if config.acquisition.normalize {
            scheduler.normalize = Some(config.acquisition.min_fps);
        }
        scheduler
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Salvages failed jobs and shares path ownership with `engine`.
    pub fn with_recovery(mut self, engine: Arc<RecoveryEngine>) -> Self {
        self.claims = engine.claims().clone();
        self.recovery = Some(engine);
        self
    }

    pub fn with_normalize(mut self, min_fps: Option<u32>) -> Self {
        self.normalize = min_fps;
        self
    }

    /// Builds one job per distinct locator, in input order.
    pub fn plan_jobs<I, S>(&self, locators: I) -> (Vec<AcquisitionJob>, usize)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut targets = HashSet::new();
        let mut jobs = Vec::new();
        let mut duplicates = 0;
        for locator in locators {
            let locator = locator.as_ref().trim();
            if locator.is_empty() {
                continue;
            }
            if !seen.insert(locator.to_string()) {
                duplicates += 1;
                continue;
            }
            let base = target_for(&self.download_dir, locator, now);
            let mut target = base.clone();
            let mut n = 1;
            while !targets.insert(target.clone()) {
                let stem = base
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                target = base.with_file_name(format!("{stem}_{n}.mp4"));
                n += 1;
            }
            jobs.push(AcquisitionJob::new(jobs.len(), locator, target));
        }
        (jobs, duplicates)
    }

    pub async fn run<I, S>(&self, locators: I, max_active: usize) -> SchedulerReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_until(locators, max_active, CancellationToken::new())
            .await
    }

    pub async fn run_until<I, S>(
        &self,
        locators: I,
        max_active: usize,
        cancel: CancellationToken,
    ) -> SchedulerReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let max_active = max_active.max(1);
        let (jobs, duplicates_skipped) = self.plan_jobs(locators);
        let state = Arc::new(Mutex::new(SchedulerState {
            backlog: jobs.into(),
            ..SchedulerState::default()
        }));
        info!(
            total = lock(&state).backlog.len(),
            max_active,
            duplicates_skipped,
            "acquisition run starting"
        );

        let monitor = self.spawn_monitor(Arc::clone(&state));
        let mut running = JoinSet::new();
        let mut tasks: HashMap<task::Id, usize> = HashMap::new();
        {
            let mut guard = lock(&state);
            while guard.active.len() < max_active {
                let Some(job) = guard.promote() else { break };
                self.spawn_job(&mut running, &mut tasks, job);
            }
        }

        let mut cancelled = false;
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = running.join_next_with_id() => joined,
            };
            let Some(joined) = joined else { break };
            let Some(finished) = settle(&state, &mut tasks, joined) else {
                continue;
            };
            let mut guard = lock(&state);
            guard.finished.push(finished);
            if let Some(job) = guard.promote() {
                self.spawn_job(&mut running, &mut tasks, job);
            }
        }

        if cancelled {
            running.abort_all();
            while let Some(joined) = running.join_next_with_id().await {
                // Jobs that completed before the abort landed keep their result.
                if let Some(finished) = settle(&state, &mut tasks, joined) {
                    lock(&state).finished.push(finished);
                }
            }
            let mut guard = lock(&state);
            let interrupted: Vec<_> = guard.active.drain().map(|(_, job)| job).collect();
            for mut job in interrupted {
                job.status = JobStatus::Error;
                job.error = Some(AcquisitionError::Cancelled.to_string());
                job.finished_at = Some(Utc::now());
                guard.finished.push(job);
            }
            warn!(queued = guard.backlog.len(), "acquisition run cancelled");
        }
        monitor.abort();

        let mut guard = lock(&state);
        let counts = guard.counts();
        let peak_active = guard.peak_active;
        let mut jobs: Vec<_> = guard.finished.drain(..).collect();
        jobs.extend(guard.backlog.drain(..));
        jobs.sort_by_key(|job| job.id);
        info!(
            done = counts.done,
            error = counts.error,
            total = counts.total,
            peak_active,
            "acquisition run finished"
        );
        SchedulerReport {
            counts,
            peak_active,
            duplicates_skipped,
            cancelled,
            jobs,
        }
    }

    fn spawn_job(
        &self,
        running: &mut JoinSet<AcquisitionJob>,
        tasks: &mut HashMap<task::Id, usize>,
        job: AcquisitionJob,
    ) {
        let id = job.id;
        let handle = running.spawn(self.job_future(job));
        tasks.insert(handle.id(), id);
    }

    fn job_future(
        &self,
        job: AcquisitionJob,
    ) -> impl std::future::Future<Output = AcquisitionJob> + Send + 'static {
        let acquirer = Arc::clone(&self.acquirer);
        let recovery = self.recovery.clone();
        let claims = self.claims.clone();
        let normalize = self.normalize;
        async move { execute_job(acquirer, recovery, claims, normalize, job).await }
    }

    fn spawn_monitor(&self, state: Arc<Mutex<SchedulerState>>) -> tokio::task::JoinHandle<()> {
        let period = self.status_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let counts = lock(&state).counts();
                info!(
                    queued = counts.queued,
                    running = counts.running,
                    done = counts.done,
                    error = counts.error,
                    total = counts.total,
                    "acquisition status"
                );
            }
        })
    }
}

async fn execute_job(
    acquirer: Arc<dyn Acquirer>,
    recovery: Option<Arc<RecoveryEngine>>,
    claims: PathClaims,
    normalize: Option<u32>,
    mut job: AcquisitionJob,
) -> AcquisitionJob {
    let claim = claims.try_claim(&job.partial);
    let result = acquirer.acquire(&job).await;
    drop(claim);
    job.finished_at = Some(Utc::now());

    match result {
        Ok(()) => {
            job.status = JobStatus::Done;
            info!(job = job.id, target = %job.target.display(), "acquisition done");
            if let (Some(engine), Some(min_fps)) = (recovery.as_ref(), normalize) {
                if let Err(err) = engine.normalize_in_place(&job.target, min_fps).await {
                    warn!(job = job.id, error = %err, "normalization failed; keeping original");
                }
            }
        }
        Err(err) => {
            warn!(job = job.id, locator = %job.locator, error = %err, "acquisition failed");
            job.status = JobStatus::Error;
            job.error = Some(err.to_string());
            if let Some(engine) = recovery.as_ref() {
                if job.partial.exists() {
                    match engine.finalize(&job.partial).await {
                        Ok(path) => {
                            info!(job = job.id, output = %path.display(), "salvaged partial output");
                            job.status = JobStatus::Done;
                            job.recovered = Some(path);
                        }
                        Err(err) => {
                            warn!(job = job.id, error = %err, "partial output not salvaged")
                        }
                    }
                }
            }
        }
    }
    job
}

/// Takes a joined task out of the active set. A task that panicked is
/// turned into an errored job so its slot is still handed on; a task
/// aborted by cancellation is left active for the caller to mark.
fn settle(
    state: &Mutex<SchedulerState>,
    tasks: &mut HashMap<task::Id, usize>,
    joined: Result<(task::Id, AcquisitionJob), JoinError>,
) -> Option<AcquisitionJob> {
    match joined {
        Ok((task_id, job)) => {
            tasks.remove(&task_id);
            lock(state).active.remove(&job.id);
            Some(job)
        }
        Err(err) => {
            let job_id = tasks.remove(&err.id())?;
            if err.is_cancelled() {
                return None;
            }
            warn!(job = job_id, error = %err, "acquisition task aborted");
            let mut job = lock(state).active.remove(&job_id)?;
            job.status = JobStatus::Error;
            job.error = Some(AcquisitionError::Aborted(err.to_string()).to_string());
            job.finished_at = Some(Utc::now());
            Some(job)
        }
    }
}

fn lock(state: &Mutex<SchedulerState>) -> std::sync::MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
