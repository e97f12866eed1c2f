use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use super::error::{AcquisitionError, AcquisitionResult};
use super::{AcquisitionJob, Acquirer};
use crate::config::AcquisitionSection;
use crate::fsutil::safe_name;

const STDERR_TAIL_CHARS: usize = 400;

/// Label used for the per-source folder and file name.
pub fn locator_label(locator: &str) -> String {
    let label = Url::parse(locator.trim())
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.find(|s| !s.is_empty()).map(str::to_string))
                .or_else(|| url.host_str().map(str::to_string))
        })
        .unwrap_or_default();
    let label = safe_name(&label);
    if label.is_empty() {
        "unknown".to_string()
    } else {
        label
    }
}

/// `<dir>/<label>/<stamp>_<label>.mp4`
pub fn target_for(download_dir: &Path, locator: &str, now: DateTime<Utc>) -> PathBuf {
    let label = locator_label(locator);
    let stamp = now.format("%Y%m%d-%H%M%S");
    download_dir
        .join(&label)
        .join(format!("{stamp}_{label}.mp4"))
}

/// Runs yt-dlp for one locator.
#[derive(Debug, Clone)]
pub struct YtDlpAcquirer {
    program: PathBuf,
    settings: AcquisitionSection,
}

impl YtDlpAcquirer {
    pub fn new(settings: AcquisitionSection) -> Self {
        Self {
            program: PathBuf::from(&settings.program),
            settings,
        }
    }

    pub fn build_args(&self, job: &AcquisitionJob) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            "--no-color".to_string(),
            "--newline".to_string(),
            "--retries".to_string(),
            s.retries.to_string(),
            "--fragment-retries".to_string(),
            s.fragment_retries.to_string(),
            "--concurrent-fragments".to_string(),
            s.concurrent_fragments.to_string(),
        ];
        if !s.downloader.is_empty() {
            args.push("--downloader".to_string());
            args.push(s.downloader.clone());
        }
        args.extend(s.extra_args.iter().cloned());
        args.push("-o".to_string());
        args.push(job.target.to_string_lossy().to_string());
        args.push(job.locator.clone());
        args
    }
}

#[async_trait]
impl Acquirer for YtDlpAcquirer {
    async fn acquire(&self, job: &AcquisitionJob) -> AcquisitionResult<()> {
        if let Some(parent) = job.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| AcquisitionError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        let args = self.build_args(job);
        info!(job = job.id, locator = %job.locator, "starting acquisition");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AcquisitionError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer).await;
                buffer
            })
        });
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = job.id, "{line}");
            }
        }
        let status = child.wait().await.map_err(|source| AcquisitionError::Io {
            source,
            path: job.target.clone(),
        })?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        info!(job = job.id, status = ?status.code(), "acquisition tool exited");

        if !status.success() {
            let text = String::from_utf8_lossy(&stderr);
            let text = text.trim();
            let count = text.chars().count();
            let detail: String = text
                .chars()
                .skip(count.saturating_sub(STDERR_TAIL_CHARS))
                .collect();
            return Err(AcquisitionError::Failed {
                status: status.code(),
                detail,
            });
        }
        if !job.target.exists() {
            return Err(AcquisitionError::MissingOutput(job.target.clone()));
        }
        Ok(())
    }
}
