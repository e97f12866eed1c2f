use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::error::{TransportError, TransportResult};
use super::transport::{Transport, UploadRequest};
use crate::config::HighCapacitySection;
use crate::fsutil::human_size;
use crate::media::{describe, stderr_tail, CommandExecutor, SystemCommandExecutor, ToolError};

/// Session-based upload through an external client tool.
#[derive(Clone)]
pub struct CommandUploadTransport {
    config: HighCapacitySection,
    program: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for CommandUploadTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandUploadTransport")
            .field("program", &self.program)
            .finish()
    }
}

impl CommandUploadTransport {
    pub fn new(config: HighCapacitySection) -> Self {
        Self {
            program: PathBuf::from(&config.program),
            config,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.config.ceiling_bytes()
    }

    fn expand_arg(&self, arg: &str, request: &UploadRequest) -> String {
        let input = request.path.to_string_lossy();
        let stem = request
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let hint = |value: Option<String>| value.unwrap_or_default();
        arg.replace("{input}", &input)
            .replace("{caption}", &request.caption)
            .replace("{chat}", &self.config.chat)
            .replace("{width}", &hint(request.media.width.map(|w| w.to_string())))
            .replace("{height}", &hint(request.media.height.map(|h| h.to_string())))
            .replace(
                "{duration}",
                &hint(request.media.duration.map(|d| (d.round() as u64).to_string())),
            )
            .replace("{filename}", &request.file_name())
            .replace("{stem}", &stem)
    }

    pub fn build_args(&self, request: &UploadRequest) -> Vec<String> {
        let mut args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| self.expand_arg(arg, request))
            .collect();
        if !self.config.args.iter().any(|a| a.contains("{input}")) {
            args.push(request.path.to_string_lossy().to_string());
        }
        args
    }
}

#[async_trait]
impl Transport for CommandUploadTransport {
    fn name(&self) -> &'static str {
        "high-capacity"
    }

    async fn upload(&self, request: &UploadRequest) -> TransportResult<()> {
        let ceiling = self.ceiling_bytes();
        if request.size > ceiling {
            return Err(TransportError::TooLarge {
                message: format!(
                    "{} exceeds the {} account ceiling",
                    human_size(request.size),
                    human_size(ceiling)
                ),
            });
        }
        let args = self.build_args(request);
        debug!(command = %describe(&self.program, &args), "high-capacity upload starting");
        let output = self
            .executor
            .run(&self.program, &args)
            .await
            .map_err(|source| ToolError::Io {
                program: self.program.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            let stderr = stderr_tail(&output, 300);
            let lowered = stderr.to_lowercase();
            if lowered.contains("too large") || lowered.contains("too big") {
                return Err(TransportError::TooLarge { message: stderr });
            }
            return Err(TransportError::Rejected {
                status: output.status.code().map(|c| c as u16),
                message: stderr,
            });
        }
        info!(file = %request.file_name(), "high-capacity upload confirmed");
        Ok(())
    }
}
