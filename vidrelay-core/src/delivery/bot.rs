use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::error::{TransportError, TransportResult};
use super::transport::{Transport, UploadRequest};
use crate::config::{LightweightSection, UploadMethod};
use crate::fsutil::human_size;

const PAYLOAD_TOO_LARGE: u16 = 413;
const MESSAGE_LIMIT: usize = 300;
const PROGRESS_STEP: f64 = 10.0;

/// Counts streamed bytes and reports each further 10% of the file.
#[derive(Debug)]
struct UploadProgress {
    total: u64,
    sent: u64,
    next_report: f64,
}

impl UploadProgress {
    fn new(total: u64) -> Self {
        Self {
            total,
            sent: 0,
            next_report: PROGRESS_STEP,
        }
    }

    fn advance(&mut self, bytes: usize) -> Option<f64> {
        self.sent += bytes as u64;
        if self.total == 0 {
            return None;
        }
        let percent = (self.sent as f64 * 100.0 / self.total as f64).min(100.0);
        if percent < self.next_report {
            return None;
        }
        while self.next_report <= percent {
            self.next_report += PROGRESS_STEP;
        }
        Some(percent)
    }
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(default)]
    ok: bool,
    description: Option<String>,
}

/// Size-limited multipart upload against a Bot API compatible endpoint.
#[derive(Debug, Clone)]
pub struct BotApiTransport {
    config: LightweightSection,
    client: Client,
}

impl BotApiTransport {
    pub fn new(config: LightweightSection) -> TransportResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("vidrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            self.config.method.api_method()
        )
    }

    async fn build_form(&self, request: &UploadRequest) -> TransportResult<Form> {
        let file = tokio::fs::File::open(&request.path)
            .await
            .map_err(|source| TransportError::Io {
                source,
                path: request.path.clone(),
            })?;
        let length = file
            .metadata()
            .await
            .map_err(|source| TransportError::Io {
                source,
                path: request.path.clone(),
            })?
            .len();
        let file_name = request.file_name();
        let mut progress = UploadProgress::new(length);
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                if let Some(percent) = progress.advance(bytes.len()) {
                    debug!(file = %file_name, percent = %format!("{percent:.1}"), "bot upload progress");
                }
            }
        });
        let body = Body::wrap_stream(stream);
        let part = Part::stream_with_length(body, length)
            .file_name(request.file_name())
            .mime_str("application/octet-stream")?;

        let mut form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", request.caption.clone())
            .text(
                "disable_notification",
                self.config.disable_notification.to_string(),
            );
        if self.config.method == UploadMethod::Video {
            form = form.text("supports_streaming", "true");
            if let Some((width, height)) = request.media.dimensions() {
                form = form
                    .text("width", width.to_string())
                    .text("height", height.to_string());
            }
            if let Some(duration) = request.media.duration {
                form = form.text("duration", (duration.round() as u64).to_string());
            }
        }
        Ok(form.part(self.config.method.field_name(), part))
    }
}

#[async_trait]
impl Transport for BotApiTransport {
    fn name(&self) -> &'static str {
        "bot-api"
    }

    async fn upload(&self, request: &UploadRequest) -> TransportResult<()> {
        if request.size > self.config.limit_bytes {
            return Err(TransportError::TooLarge {
                message: format!(
                    "{} exceeds the {} bot limit",
                    human_size(request.size),
                    human_size(self.config.limit_bytes)
                ),
            });
        }
        let form = self.build_form(request).await?;
        debug!(file = %request.file_name(), size = %human_size(request.size), "bot upload starting");
        let response = self
            .client
            .post(self.endpoint())
            .multipart(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        classify_response(status, &body)?;
        info!(file = %request.file_name(), "bot upload confirmed");
        Ok(())
    }
}

/// Maps an API reply to the router's failure classes.
pub fn classify_response(status: u16, body: &str) -> TransportResult<()> {
    let reply = serde_json::from_str::<ApiReply>(body).ok();
    let description = reply
        .as_ref()
        .and_then(|r| r.description.clone())
        .unwrap_or_else(|| body.chars().take(MESSAGE_LIMIT).collect());

    if (200..300).contains(&status) && reply.as_ref().map(|r| r.ok).unwrap_or(true) {
        return Ok(());
    }
    let lowered = description.to_lowercase();
    if status == PAYLOAD_TOO_LARGE || lowered.contains("too large") || lowered.contains("too big") {
        return Err(TransportError::TooLarge {
            message: description,
        });
    }
    Err(TransportError::Rejected {
        status: Some(status),
        message: description,
    })
}
