use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RelayConfig {
    pub paths: PathsSection,
    pub logging: LoggingSection,
    pub scan: ScanSection,
    pub recovery: RecoverySection,
    pub delivery: DeliverySection,
    pub acquisition: AcquisitionSection,
    pub discovery: DiscoverySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub watch_dir: String,
    /// Tried in order after `watch_dir`; the first existing directory wins.
    pub watch_dir_candidates: Vec<String>,
    pub log_dir: String,
    pub quarantine_dir: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            watch_dir: "download".into(),
            watch_dir_candidates: Vec::new(),
            log_dir: "logs".into(),
            quarantine_dir: "quarantine".into(),
        }
    }
}

impl PathsSection {
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        std::iter::once(&self.watch_dir)
            .chain(self.watch_dir_candidates.iter())
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| PathBuf::from(entry.trim()))
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    /// Returns the first candidate directory that exists, creating the first
    /// candidate when none does.
    pub fn resolve_watch_root(&self) -> std::io::Result<PathBuf> {
        let candidates = self.candidates();
        if let Some(existing) = candidates.iter().find(|path| path.is_dir()) {
            return Ok(existing.clone());
        }
        let target = candidates
            .into_iter()
            .next()
            .unwrap_or_else(|| PathBuf::from("download"));
        std::fs::create_dir_all(&target)?;
        Ok(target)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub file_name: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file_name: "vidrelay.log".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub extensions: Vec<String>,
    pub min_size_bytes: u64,
    /// Zero disables the ceiling.
    pub max_size_bytes: u64,
    pub stable_age_seconds: u64,
    pub partial_stable_age_seconds: u64,
    pub poll_interval_seconds: u64,
    pub partial_suffix: String,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            extensions: vec![".mp4".into(), ".mkv".into(), ".mov".into(), ".m4v".into()],
            min_size_bytes: 64 * 1024,
            max_size_bytes: 0,
            stable_age_seconds: 20,
            partial_stable_age_seconds: 60,
            poll_interval_seconds: 10,
            partial_suffix: ".part".into(),
        }
    }
}

impl ScanSection {
    pub fn stable_age(&self) -> Duration {
        Duration::from_secs(self.stable_age_seconds)
    }

    pub fn partial_stable_age(&self) -> Duration {
        Duration::from_secs(self.partial_stable_age_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn max_size(&self) -> Option<u64> {
        (self.max_size_bytes > 0).then_some(self.max_size_bytes)
    }

    /// Lower-cased extensions, each with a leading dot.
    pub fn normalized_extensions(&self) -> Vec<String> {
        normalize_extensions(self.extensions.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub target_extension: String,
    pub box_width: u32,
    pub box_height: u32,
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub faststart: bool,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            target_extension: "mp4".into(),
            box_width: 1280,
            box_height: 720,
            video_codec: "libx264".into(),
            preset: "veryfast".into(),
            crf: 23,
            audio_codec: "aac".into(),
            audio_bitrate: "128k".into(),
            faststart: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliverySection {
    /// Placeholders: `{folder_tag}`, `{folder}`, `{filename}`, `{name}`, `{stem}`.
    pub caption_template: String,
    pub delete_after_delivery: bool,
    /// Move on to the high-capacity tier after a non size related lightweight failure.
    pub fallthrough_on_error: bool,
    /// Zero keeps retrying forever.
    pub max_failed_passes: u32,
    pub lightweight: LightweightSection,
    pub high_capacity: HighCapacitySection,
    pub segmentation: SegmentationSection,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            caption_template: "{folder_tag} {filename}".into(),
            delete_after_delivery: true,
            fallthrough_on_error: true,
            max_failed_passes: 0,
            lightweight: LightweightSection::default(),
            high_capacity: HighCapacitySection::default(),
            segmentation: SegmentationSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    Document,
    Video,
}

impl UploadMethod {
    pub fn api_method(&self) -> &'static str {
        match self {
            UploadMethod::Document => "sendDocument",
            UploadMethod::Video => "sendVideo",
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            UploadMethod::Document => "document",
            UploadMethod::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LightweightSection {
    pub enabled: bool,
    pub api_base: String,
    pub bot_token: String,
    pub chat_id: String,
    pub method: UploadMethod,
    pub limit_bytes: u64,
    pub timeout_seconds: u64,
    pub disable_notification: bool,
}

impl Default for LightweightSection {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "https://api.telegram.org".into(),
            bot_token: String::new(),
            chat_id: String::new(),
            method: UploadMethod::Document,
            limit_bytes: 50 * MIB,
            timeout_seconds: 3600,
            disable_notification: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountTier {
    Standard,
    Premium,
}

impl FromStr for AccountTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "free" => Ok(Self::Standard),
            "premium" => Ok(Self::Premium),
            other => Err(ConfigError::InvalidValue {
                key: "account_tier".into(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HighCapacitySection {
    pub enabled: bool,
    pub program: String,
    /// `{input}` is appended when no argument references it.
    pub args: Vec<String>,
    pub chat: String,
    pub account_tier: AccountTier,
    pub standard_ceiling_bytes: u64,
    pub premium_ceiling_bytes: u64,
}

impl Default for HighCapacitySection {
    fn default() -> Self {
        Self {
            enabled: false,
            program: "tdl".into(),
            args: vec![
                "up".into(),
                "-c".into(),
                "{chat}".into(),
                "-p".into(),
                "{input}".into(),
            ],
            chat: String::new(),
            account_tier: AccountTier::Standard,
            standard_ceiling_bytes: 2 * GIB,
            premium_ceiling_bytes: 4 * GIB,
        }
    }
}

impl HighCapacitySection {
    pub fn ceiling_bytes(&self) -> u64 {
        match self.account_tier {
            AccountTier::Standard => self.standard_ceiling_bytes,
            AccountTier::Premium => self.premium_ceiling_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmentationSection {
    pub enabled: bool,
    pub target_bytes: u64,
    pub min_segment_seconds: f64,
}

impl Default for SegmentationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            target_bytes: 1950 * MIB,
            min_segment_seconds: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionSection {
    pub program: String,
    /// Defaults to the resolved watch directory.
    pub download_dir: Option<String>,
    pub max_active: usize,
    pub retries: u32,
    pub fragment_retries: u32,
    pub concurrent_fragments: u32,
    pub downloader: String,
    pub extra_args: Vec<String>,
    pub normalize: bool,
    pub min_fps: u32,
    pub status_interval_seconds: u64,
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            program: "yt-dlp".into(),
            download_dir: None,
            max_active: 8,
            retries: 3,
            fragment_retries: 3,
            concurrent_fragments: 5,
            downloader: "ffmpeg".into(),
            extra_args: Vec::new(),
            normalize: false,
            min_fps: 0,
            status_interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub start_url: String,
    pub selector: String,
    pub limit: usize,
    pub scroll_steps: u32,
    pub scroll_pause_ms: u64,
    pub settle_ms: u64,
    pub headless: bool,
    pub chromium_executable: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            start_url: String::new(),
            selector: "a[href]".into(),
            limit: 100,
            scroll_steps: 0,
            scroll_pause_ms: 800,
            settle_ms: 2500,
            headless: true,
            chromium_executable: None,
            user_agent: None,
        }
    }
}

impl RelayConfig {
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlays environment-style keys on top of the file values.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(v) = get("WATCH_DIR").or_else(|| get("DOWNLOAD_DIR")) {
            if !v.is_empty() {
                self.paths.watch_dir = v;
            }
        }
        if let Some(v) = get("LOG_DIR") {
            self.paths.log_dir = v;
        }
        if let Some(v) = get("QUARANTINE_DIR") {
            self.paths.quarantine_dir = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.to_ascii_lowercase();
        }
        if let Some(v) = get("EXTENSIONS") {
            self.scan.extensions = normalize_extensions(v.split(','));
        }
        if let Some(v) = get("MIN_FILE_MB") {
            self.scan.min_size_bytes = megabytes("MIN_FILE_MB", &v)?;
        }
        if let Some(v) = get("MAX_FILE_GB") {
            let gb: f64 = parse_value("MAX_FILE_GB", &v)?;
            self.scan.max_size_bytes = (gb.max(0.0) * GIB as f64) as u64;
        }
        if let Some(v) = get("STABLE_AGE") {
            self.scan.stable_age_seconds = parse_value("STABLE_AGE", &v)?;
        }
        if let Some(v) = get("PART_STABLE_AGE") {
            self.scan.partial_stable_age_seconds = parse_value("PART_STABLE_AGE", &v)?;
        }
        if let Some(v) = get("WATCH_INTERVAL") {
            self.scan.poll_interval_seconds = parse_value("WATCH_INTERVAL", &v)?;
        }
        if let Some(v) = get("MAX_ACTIVE") {
            self.acquisition.max_active = parse_value("MAX_ACTIVE", &v)?;
        }
        if let Some(v) = get("TELEGRAM_TOKEN") {
            self.delivery.lightweight.bot_token = v;
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            if self.delivery.high_capacity.chat.is_empty() {
                self.delivery.high_capacity.chat = v.clone();
            }
            self.delivery.lightweight.chat_id = v;
        }
        if let Some(v) = get("BOT_LIMIT_MB") {
            self.delivery.lightweight.limit_bytes = megabytes("BOT_LIMIT_MB", &v)?;
        }
        if let Some(v) = get("ENABLE_MTPROTO") {
            self.delivery.high_capacity.enabled = parse_bool(&v);
        }
        if let Some(v) = get("MTPROTO_TIER") {
            self.delivery.high_capacity.account_tier = v.parse()?;
        }
        if let Some(v) = get("SPLIT_ENABLED") {
            self.delivery.segmentation.enabled = parse_bool(&v);
        }
        if let Some(v) = get("SPLIT_TARGET_MB") {
            self.delivery.segmentation.target_bytes = megabytes("SPLIT_TARGET_MB", &v)?;
        }
        if let Some(v) = lookup("CAPTION_TEMPLATE") {
            self.delivery.caption_template = v;
        }
        if let Some(v) = get("DELETE_AFTER_SEND") {
            self.delivery.delete_after_delivery = parse_bool(&v);
        }
        Ok(())
    }

    /// Checks the settings the delivery side cannot run without.
    pub fn validate(&self) -> Result<()> {
        let delivery = &self.delivery;
        if !delivery.lightweight.enabled && !delivery.high_capacity.enabled {
            return Err(ConfigError::Missing(
                "no delivery transport enabled".to_string(),
            ));
        }
        if delivery.lightweight.enabled {
            if delivery.lightweight.bot_token.is_empty() {
                return Err(ConfigError::Missing(
                    "delivery.lightweight.bot_token (TELEGRAM_TOKEN)".to_string(),
                ));
            }
            if delivery.lightweight.chat_id.is_empty() {
                return Err(ConfigError::Missing(
                    "delivery.lightweight.chat_id (TELEGRAM_CHAT_ID)".to_string(),
                ));
            }
        }
        if delivery.high_capacity.enabled && delivery.high_capacity.program.trim().is_empty() {
            return Err(ConfigError::Missing(
                "delivery.high_capacity.program".to_string(),
            ));
        }
        if delivery.segmentation.enabled {
            let target = delivery.segmentation.target_bytes;
            if target == 0 || target > delivery.high_capacity.ceiling_bytes() {
                return Err(ConfigError::InvalidValue {
                    key: "delivery.segmentation.target_bytes".into(),
                    value: target.to_string(),
                });
            }
        }
        if self.acquisition.max_active == 0 {
            return Err(ConfigError::InvalidValue {
                key: "acquisition.max_active".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }
}

pub fn parse_bool(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "" | "off"
    )
}

pub fn normalize_extensions<'a, I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    items
        .into_iter()
        .map(|ext| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext != ".")
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn megabytes(key: &str, value: &str) -> Result<u64> {
    let mb: f64 = parse_value(key, value)?;
    Ok((mb.max(0.0) * MIB as f64) as u64)
}

pub fn load_relay_config<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
