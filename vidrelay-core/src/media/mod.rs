mod command;
mod error;
mod geometry;
mod probe;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RecoverySection;
use crate::fsutil::{non_empty_file, remove_if_exists};

pub use command::{describe, stderr_tail, CommandExecutor, SystemCommandExecutor};
pub use error::{ToolError, ToolResult};
pub use geometry::{box_fit_expression, fit_within_box};
pub use probe::{parse_probe_output, MediaInfo};

const STDERR_TAIL_CHARS: usize = 600;

#[derive(Debug, Clone, PartialEq)]
pub enum ReencodeTarget {
    Exact { width: u32, height: u32 },
    /// Used when the source frame size is unknown.
    FitBox { max_width: u32, max_height: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeMode {
    CopyRemux,
    AudioRepair,
    FullReencode(ReencodeTarget),
    /// h264/aac normalization of a finished download.
    Normalize { min_fps: u32 },
}

impl TranscodeMode {
    pub fn label(&self) -> &'static str {
        match self {
            TranscodeMode::CopyRemux => "copy-remux",
            TranscodeMode::AudioRepair => "audio-repair",
            TranscodeMode::FullReencode(_) => "full-reencode",
            TranscodeMode::Normalize { .. } => "normalize",
        }
    }
}

/// ffmpeg/ffprobe front end. Every invocation goes through the executor.
#[derive(Clone)]
pub struct MediaToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    settings: RecoverySection,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for MediaToolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaToolkit")
            .field("ffmpeg", &self.ffmpeg)
            .field("ffprobe", &self.ffprobe)
            .finish()
    }
}

impl MediaToolkit {
    pub fn new(settings: RecoverySection, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            ffmpeg: PathBuf::from(&settings.ffmpeg),
            ffprobe: PathBuf::from(&settings.ffprobe),
            settings,
            executor,
        }
    }

    pub fn settings(&self) -> &RecoverySection {
        &self.settings
    }

    pub fn executor(&self) -> Arc<dyn CommandExecutor> {
        Arc::clone(&self.executor)
    }

    pub async fn probe(&self, path: &Path) -> MediaInfo {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=width,height:format=duration".to_string(),
            "-of".to_string(),
            "json".to_string(),
            path.to_string_lossy().to_string(),
        ];
        match self.executor.run(&self.ffprobe, &args).await {
            Ok(output) if output.status.success() => parse_probe_output(&output.stdout),
            Ok(output) => {
                debug!(path = %path.display(), stderr = %stderr_tail(&output, 200), "probe failed");
                MediaInfo::default()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "probe tool unavailable");
                MediaInfo::default()
            }
        }
    }

    pub fn transcode_args(&self, input: &Path, output: &Path, mode: &TranscodeMode) -> Vec<String> {
        let s = &self.settings;
        let mut args = self.input_args(input);
        match mode {
            TranscodeMode::CopyRemux => {
                args.extend(["-c".into(), "copy".into()]);
            }
            TranscodeMode::AudioRepair => {
                args.extend([
                    "-c:v".into(),
                    "copy".into(),
                    "-c:a".into(),
                    s.audio_codec.clone(),
                    "-b:a".into(),
                    s.audio_bitrate.clone(),
                ]);
            }
            TranscodeMode::FullReencode(target) => {
                let filter = match target {
                    ReencodeTarget::Exact { width, height } => {
                        format!("scale={width}:{height},setsar=1")
                    }
                    ReencodeTarget::FitBox {
                        max_width,
                        max_height,
                    } => box_fit_expression(*max_width, *max_height),
                };
                args.extend(self.video_encode_args());
                args.extend(["-vf".into(), filter]);
                args.extend(self.audio_encode_args());
            }
            TranscodeMode::Normalize { min_fps } => {
                args.extend(self.video_encode_args());
                if *min_fps > 0 {
                    args.extend(["-vf".into(), format!("fps=fps={min_fps}")]);
                }
                args.extend(self.audio_encode_args());
            }
        }
        args.extend(self.output_args(output));
        args
    }

    /// Runs one ffmpeg pass. On failure nothing is left at `output`.
    pub async fn transcode(&self, input: &Path, output: &Path, mode: &TranscodeMode) -> ToolResult<()> {
        let args = self.transcode_args(input, output, mode);
        self.run_ffmpeg(args, output).await
    }

    pub fn segment_args(&self, input: &Path, output: &Path, start: f64, duration: f64) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-ss".to_string(),
            format!("{start:.3}"),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-t".to_string(),
            format!("{duration:.3}"),
            "-map".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
        ];
        args.extend(self.output_args(output));
        args
    }

    pub async fn extract_segment(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> ToolResult<()> {
        let args = self.segment_args(input, output, start, duration);
        self.run_ffmpeg(args, output).await
    }

    async fn run_ffmpeg(&self, args: Vec<String>, output: &Path) -> ToolResult<()> {
        let result = self.execute(args, output).await;
        if result.is_err() {
            if let Err(err) = remove_if_exists(output) {
                warn!(path = %output.display(), error = %err, "failed to remove failed ffmpeg output");
            }
        }
        result
    }

    async fn execute(&self, args: Vec<String>, output: &Path) -> ToolResult<()> {
        let result = self
            .executor
            .run(&self.ffmpeg, &args)
            .await
            .map_err(|source| ToolError::Io {
                program: self.ffmpeg.display().to_string(),
                source,
            })?;
        if !result.status.success() {
            return Err(ToolError::CommandFailure {
                command: describe(&self.ffmpeg, &args),
                status: result.status.code(),
                stderr: stderr_tail(&result, STDERR_TAIL_CHARS),
            });
        }
        if !non_empty_file(output) {
            return Err(ToolError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }

    fn input_args(&self, input: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ]
    }

    fn video_encode_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.settings.video_codec.clone(),
            "-preset".to_string(),
            self.settings.preset.clone(),
            "-crf".to_string(),
            self.settings.crf.to_string(),
        ]
    }

    fn audio_encode_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.settings.audio_codec.clone(),
            "-b:a".to_string(),
            self.settings.audio_bitrate.clone(),
        ]
    }

    fn output_args(&self, output: &Path) -> Vec<String> {
        let mut args = Vec::new();
        let mp4_family = output
            .extension()
            .map(|ext| matches!(ext.to_string_lossy().to_lowercase().as_str(), "mp4" | "m4v" | "mov"))
            .unwrap_or(false);
        if self.settings.faststart && mp4_family {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }
        args.push(output.to_string_lossy().to_string());
        args
    }
}
