#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use vidrelay_core::delivery::{Transport, TransportError, TransportResult, UploadRequest};
use vidrelay_core::CommandExecutor;

use std::os::unix::process::ExitStatusExt;

pub type RecordedCalls = Arc<Mutex<Vec<(PathBuf, Vec<String>)>>>;

pub fn write_aged(path: &Path, bytes: usize, age: Duration) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, vec![7u8; bytes]).unwrap();
    set_age(path, age);
}

pub fn set_age(path: &Path, age: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn exit(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

/// Labels an ffmpeg/ffprobe invocation by what it was asked to do.
pub fn classify(program: &Path, args: &[String]) -> &'static str {
    let name = program.to_string_lossy();
    if name.contains("ffprobe") {
        return "probe";
    }
    if args.iter().any(|a| a == "-ss") {
        return "segment";
    }
    if args.iter().any(|a| a.starts_with("scale=")) {
        return "full-reencode";
    }
    if args.iter().any(|a| a == "libx264") {
        return "normalize";
    }
    if args.windows(2).any(|w| w == ["-c:v", "copy"]) {
        return "audio-repair";
    }
    if args.windows(2).any(|w| w == ["-c", "copy"]) {
        return "copy-remux";
    }
    "other"
}

/// Stands in for ffmpeg/ffprobe: writes a non-empty output unless the
/// operation is listed in `failing`.
pub struct FakeMediaTools {
    pub calls: RecordedCalls,
    failing: Mutex<HashSet<&'static str>>,
    probe_json: Mutex<String>,
}

impl FakeMediaTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            failing: Mutex::new(HashSet::new()),
            probe_json: Mutex::new(String::from("{}")),
        })
    }

    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn succeed(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    pub fn probe_returns(&self, width: u32, height: u32, duration: f64) {
        *self.probe_json.lock().unwrap() = format!(
            r#"{{"streams":[{{"width":{width},"height":{height}}}],"format":{{"duration":"{duration}"}}}}"#
        );
    }

    pub fn operations(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(program, args)| classify(program, args))
            .collect()
    }

    pub fn calls_for(&self, operation: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(program, args)| classify(program, args) == operation)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for FakeMediaTools {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_path_buf(), args.to_vec()));
        let operation = classify(program, args);
        if operation == "probe" {
            return Ok(Output {
                status: exit(0),
                stdout: self.probe_json.lock().unwrap().clone().into_bytes(),
                stderr: Vec::new(),
            });
        }
        if self.failing.lock().unwrap().contains(operation) {
            // ffmpeg often leaves a truncated file behind when it dies.
            if let Some(output) = args.last() {
                let _ = std::fs::write(output, b"");
            }
            return Ok(Output {
                status: exit(1),
                stdout: Vec::new(),
                stderr: b"Invalid data found when processing input".to_vec(),
            });
        }
        if let Some(output) = args.last() {
            std::fs::write(output, format!("{operation} output"))?;
        }
        Ok(Output {
            status: exit(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Accept,
    TooLarge,
    Reject,
}

/// Transport double that records every request it sees.
pub struct RecordingTransport {
    name: &'static str,
    pub requests: Mutex<Vec<UploadRequest>>,
    script: Mutex<Vec<Scripted>>,
    fallback: Scripted,
}

impl RecordingTransport {
    pub fn accepting(name: &'static str) -> Arc<Self> {
        Self::scripted(name, Vec::new(), Scripted::Accept)
    }

    pub fn with_default(name: &'static str, fallback: Scripted) -> Arc<Self> {
        Self::scripted(name, Vec::new(), fallback)
    }

    /// Replies with `script` in order, then `fallback`.
    pub fn scripted(name: &'static str, script: Vec<Scripted>, fallback: Scripted) -> Arc<Self> {
        Arc::new(Self {
            name,
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(script.into_iter().rev().collect()),
            fallback,
        })
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn captions(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.caption.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn upload(&self, request: &UploadRequest) -> TransportResult<()> {
        assert!(request.path.exists(), "uploaded file must exist");
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Scripted::Accept => Ok(()),
            Scripted::TooLarge => Err(TransportError::TooLarge {
                message: "Request Entity Too Large".into(),
            }),
            Scripted::Reject => Err(TransportError::Rejected {
                status: Some(500),
                message: "internal error".into(),
            }),
        }
    }
}

/// Sparse file of `len` bytes, aged by `age`.
pub fn write_sparse(path: &Path, len: u64, age: Duration) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = File::create(path).unwrap();
    file.set_len(len).unwrap();
    drop(file);
    set_age(path, age);
}
