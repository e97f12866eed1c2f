use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("command succeeded but produced no output at {0}")]
    MissingOutput(PathBuf),
}

pub type ToolResult<T> = Result<T, ToolError>;
