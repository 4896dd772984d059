use std::io;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::runner::types::{ExecutionResult, StreamName};

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("empty command")]
    EmptyCommand,
    #[error("spawn failed: {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("pipe setup failed: {0}")]
    Pipe(io::Error),
    #[error("merging stderr into a stdout pipe is not supported on this platform")]
    MergeUnsupported,
}

impl LaunchError {
    /// The underlying OS error kind, when the failure came from the OS.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            LaunchError::Spawn { source, .. } | LaunchError::Pipe(source) => Some(source.kind()),
            LaunchError::EmptyCommand | LaunchError::MergeUnsupported => None,
        }
    }
}

/// A failed write to an external tee sink. Draining continues after this;
/// the error travels on the result instead of aborting the run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("tee write failed: {stream} {message}")]
pub struct TeeWriteError {
    pub stream: StreamName,
    #[serde(skip)]
    pub kind: io::ErrorKind,
    pub message: String,
}

impl TeeWriteError {
    pub fn new(stream: StreamName, err: &io::Error) -> Self {
        Self {
            stream,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {encoding} sequence at byte {offset}")]
pub struct DecodeError {
    pub encoding: &'static str,
    /// Byte offset into the stream where the malformed sequence starts.
    pub offset: usize,
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(String),
    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),
    #[error("command `{}` timed out after {timeout:?}", .result.args)]
    Timeout {
        timeout: Duration,
        result: Box<ExecutionResult>,
    },
    #[error("command `{}` returned non-zero exit status {}", .result.args, .result.exit_code)]
    NonZeroExit { result: Box<ExecutionResult> },
    #[error("{stream} decode failed: {source}")]
    Decode {
        stream: StreamName,
        source: DecodeError,
        result: Box<ExecutionResult>,
    },
    #[error("stream io error: {stream} {source}")]
    StreamIo {
        stream: StreamName,
        source: io::Error,
    },
    #[error("wait failed: {0}")]
    Wait(io::Error),
    #[error("scheduler error: {0}")]
    Scheduler(io::Error),
}

impl RunError {
    /// The (partial or full) result carried by timeout, decode and
    /// non-zero-exit errors.
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            RunError::Timeout { result, .. }
            | RunError::NonZeroExit { result }
            | RunError::Decode { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<ExecutionResult> {
        match self {
            RunError::Timeout { result, .. }
            | RunError::NonZeroExit { result }
            | RunError::Decode { result, .. } => Some(*result),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::Timeout { .. })
    }
}
