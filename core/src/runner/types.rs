use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use encoding_rs::Encoding;
use serde::{Serialize, Serializer};
use tokio::io::AsyncWrite;

use crate::error::TeeWriteError;

use super::command::shell_escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl StreamName {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// The sink receives decoded text (UTF-8) when the run is in text mode.
    Text,
    /// The sink receives the raw bytes read from the pipe.
    Binary,
}

pub type SinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A writable destination that receives a copy of one stream.
pub struct ExternalSink {
    pub(crate) writer: SinkWriter,
    pub(crate) mode: SinkMode,
}

impl ExternalSink {
    pub fn new<W>(writer: W, mode: SinkMode) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Box::new(writer),
            mode,
        }
    }

    pub fn text<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::new(writer, SinkMode::Text)
    }

    pub fn binary<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::new(writer, SinkMode::Binary)
    }

    /// The parent's own stdout or stderr.
    pub fn parent(stream: StreamName, mode: SinkMode) -> Self {
        match stream {
            StreamName::Stdout => Self::new(tokio::io::stdout(), mode),
            StreamName::Stderr => Self::new(tokio::io::stderr(), mode),
        }
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }
}

impl fmt::Debug for ExternalSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalSink")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Where one child stream goes.
#[derive(Debug)]
pub enum SinkKind {
    /// Connected to the null device.
    Discard,
    /// Shares the parent's own stream; nothing passes through us.
    Inherit,
    /// Piped and buffered, no external copy.
    CaptureOnly,
    /// Piped, buffered when capture is on, and copied to the sink.
    External(ExternalSink),
    /// stderr only: share stdout's destination.
    MergeIntoStdout,
}

impl SinkKind {
    pub fn external<W>(writer: W, mode: SinkMode) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        SinkKind::External(ExternalSink::new(writer, mode))
    }
}

/// Normalized plan for one stream.
#[derive(Debug)]
pub struct StreamSpec {
    pub sink: SinkKind,
    pub capture: bool,
}

impl StreamSpec {
    pub fn new(sink: SinkKind, capture: bool) -> Self {
        Self { sink, capture }
    }

    pub fn needs_pipe(&self) -> bool {
        matches!(self.sink, SinkKind::CaptureOnly | SinkKind::External(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    #[default]
    Strict,
    Replace,
    Ignore,
}

impl FromStr for DecodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(DecodePolicy::Strict),
            "replace" => Ok(DecodePolicy::Replace),
            "ignore" => Ok(DecodePolicy::Ignore),
            other => Err(format!("unknown decode error policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextMode {
    pub encoding: &'static Encoding,
    pub policy: DecodePolicy,
}

impl TextMode {
    pub fn utf8(policy: DecodePolicy) -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
            policy,
        }
    }

    pub fn for_label(label: &str, policy: DecodePolicy) -> Option<Self> {
        Encoding::for_label(label.trim().as_bytes()).map(|encoding| Self { encoding, policy })
    }
}

/// The command as the caller gave it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Argv(Vec<OsString>),
    Text(String),
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Text(s) => f.write_str(s),
            CommandLine::Argv(argv) => {
                let joined = argv
                    .iter()
                    .map(|a| shell_escape(&a.to_string_lossy()))
                    .collect::<Vec<_>>()
                    .join(" ");
                f.write_str(&joined)
            }
        }
    }
}

impl Serialize for CommandLine {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CommandLine::Text(s) => serializer.serialize_str(s),
            CommandLine::Argv(argv) => {
                serializer.collect_seq(argv.iter().map(|a| a.to_string_lossy()))
            }
        }
    }
}

impl From<&str> for CommandLine {
    fn from(s: &str) -> Self {
        CommandLine::Text(s.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(s: String) -> Self {
        CommandLine::Text(s)
    }
}

impl<S: AsRef<OsStr>> From<Vec<S>> for CommandLine {
    fn from(v: Vec<S>) -> Self {
        CommandLine::Argv(v.iter().map(|s| s.as_ref().to_os_string()).collect())
    }
}

impl<S: AsRef<OsStr>> From<&[S]> for CommandLine {
    fn from(v: &[S]) -> Self {
        CommandLine::Argv(v.iter().map(|s| s.as_ref().to_os_string()).collect())
    }
}

impl<S: AsRef<OsStr>, const N: usize> From<[S; N]> for CommandLine {
    fn from(v: [S; N]) -> Self {
        CommandLine::Argv(v.iter().map(|s| s.as_ref().to_os_string()).collect())
    }
}

/// Everything the engine needs for one run. Built by `RunOptions::into_spec`
/// and consumed by the engine.
#[derive(Debug)]
pub struct ExecutionSpec {
    pub args: CommandLine,
    pub program: OsString,
    pub program_args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// Replaces the child's environment when set.
    pub env: Option<Vec<(OsString, OsString)>>,
    pub input: Option<Vec<u8>>,
    pub stdout: StreamSpec,
    pub stderr: StreamSpec,
    pub text: Option<TextMode>,
    pub timeout: Option<Duration>,
    pub kill_grace: Duration,
    pub chunk_size: usize,
    pub check: bool,
    pub process_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Output {
    Bytes(Vec<u8>),
    Text(String),
}

impl Output {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Output::Bytes(b) => b,
            Output::Text(s) => s.as_bytes(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(s) => Some(s),
            Output::Bytes(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Code(i32),
    Signal(i32),
    /// Neither a code nor a signal was reported.
    Unknown,
}

impl ChildExit {
    /// Flattened form: the code, `-N` for signal `N`, `-1` when unknown.
    pub fn exit_code(self) -> i32 {
        match self {
            ChildExit::Code(code) => code,
            ChildExit::Signal(sig) => -sig,
            ChildExit::Unknown => -1,
        }
    }

    pub fn signal(self) -> Option<i32> {
        match self {
            ChildExit::Signal(sig) => Some(sig),
            ChildExit::Code(_) | ChildExit::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub args: CommandLine,
    /// Exit code; `-N` when the child was killed by signal `N`, `-1` when
    /// the status was unknown.
    pub exit_code: i32,
    /// The terminating signal, when there was one.
    pub signal: Option<i32>,
    pub stdout: Option<Output>,
    pub stderr: Option<Output>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub tee_errors: Vec<TeeWriteError>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    pub fn stdout_text(&self) -> Option<&str> {
        self.stdout.as_ref().and_then(Output::as_text)
    }

    pub fn stderr_text(&self) -> Option<&str> {
        self.stderr.as_ref().and_then(Output::as_text)
    }

    /// Turns a non-zero exit into `RunError::NonZeroExit`.
    pub fn check_returncode(self) -> Result<Self, crate::error::RunError> {
        if self.exit_code != 0 {
            return Err(crate::error::RunError::NonZeroExit {
                result: Box::new(self),
            });
        }
        Ok(self)
    }

    /// First tee sink failure, if any.
    pub fn check_tee(&self) -> Result<(), &TeeWriteError> {
        match self.tee_errors.first() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Kill,
    Term,
}
