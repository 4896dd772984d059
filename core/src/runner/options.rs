use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::RunnerConfig;
use crate::error::RunError;

use super::command;
use super::types::{
    CommandLine, DecodePolicy, ExecutionSpec, ExternalSink, SinkKind, SinkMode, StreamName,
    StreamSpec, TextMode,
};

/// Caller-facing knobs for one run. Turned into an `ExecutionSpec` by
/// [`RunOptions::into_spec`].
#[derive(Debug)]
pub struct RunOptions {
    pub shell: bool,
    /// Copy output to the parent's streams for every stream left unset.
    pub tee: bool,
    pub capture_output: bool,
    pub stdout: Option<SinkKind>,
    pub stderr: Option<SinkKind>,
    pub text: bool,
    pub encoding: Option<String>,
    pub errors: Option<DecodePolicy>,
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
    /// Replaces the child's environment when set.
    pub env: Option<Vec<(OsString, OsString)>>,
    pub input: Option<Vec<u8>>,
    pub check: bool,
    pub process_group: bool,
    pub runner: RunnerConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            shell: false,
            tee: true,
            capture_output: false,
            stdout: None,
            stderr: None,
            text: false,
            encoding: None,
            errors: None,
            timeout: None,
            cwd: None,
            env: None,
            input: None,
            check: false,
            process_group: false,
            runner: RunnerConfig::default(),
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn tee(mut self, tee: bool) -> Self {
        self.tee = tee;
        self
    }

    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn stdout(mut self, sink: SinkKind) -> Self {
        self.stdout = Some(sink);
        self
    }

    pub fn stderr(mut self, sink: SinkKind) -> Self {
        self.stderr = Some(sink);
        self
    }

    pub fn text(mut self, text: bool) -> Self {
        self.text = text;
        self
    }

    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }

    pub fn errors(mut self, policy: DecodePolicy) -> Self {
        self.errors = Some(policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn process_group(mut self, group: bool) -> Self {
        self.process_group = group;
        self
    }

    pub fn runner_config(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }

    /// Validate and normalize into the engine's plan.
    pub fn into_spec(self, cmd: impl Into<CommandLine>) -> Result<ExecutionSpec, RunError> {
        let args = cmd.into();
        let resolved = command::resolve(&args, self.shell)?;

        let text = if self.text || self.encoding.is_some() || self.errors.is_some() {
            let label = self
                .encoding
                .as_deref()
                .unwrap_or(self.runner.encoding.as_str());
            let mode = TextMode::for_label(label, self.errors.unwrap_or_default())
                .ok_or_else(|| RunError::Config(format!("unknown encoding: {label}")))?;
            Some(mode)
        } else {
            None
        };
        let parent_mode = if text.is_some() {
            SinkMode::Text
        } else {
            SinkMode::Binary
        };

        if matches!(self.stdout, Some(SinkKind::MergeIntoStdout)) {
            return Err(RunError::Config(
                "stdout cannot be merged into itself".to_string(),
            ));
        }

        let (tee, capture) = (self.tee, self.capture_output);
        let stdout = plan_stream(StreamName::Stdout, self.stdout, tee, capture, parent_mode);
        let stderr = plan_stream(StreamName::Stderr, self.stderr, tee, capture, parent_mode);

        Ok(ExecutionSpec {
            args,
            program: resolved.program,
            program_args: resolved.args,
            cwd: self.cwd,
            env: self.env,
            input: self.input,
            stdout,
            stderr,
            text,
            timeout: self.timeout,
            kill_grace: self.runner.kill_grace(),
            chunk_size: self.runner.chunk_size,
            check: self.check,
            process_group: self.process_group,
        })
    }
}

fn plan_stream(
    stream: StreamName,
    explicit: Option<SinkKind>,
    tee: bool,
    capture_output: bool,
    parent_mode: SinkMode,
) -> StreamSpec {
    match explicit {
        Some(sink @ (SinkKind::Discard | SinkKind::Inherit | SinkKind::MergeIntoStdout)) => {
            StreamSpec::new(sink, false)
        }
        Some(SinkKind::CaptureOnly) => StreamSpec::new(SinkKind::CaptureOnly, true),
        Some(sink @ SinkKind::External(_)) => StreamSpec::new(sink, capture_output),
        None if tee => StreamSpec::new(
            SinkKind::External(ExternalSink::parent(stream, parent_mode)),
            capture_output,
        ),
        None if capture_output => StreamSpec::new(SinkKind::CaptureOnly, true),
        None => StreamSpec::new(SinkKind::Inherit, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plan(opts: RunOptions) -> ExecutionSpec {
        opts.into_spec(["echo", "hi"]).unwrap()
    }

    #[test]
    fn defaults_tee_to_parent_without_capture() {
        let spec = plan(RunOptions::new());
        assert!(matches!(
            &spec.stdout.sink,
            SinkKind::External(s) if s.mode() == SinkMode::Binary
        ));
        assert!(!spec.stdout.capture);
        assert!(spec.stderr.needs_pipe());
        assert!(spec.text.is_none());
        assert_eq!(spec.program, OsString::from("echo"));
        assert_eq!(spec.program_args, vec![OsString::from("hi")]);
        assert_eq!(spec.kill_grace, Duration::from_millis(200));
        assert_eq!(spec.chunk_size, 32 * 1024);
    }

    #[test]
    fn capture_without_tee_buffers_only() {
        let spec = plan(RunOptions::new().tee(false).capture_output(true));
        assert!(matches!(spec.stdout.sink, SinkKind::CaptureOnly));
        assert!(spec.stdout.capture);
        assert!(matches!(spec.stderr.sink, SinkKind::CaptureOnly));
    }

    #[test]
    fn no_tee_no_capture_inherits() {
        let spec = plan(RunOptions::new().tee(false));
        assert!(matches!(spec.stdout.sink, SinkKind::Inherit));
        assert!(!spec.stdout.needs_pipe());
        assert!(!spec.stderr.capture);
    }

    #[test]
    fn explicit_sinks_override_tee() {
        let spec = plan(
            RunOptions::new()
                .capture_output(true)
                .stdout(SinkKind::Discard)
                .stderr(SinkKind::external(tokio::io::sink(), SinkMode::Binary)),
        );
        assert!(matches!(spec.stdout.sink, SinkKind::Discard));
        assert!(!spec.stdout.capture);
        assert!(matches!(spec.stderr.sink, SinkKind::External(_)));
        assert!(spec.stderr.capture);
    }

    #[test]
    fn external_sink_is_honoured_without_tee() {
        let spec = plan(
            RunOptions::new()
                .tee(false)
                .stdout(SinkKind::external(tokio::io::sink(), SinkMode::Text)),
        );
        assert!(spec.stdout.needs_pipe());
        assert!(!spec.stdout.capture);
    }

    #[test]
    fn encoding_or_errors_imply_text() {
        let spec = plan(RunOptions::new().errors(DecodePolicy::Replace));
        let text = spec.text.expect("text mode");
        assert_eq!(text.encoding, encoding_rs::UTF_8);
        assert_eq!(text.policy, DecodePolicy::Replace);
        assert!(matches!(
            &spec.stdout.sink,
            SinkKind::External(s) if s.mode() == SinkMode::Text
        ));

        let spec = plan(RunOptions::new().encoding("latin1"));
        let text = spec.text.expect("text mode");
        assert_eq!(text.encoding, encoding_rs::WINDOWS_1252);
        assert_eq!(text.policy, DecodePolicy::Strict);
    }

    #[test]
    fn default_encoding_comes_from_runner_config() {
        let runner = RunnerConfig {
            encoding: "shift_jis".into(),
            ..RunnerConfig::default()
        };
        let spec = plan(RunOptions::new().text(true).runner_config(runner));
        assert_eq!(spec.text.map(|t| t.encoding), Some(encoding_rs::SHIFT_JIS));
    }

    #[test]
    fn unknown_encoding_is_a_config_error() {
        let err = RunOptions::new()
            .encoding("klingon")
            .into_spec(["true"])
            .unwrap_err();
        assert!(matches!(err, RunError::Config(msg) if msg.contains("klingon")));
    }

    #[test]
    fn merge_is_only_valid_for_stderr() {
        let err = RunOptions::new()
            .stdout(SinkKind::MergeIntoStdout)
            .into_spec(["true"])
            .unwrap_err();
        assert!(matches!(err, RunError::Config(_)));

        let spec = plan(
            RunOptions::new()
                .capture_output(true)
                .stderr(SinkKind::MergeIntoStdout),
        );
        assert!(matches!(spec.stderr.sink, SinkKind::MergeIntoStdout));
        assert!(!spec.stderr.capture);
    }

    #[cfg(unix)]
    #[test]
    fn shell_string_runs_through_sh() {
        let spec = RunOptions::new()
            .shell(true)
            .into_spec("echo $HOME | wc -c")
            .unwrap();
        assert_eq!(spec.program, OsString::from("/bin/sh"));
        assert_eq!(
            spec.program_args,
            vec![OsString::from("-c"), OsString::from("echo $HOME | wc -c")]
        );
        assert_eq!(spec.args, CommandLine::from("echo $HOME | wc -c"));
    }
}
