//! Turns parsed flags into `RunOptions`, runs the command and reports.
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use teerun_core::config::{AppConfig, RunnerConfig};
use teerun_core::error::CliError;
use teerun_core::runner::{CommandLine, ExecutionResult, SinkMode};
use teerun_core::{RunOptions, SinkKind};

use crate::commands::cli::Args;

pub fn run_app(args: Args, cfg: &AppConfig) -> Result<i32, CliError> {
    run_app_with(args, cfg, &mut std::io::stderr())
}

/// `run_app` with tee failures reported to `diag` instead of stderr.
pub fn run_app_with(args: Args, cfg: &AppConfig, diag: &mut dyn Write) -> Result<i32, CliError> {
    let opts = build_options(&args, &cfg.runner)?;
    let cmd = if args.shell {
        CommandLine::Text(args.command.join(" "))
    } else {
        CommandLine::from(args.command)
    };
    tracing::info!(command = %cmd, "run start");

    let outcome = teerun_core::run(cmd, opts).wait();

    let result = match &outcome {
        Ok(result) => Some(result),
        Err(e) => e.result(),
    };
    if let Some(result) = result {
        report(result, args.summary.as_deref(), diag)?;
    }

    let result = outcome?;
    Ok(exit_code_for_result(&result))
}

/// Prints every tee failure, then writes the summary if one was requested.
fn report(
    result: &ExecutionResult,
    summary: Option<&str>,
    diag: &mut dyn Write,
) -> Result<(), CliError> {
    for e in &result.tee_errors {
        writeln!(diag, "teerun: {e}")?;
    }
    if let Some(target) = summary {
        write_summary(target, result)?;
    }
    Ok(())
}

pub fn build_options(args: &Args, runner: &RunnerConfig) -> Result<RunOptions, CliError> {
    let mut opts = RunOptions::new()
        .shell(args.shell)
        .tee(!args.no_tee)
        .capture_output(args.capture)
        .text(args.text)
        .check(args.check)
        .process_group(args.process_group)
        .runner_config(runner.clone());

    if let Some(label) = &args.encoding {
        opts = opts.encoding(label.clone());
    }
    if let Some(policy) = args.errors {
        opts = opts.errors(policy.into());
    }
    if let Some(secs) = args.timeout {
        opts = opts.timeout(parse_timeout(secs)?);
    }
    if let Some(dir) = &args.cwd {
        opts = opts.cwd(dir.clone());
    }
    if !args.env.is_empty() {
        opts = opts.env(merged_env(&args.env)?);
    }
    if let Some(src) = &args.input_file {
        opts = opts.input(read_input(src)?);
    }

    let text = args.text || args.encoding.is_some() || args.errors.is_some();
    let mode = if text {
        SinkMode::Text
    } else {
        SinkMode::Binary
    };
    if let Some(path) = &args.stdout_file {
        opts = opts.stdout(file_sink(path, mode)?);
    }
    if let Some(path) = &args.stderr_file {
        opts = opts.stderr(file_sink(path, mode)?);
    }
    if args.merge_stderr {
        opts = opts.stderr(SinkKind::MergeIntoStdout);
    }
    Ok(opts)
}

fn parse_timeout(secs: f64) -> Result<Duration, CliError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| CliError::Config(format!("invalid --timeout {secs}: {e}")))
}

/// The inherited environment with `KEY=VALUE` overrides applied.
fn merged_env(pairs: &[String]) -> Result<Vec<(OsString, OsString)>, CliError> {
    let mut env: Vec<(OsString, OsString)> = std::env::vars_os().collect();
    for kv in pairs {
        let (k, v) = kv
            .split_once('=')
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| CliError::Config(format!("invalid --env {kv} (expected KEY=VALUE)")))?;
        env.retain(|(existing, _)| existing.as_os_str() != k);
        env.push((k.into(), v.into()));
    }
    Ok(env)
}

fn read_input(src: &str) -> Result<Vec<u8>, CliError> {
    if src == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    Ok(std::fs::read(src)?)
}

fn file_sink(path: &Path, mode: SinkMode) -> Result<SinkKind, CliError> {
    let file = std::fs::File::create(path)
        .map_err(|e| CliError::Command(format!("create {}: {e}", path.display())))?;
    Ok(SinkKind::external(tokio::fs::File::from_std(file), mode))
}

fn write_summary(target: &str, result: &ExecutionResult) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(result)
        .map_err(|e| CliError::Command(format!("serialize summary: {e}")))?;
    if target == "-" {
        println!("{json}");
    } else {
        std::fs::write(target, json + "\n")?;
    }
    Ok(())
}

/// The child's own code, or 128+N when it died from signal N.
pub fn exit_code_for_result(result: &ExecutionResult) -> i32 {
    match result.signal() {
        Some(sig) => 128 + sig,
        None => result.exit_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["teerun"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn env_overrides_replace_inherited_values() {
        let env = merged_env(&["TEERUN_TEST_VAR=one".into(), "TEERUN_TEST_VAR=two".into()])
            .unwrap();
        let hits: Vec<_> = env
            .iter()
            .filter(|(k, _)| k == "TEERUN_TEST_VAR")
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, OsString::from("two"));
    }

    #[test]
    fn env_without_equals_is_rejected() {
        assert!(matches!(
            merged_env(&["NOPE".into()]),
            Err(CliError::Config(_))
        ));
        assert!(merged_env(&["=value".into()]).is_err());
    }

    #[test]
    fn negative_timeout_is_a_config_error() {
        assert!(matches!(parse_timeout(-1.0), Err(CliError::Config(_))));
        assert_eq!(parse_timeout(0.25).unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn flags_map_onto_run_options() {
        let opts = build_options(
            &args(&["--no-tee", "--capture", "--errors", "replace", "--check", "true"]),
            &RunnerConfig::default(),
        )
        .unwrap();
        assert!(!opts.tee);
        assert!(opts.capture_output);
        assert!(opts.check);
        assert_eq!(
            opts.errors,
            Some(teerun_core::runner::DecodePolicy::Replace)
        );
    }

    #[test]
    fn input_file_is_read_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, b"payload").unwrap();

        let opts = build_options(
            &args(&["--input-file", path.to_str().unwrap(), "cat"]),
            &RunnerConfig::default(),
        )
        .unwrap();
        assert_eq!(opts.input.as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn stdout_file_becomes_an_external_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");

        let opts = build_options(
            &args(&["--text", "--stdout-file", path.to_str().unwrap(), "true"]),
            &RunnerConfig::default(),
        )
        .unwrap();
        assert!(path.exists());
        assert!(matches!(
            &opts.stdout,
            Some(SinkKind::External(s)) if s.mode() == SinkMode::Text
        ));
    }

    #[cfg(unix)]
    #[test]
    fn run_app_writes_summary_and_propagates_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let summary = dir.path().join("summary.json");
        let out = dir.path().join("out.log");

        let code = run_app(
            args(&[
                "--capture",
                "--text",
                "--stdout-file",
                out.to_str().unwrap(),
                "--summary",
                summary.to_str().unwrap(),
                "--",
                "/bin/sh",
                "-c",
                "echo hello; exit 4",
            ]),
            &AppConfig::default(),
        )
        .unwrap();

        assert_eq!(code, 4);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\n");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
        assert_eq!(json["exit_code"], 4);
        assert_eq!(json["stdout"], "hello\n");
        assert_eq!(json["timed_out"], false);
        assert_eq!(json["args"][0], "/bin/sh");
    }

    #[cfg(unix)]
    #[test]
    fn timed_out_run_still_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summary = dir.path().join("summary.json");

        let err = run_app(
            args(&[
                "--no-tee",
                "--capture",
                "--timeout",
                "0.2",
                "--summary",
                summary.to_str().unwrap(),
                "sleep",
                "5",
            ]),
            &AppConfig::default(),
        )
        .unwrap_err();

        assert!(matches!(&err, CliError::Run(e) if e.is_timeout()));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
        assert_eq!(json["timed_out"], true);
    }

    #[test]
    fn tee_failures_are_printed_for_failed_runs_too() {
        let result = ExecutionResult {
            args: CommandLine::from(["false"]),
            exit_code: 1,
            signal: None,
            stdout: None,
            stderr: None,
            timed_out: false,
            duration_ms: 0,
            tee_errors: vec![teerun_core::TeeWriteError::new(
                teerun_core::runner::StreamName::Stdout,
                &std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reader went away"),
            )],
        };
        let err = teerun_core::RunError::NonZeroExit {
            result: Box::new(result),
        };

        let mut diag = Vec::new();
        report(err.result().unwrap(), None, &mut diag).unwrap();

        let printed = String::from_utf8(diag).unwrap();
        assert_eq!(printed, "teerun: tee write failed: stdout reader went away\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn checked_failure_still_reports_broken_sink() {
        let mut diag = Vec::new();
        let res = run_app_with(
            args(&[
                "--check",
                "--stdout-file",
                "/dev/full",
                "--",
                "/bin/sh",
                "-c",
                "echo lost; exit 3",
            ]),
            &AppConfig::default(),
            &mut diag,
        );

        assert!(matches!(res, Err(CliError::Run(teerun_core::RunError::NonZeroExit { .. }))));
        let printed = String::from_utf8(diag).unwrap();
        assert!(printed.starts_with("teerun: tee write failed: stdout"), "{printed}");
    }
}
