use std::path::PathBuf;

use clap::Parser;
use teerun_core::runner::DecodePolicy;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorsPolicy {
    Strict,
    Replace,
    Ignore,
}

impl From<ErrorsPolicy> for DecodePolicy {
    fn from(p: ErrorsPolicy) -> Self {
        match p {
            ErrorsPolicy::Strict => DecodePolicy::Strict,
            ErrorsPolicy::Replace => DecodePolicy::Replace,
            ErrorsPolicy::Ignore => DecodePolicy::Ignore,
        }
    }
}

/// Run a command, copying its output to the terminal (or files) while
/// capturing it.
#[derive(Parser, Debug)]
#[command(name = "teerun", version)]
pub struct Args {
    /// Run COMMAND through the platform shell.
    #[arg(long)]
    pub shell: bool,

    /// Do not copy output to this process's stdout/stderr.
    #[arg(long)]
    pub no_tee: bool,

    /// Keep the output in memory (reported through --summary).
    #[arg(long)]
    pub capture: bool,

    /// Decode output as text.
    #[arg(long)]
    pub text: bool,

    /// Text encoding label, e.g. utf-8, latin1, shift_jis. Implies --text.
    #[arg(long)]
    pub encoding: Option<String>,

    /// What to do with undecodable bytes. Implies --text.
    #[arg(long, value_enum)]
    pub errors: Option<ErrorsPolicy>,

    /// Kill the command after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables for the command (KEY=VALUE).
    /// Can be specified multiple times.
    #[arg(long = "env", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub env: Vec<String>,

    /// Feed this file to the command's stdin ("-" reads our own stdin).
    #[arg(long, value_name = "PATH|-")]
    pub input_file: Option<String>,

    /// Copy stdout to this file instead of the terminal.
    #[arg(long)]
    pub stdout_file: Option<PathBuf>,

    /// Copy stderr to this file instead of the terminal.
    #[arg(long, conflicts_with = "merge_stderr")]
    pub stderr_file: Option<PathBuf>,

    /// Send stderr to wherever stdout goes.
    #[arg(long)]
    pub merge_stderr: bool,

    /// Fail when the command exits non-zero.
    #[arg(long)]
    pub check: bool,

    /// Start the command in its own process group.
    #[arg(long)]
    pub process_group: bool,

    /// Write a JSON summary of the run ("-" for stdout).
    #[arg(long, value_name = "PATH|-")]
    pub summary: Option<String>,

    /// Load configuration from this file instead of the default locations.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}
