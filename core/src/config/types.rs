use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "teerun_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// Tunables shared by every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Bytes requested per pipe read.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Time between SIGTERM and SIGKILL once a deadline expires.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Encoding label used when text mode is on and no encoding was given.
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_chunk_size() -> usize {
    32 * 1024
}

fn default_kill_grace_ms() -> u64 {
    200
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            kill_grace_ms: default_kill_grace_ms(),
            encoding: default_encoding(),
        }
    }
}

impl RunnerConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
