//! teerun-core: run a child process while teeing its output to external
//! sinks and capturing it, from blocking or async callers.

pub mod config;
pub mod error;
pub mod runner;

pub use error::{LaunchError, RunError, TeeWriteError};
pub use runner::{
    run, run_async, run_blocking, run_in, Execution, ExecutionResult, Output, RunOptions,
    SchedulerContext, SinkKind,
};
