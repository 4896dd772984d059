mod abort;
pub mod command;
pub mod decode;
mod launch;
mod mode;
mod options;
mod runtime;
mod tee;
mod traits;
pub mod types;

pub use decode::decode_all;
pub use launch::child_exit;
pub use mode::{
    run, run_async, run_blocking, run_in, Execution, PendingRun, RunResult, SchedulerContext,
};
pub use options::RunOptions;
pub use runtime::execute;
pub use traits::ChildSession;
pub use types::{
    ChildExit, CommandLine, DecodePolicy, ExecutionResult, ExecutionSpec, ExternalSink, Output,
    Signal, SinkKind, SinkMode, StreamName, StreamSpec, TextMode,
};
