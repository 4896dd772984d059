//! One entry point for blocking and async callers.
//!
//! The engine is a single future. Inside a tokio runtime `run` hands it back
//! unstarted as a [`PendingRun`]; otherwise it builds a current-thread runtime
//! and drives the future to completion before returning.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::RunError;

use super::options::RunOptions;
use super::runtime;
use super::types::{CommandLine, ExecutionResult};

pub type RunResult = Result<ExecutionResult, RunError>;

/// Whether the caller is already being driven by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerContext {
    /// Probe for a tokio runtime on the calling thread.
    ///
    /// `spawn_blocking` threads and code under `Runtime::enter` also see a
    /// runtime, so they get a pending handle. Blocking code there should use
    /// `Idle` or [`run_blocking`].
    #[default]
    Detect,
    /// Treat the caller as async: always return a pending handle.
    Active,
    /// Treat the caller as blocking: always run to completion.
    Idle,
}

impl SchedulerContext {
    pub fn is_active(self) -> bool {
        match self {
            SchedulerContext::Detect => tokio::runtime::Handle::try_current().is_ok(),
            SchedulerContext::Active => true,
            SchedulerContext::Idle => false,
        }
    }
}

/// The engine future, not yet polled. Spawning happens on first poll, so the
/// child does not exist until this is awaited.
#[must_use = "a pending run does nothing unless awaited"]
pub struct PendingRun {
    inner: BoxFuture<'static, RunResult>,
}

impl PendingRun {
    fn new(cmd: CommandLine, options: RunOptions) -> Self {
        Self {
            inner: engine(cmd, options).boxed(),
        }
    }

    /// Drive this run from blocking code.
    pub fn wait(self) -> RunResult {
        drive_blocking(self.inner)
    }
}

impl Future for PendingRun {
    type Output = RunResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for PendingRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRun").finish_non_exhaustive()
    }
}

/// What `run` hands back: a finished result or a handle to await.
#[derive(Debug)]
pub enum Execution {
    Completed(RunResult),
    Pending(PendingRun),
}

impl Execution {
    pub fn is_pending(&self) -> bool {
        matches!(self, Execution::Pending(_))
    }

    /// Resolve either variant from blocking code.
    pub fn wait(self) -> RunResult {
        match self {
            Execution::Completed(res) => res,
            Execution::Pending(pending) => pending.wait(),
        }
    }
}

impl IntoFuture for Execution {
    type Output = RunResult;
    type IntoFuture = BoxFuture<'static, RunResult>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Execution::Completed(res) => futures::future::ready(res).boxed(),
            Execution::Pending(pending) => pending.inner,
        }
    }
}

/// Runs `cmd`, completing it here unless a tokio runtime is detected on this
/// thread. Any thread inside a runtime context counts, including the blocking
/// pool; [`Execution::wait`] resolves either variant from such a thread.
pub fn run(cmd: impl Into<CommandLine>, options: RunOptions) -> Execution {
    run_in(SchedulerContext::Detect, cmd, options)
}

pub fn run_in(
    context: SchedulerContext,
    cmd: impl Into<CommandLine>,
    options: RunOptions,
) -> Execution {
    let pending = PendingRun::new(cmd.into(), options);
    if context.is_active() {
        Execution::Pending(pending)
    } else {
        Execution::Completed(pending.wait())
    }
}

pub fn run_blocking(cmd: impl Into<CommandLine>, options: RunOptions) -> RunResult {
    PendingRun::new(cmd.into(), options).wait()
}

pub async fn run_async(cmd: impl Into<CommandLine>, options: RunOptions) -> RunResult {
    PendingRun::new(cmd.into(), options).await
}

async fn engine(cmd: CommandLine, options: RunOptions) -> RunResult {
    let spec = options.into_spec(cmd)?;
    runtime::execute(spec).await
}

fn drive_blocking(fut: BoxFuture<'static, RunResult>) -> RunResult {
    // block_on panics on a thread that is already inside a runtime, so the
    // engine gets a helper thread with its own scheduler there.
    if tokio::runtime::Handle::try_current().is_err() {
        return block_on_fresh(fut);
    }
    tracing::debug!("blocking run requested inside a runtime, using a helper thread");
    std::thread::scope(|scope| {
        match scope.spawn(move || block_on_fresh(fut)).join() {
            Ok(res) => res,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

fn block_on_fresh(fut: BoxFuture<'static, RunResult>) -> RunResult {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(RunError::Scheduler)?;
    rt.block_on(fut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_sees_no_runtime_on_a_plain_thread() {
        assert!(!SchedulerContext::Detect.is_active());
        assert!(SchedulerContext::Active.is_active());
        assert!(!SchedulerContext::Idle.is_active());
    }

    #[tokio::test]
    async fn detect_sees_the_test_runtime() {
        assert!(SchedulerContext::Detect.is_active());
    }

    #[test]
    fn config_errors_surface_through_both_paths() {
        let opts = || RunOptions::new().encoding("no-such-encoding");

        let completed = run_in(SchedulerContext::Idle, ["true"], opts());
        assert!(!completed.is_pending());
        assert!(matches!(completed.wait(), Err(RunError::Config(_))));

        let pending = run_in(SchedulerContext::Active, ["true"], opts());
        assert!(pending.is_pending());
        let res = futures::executor::block_on(pending.into_future());
        assert!(matches!(res, Err(RunError::Config(_))));
    }

    #[tokio::test]
    async fn pending_run_is_lazy_until_awaited() {
        let exec = run(["definitely-not-a-real-program-xyz"], RunOptions::new());
        assert!(exec.is_pending());
        // nothing was spawned yet; the launch failure only shows up on await
        let res = exec.await;
        assert!(matches!(res, Err(RunError::Launch(_))));
    }
}
