//! Runner runtime: spawns the child, drains stdout/stderr while waiting for
//! exit under an optional deadline, and freezes the final result.
use std::io;
use std::time::{Duration, Instant};

use tokio::io::AsyncRead;
use tokio::sync::watch;

use crate::error::{DecodeError, RunError, TeeWriteError};

use super::abort;
use super::launch::{self, Launched, StdinFeed};
use super::tee::{TeeOutcome, TeeTask};
use super::traits::ChildSession;
use super::types::{
    ChildExit, CommandLine, ExecutionResult, ExecutionSpec, ExternalSink, Output, SinkKind,
    StreamName,
};

/// The single engine behind every calling convention.
pub async fn execute(spec: ExecutionSpec) -> Result<ExecutionResult, RunError> {
    let started = Instant::now();
    let Launched {
        session,
        stdout,
        stderr,
        stdin,
    } = launch::launch(&spec)?;

    let ExecutionSpec {
        args,
        stdout: out_spec,
        stderr: err_spec,
        text,
        timeout,
        kill_grace,
        chunk_size,
        check,
        ..
    } = spec;

    let stdout = stdout.map(|reader| {
        TeeTask::new(
            StreamName::Stdout,
            reader,
            external(out_spec.sink),
            text,
            out_spec.capture,
            chunk_size,
        )
    });
    let stderr = stderr.map(|reader| {
        TeeTask::new(
            StreamName::Stderr,
            reader,
            external(err_spec.sink),
            text,
            err_spec.capture,
            chunk_size,
        )
    });

    assemble(Assembly {
        args,
        session: Box::new(session),
        stdout,
        stderr,
        stdin,
        timeout,
        kill_grace,
        check,
        started,
    })
    .await
}

fn external(sink: SinkKind) -> Option<ExternalSink> {
    match sink {
        SinkKind::External(s) => Some(s),
        _ => None,
    }
}

pub(crate) struct Assembly<R> {
    pub args: CommandLine,
    pub session: Box<dyn ChildSession>,
    pub stdout: Option<TeeTask<R>>,
    pub stderr: Option<TeeTask<R>>,
    pub stdin: Option<StdinFeed>,
    pub timeout: Option<Duration>,
    pub kill_grace: Duration,
    pub check: bool,
    pub started: Instant,
}

struct Exit {
    status: ChildExit,
    timed_out: bool,
}

/// Fires once the pipes should be abandoned.
#[derive(Clone)]
struct Cutoff(watch::Receiver<bool>);

impl Cutoff {
    async fn fired(mut self) {
        let fired = self.0.wait_for(|cut| *cut).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

pub(crate) async fn assemble<R>(assembly: Assembly<R>) -> Result<ExecutionResult, RunError>
where
    R: AsyncRead + Unpin,
{
    let Assembly {
        args,
        mut session,
        stdout,
        stderr,
        stdin,
        timeout,
        kill_grace,
        check,
        started,
    } = assembly;

    // Drains run until end-of-data. After a timeout or a failed wait they get
    // `kill_grace` more; a grandchild can keep the pipes open indefinitely.
    let (cut_tx, cut_rx) = watch::channel(false);
    let cutoff = Cutoff(cut_rx);
    let supervisor = async {
        let exit = supervise(session.as_mut(), timeout, kill_grace).await;
        if exit.as_ref().map_or(true, |e| e.timed_out) {
            tokio::select! {
                () = tokio::time::sleep(kill_grace) => {
                    tracing::warn!(
                        error.kind = "run.drain_cutoff",
                        grace_ms = kill_grace.as_millis() as u64,
                        "pipes still open after the child was stopped, abandoning them"
                    );
                    let _ = cut_tx.send(true);
                }
                () = cut_tx.closed() => {}
            }
        }
        exit
    };
    let (out, err, (), exit) = tokio::join!(
        drain(stdout, cutoff.clone()),
        drain(stderr, cutoff.clone()),
        feed(stdin, cutoff),
        supervisor,
    );
    let exit = exit.map_err(RunError::Wait)?;

    let stdout_bytes = out.as_ref().map_or(0, |o| o.bytes_read);
    let stderr_bytes = err.as_ref().map_or(0, |o| o.bytes_read);
    let mut failures = Failures::default();
    let stdout = failures.settle(out);
    let stderr = failures.settle(err);
    let duration_ms = started.elapsed().as_millis() as u64;

    tracing::debug!(
        exit_code = exit.status.exit_code(),
        timed_out = exit.timed_out,
        duration_ms = duration_ms,
        stdout_bytes,
        stderr_bytes,
        tee_errors = failures.tee.len(),
        "run complete"
    );

    let result = ExecutionResult {
        args,
        exit_code: exit.status.exit_code(),
        signal: exit.status.signal(),
        stdout,
        stderr,
        timed_out: exit.timed_out,
        duration_ms,
        tee_errors: failures.tee,
    };

    if exit.timed_out {
        return Err(RunError::Timeout {
            timeout: timeout.unwrap_or_default(),
            result: Box::new(result),
        });
    }
    if let Some((stream, source)) = failures.read {
        return Err(RunError::StreamIo { stream, source });
    }
    if let Some((stream, source)) = failures.decode {
        return Err(RunError::Decode {
            stream,
            source,
            result: Box::new(result),
        });
    }
    if check && result.exit_code != 0 {
        return Err(RunError::NonZeroExit {
            result: Box::new(result),
        });
    }
    Ok(result)
}

async fn drain<R>(task: Option<TeeTask<R>>, cutoff: Cutoff) -> Option<TeeOutcome>
where
    R: AsyncRead + Unpin,
{
    match task {
        Some(task) => Some(task.drain_until(cutoff.fired()).await),
        None => None,
    }
}

async fn feed(stdin: Option<StdinFeed>, cutoff: Cutoff) {
    if let Some(stdin) = stdin {
        tokio::select! {
            () = stdin.feed() => {}
            () = cutoff.fired() => {
                tracing::debug!("stdin feed abandoned");
            }
        }
    }
}

/// Waits for exit, racing the deadline when one is set. On expiry the child
/// is terminated before this returns.
async fn supervise(
    session: &mut dyn ChildSession,
    deadline: Option<Duration>,
    grace: Duration,
) -> io::Result<Exit> {
    let Some(limit) = deadline else {
        let status = session.wait().await?;
        return Ok(Exit {
            status,
            timed_out: false,
        });
    };

    match tokio::time::timeout(limit, session.wait()).await {
        Ok(status) => Ok(Exit {
            status: status?,
            timed_out: false,
        }),
        Err(_) => {
            tracing::warn!(
                error.kind = "run.timeout",
                pid = ?session.id(),
                timeout_ms = limit.as_millis() as u64,
                "deadline exceeded, terminating child"
            );
            let status = abort::terminate(session, grace).await?;
            Ok(Exit {
                status,
                timed_out: true,
            })
        }
    }
}

#[derive(Default)]
struct Failures {
    tee: Vec<TeeWriteError>,
    read: Option<(StreamName, io::Error)>,
    decode: Option<(StreamName, DecodeError)>,
}

impl Failures {
    fn settle(&mut self, outcome: Option<TeeOutcome>) -> Option<Output> {
        let outcome = outcome?;
        if let Some(e) = outcome.write_error {
            self.tee.push(e);
        }
        if let Some(e) = outcome.read_error {
            self.read.get_or_insert((outcome.stream, e));
        }
        if let Some(e) = outcome.decode_error {
            self.decode.get_or_insert((outcome.stream, e));
        }
        outcome.captured
    }
}
