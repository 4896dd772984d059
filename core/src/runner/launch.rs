use std::io;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use crate::error::LaunchError;

use super::tee::PipeReader;
use super::traits::ChildSession;
use super::types::{ChildExit, ExecutionSpec, Signal, SinkKind, StreamSpec};

/// A spawned child with its pipes, ready for the tee tasks.
pub struct Launched {
    pub session: TokioChildSession,
    pub stdout: Option<PipeReader>,
    pub stderr: Option<PipeReader>,
    pub stdin: Option<StdinFeed>,
}

pub fn launch(spec: &ExecutionSpec) -> Result<Launched, LaunchError> {
    if spec.program.is_empty() {
        return Err(LaunchError::EmptyCommand);
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.program_args);
    if let Some(dir) = spec.cwd.as_deref() {
        cmd.current_dir(dir);
    }
    if let Some(env) = spec.env.as_ref() {
        cmd.env_clear();
        cmd.envs(env.iter().map(|(k, v)| (k, v)));
    }
    cmd.stdin(if spec.input.is_some() {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });
    let merged = wire_streams(&mut cmd, &spec.stdout, &spec.stderr)?;

    #[cfg(unix)]
    {
        if spec.process_group {
            cmd.process_group(0);
        }
    }
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: spec.program.to_string_lossy().into_owned(),
        source,
    })?;
    // Our copies of the pipe write ends live in `cmd`; they must be closed
    // or the readers never see end-of-data.
    drop(cmd);

    tracing::debug!(
        program = %spec.program.to_string_lossy(),
        pid = ?child.id(),
        "child spawned"
    );

    let stdout = match merged {
        Some(reader) => Some(reader),
        None => child
            .stdout
            .take()
            .map(|s| Box::new(s) as PipeReader),
    };
    let stderr = child
        .stderr
        .take()
        .map(|s| Box::new(s) as PipeReader);
    let stdin = match (child.stdin.take(), spec.input.as_ref()) {
        (Some(pipe), Some(payload)) => Some(StdinFeed {
            pipe,
            payload: payload.clone(),
        }),
        _ => None,
    };

    Ok(Launched {
        session: TokioChildSession {
            child,
            group: spec.process_group,
        },
        stdout,
        stderr,
        stdin,
    })
}

fn stdio_for(sink: &SinkKind) -> Stdio {
    match sink {
        SinkKind::Discard => Stdio::null(),
        SinkKind::CaptureOnly | SinkKind::External(_) => Stdio::piped(),
        SinkKind::Inherit | SinkKind::MergeIntoStdout => Stdio::inherit(),
    }
}

/// Sets up stdout/stderr. Returns the reader of a shared pipe when stderr is
/// merged into a piped stdout.
fn wire_streams(
    cmd: &mut Command,
    stdout: &StreamSpec,
    stderr: &StreamSpec,
) -> Result<Option<PipeReader>, LaunchError> {
    if !matches!(stderr.sink, SinkKind::MergeIntoStdout) {
        cmd.stdout(stdio_for(&stdout.sink));
        cmd.stderr(stdio_for(&stderr.sink));
        return Ok(None);
    }

    match &stdout.sink {
        SinkKind::CaptureOnly | SinkKind::External(_) => {
            let (reader, out_end, err_end) = shared_pipe()?;
            cmd.stdout(out_end);
            cmd.stderr(err_end);
            Ok(Some(reader))
        }
        SinkKind::Discard => {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
            Ok(None)
        }
        SinkKind::Inherit | SinkKind::MergeIntoStdout => {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(parent_stdout().map_err(LaunchError::Pipe)?);
            Ok(None)
        }
    }
}

#[cfg(unix)]
fn shared_pipe() -> Result<(PipeReader, Stdio, Stdio), LaunchError> {
    use std::os::fd::AsRawFd;

    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let pipe = || -> io::Result<(PipeReader, Stdio, Stdio)> {
        let (read_fd, write_fd) = nix::unistd::pipe()?;
        for fd in [&read_fd, &write_fd] {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        }
        let receiver =
            tokio::net::unix::pipe::Receiver::from_file(std::fs::File::from(read_fd))?;
        let err_end = write_fd.try_clone()?;
        Ok((
            Box::new(receiver),
            Stdio::from(write_fd),
            Stdio::from(err_end),
        ))
    };
    pipe().map_err(LaunchError::Pipe)
}

#[cfg(not(unix))]
fn shared_pipe() -> Result<(PipeReader, Stdio, Stdio), LaunchError> {
    Err(LaunchError::MergeUnsupported)
}

#[cfg(unix)]
fn parent_stdout() -> io::Result<Stdio> {
    use std::os::fd::AsFd;
    Ok(Stdio::from(io::stdout().as_fd().try_clone_to_owned()?))
}

#[cfg(windows)]
fn parent_stdout() -> io::Result<Stdio> {
    use std::os::windows::io::AsHandle;
    Ok(Stdio::from(io::stdout().as_handle().try_clone_to_owned()?))
}

/// Pending stdin payload. Written concurrently with draining so a child that
/// produces output before reading all of its input cannot deadlock us.
pub struct StdinFeed {
    pipe: ChildStdin,
    payload: Vec<u8>,
}

impl StdinFeed {
    pub async fn feed(mut self) {
        if let Err(e) = self.pipe.write_all(&self.payload).await {
            if e.kind() == io::ErrorKind::BrokenPipe {
                tracing::debug!("child closed stdin before reading all input");
            } else {
                tracing::warn!(error.kind = "stdin.write_failed", error = %e);
            }
        }
        // dropping the pipe sends EOF
    }
}

pub struct TokioChildSession {
    child: Child,
    group: bool,
}

#[async_trait]
impl ChildSession for TokioChildSession {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    async fn signal(&mut self, signal: Signal) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg, Signal as NixSignal};
        use nix::unistd::Pid;

        // already reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let sig = match signal {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        let pid = Pid::from_raw(pid as i32);
        let res = if self.group {
            killpg(pid, sig)
        } else {
            kill(pid, sig)
        };
        match res {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(not(unix))]
    async fn signal(&mut self, _signal: Signal) -> io::Result<()> {
        match self.child.start_kill() {
            Err(e) if e.kind() != io::ErrorKind::InvalidInput => Err(e),
            _ => Ok(()),
        }
    }

    async fn wait(&mut self) -> io::Result<ChildExit> {
        let status = self.child.wait().await?;
        Ok(child_exit(status))
    }
}

pub fn child_exit(status: ExitStatus) -> ChildExit {
    if let Some(code) = status.code() {
        return ChildExit::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ChildExit::Signal(sig);
        }
    }
    ChildExit::Unknown
}
