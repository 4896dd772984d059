use std::io;
use std::time::Duration;

use super::traits::ChildSession;
use super::types::{ChildExit, Signal};

/// Ask the child to stop, give it `grace` to exit, then kill it. Returns how
/// the child ended once it is gone.
pub async fn terminate(
    session: &mut dyn ChildSession,
    grace: Duration,
) -> io::Result<ChildExit> {
    if let Err(e) = session.signal(Signal::Term).await {
        tracing::warn!(error.kind = "child.term_failed", pid = ?session.id(), error = %e);
    }

    match tokio::time::timeout(grace, session.wait()).await {
        Ok(res) => res,
        Err(_) => {
            tracing::warn!(
                error.kind = "child.kill",
                pid = ?session.id(),
                grace_ms = grace.as_millis() as u64,
                "child still running after SIGTERM, escalating to SIGKILL"
            );
            session.signal(Signal::Kill).await?;
            session.wait().await
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::watch;

    /// Child stand-in that exits only on the signals it honours.
    pub(crate) struct FakeChild {
        pub honours_term: bool,
        pub signals: Vec<Signal>,
        exited: watch::Sender<Option<ChildExit>>,
    }

    impl FakeChild {
        pub(crate) fn new(honours_term: bool) -> Self {
            Self {
                honours_term,
                signals: vec![],
                exited: watch::channel(None).0,
            }
        }

        pub(crate) fn exiting_after(delay: Duration, code: i32) -> Self {
            let child = Self::new(true);
            let tx = child.exited.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                tx.send_replace(Some(ChildExit::Code(code)));
            });
            child
        }

        pub(crate) fn exit_watch(&self) -> watch::Receiver<Option<ChildExit>> {
            self.exited.subscribe()
        }
    }

    #[async_trait]
    impl ChildSession for FakeChild {
        fn id(&self) -> Option<u32> {
            Some(4242)
        }

        async fn signal(&mut self, signal: Signal) -> io::Result<()> {
            self.signals.push(signal);
            match signal {
                Signal::Term if self.honours_term => {
                    self.exited.send_replace(Some(ChildExit::Signal(15)));
                }
                Signal::Kill => {
                    self.exited.send_replace(Some(ChildExit::Signal(9)));
                }
                Signal::Term => {}
            }
            Ok(())
        }

        async fn wait(&mut self) -> io::Result<ChildExit> {
            let mut rx = self.exited.subscribe();
            let exit = *rx
                .wait_for(|c| c.is_some())
                .await
                .map_err(|_| io::Error::other("fake child dropped"))?;
            Ok(exit.unwrap_or(ChildExit::Unknown))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn term_is_enough_for_a_cooperative_child() {
        let mut child = FakeChild::new(true);
        let exit = terminate(&mut child, Duration::from_millis(200)).await.unwrap();
        assert_eq!(exit, ChildExit::Signal(15));
        assert_eq!(child.signals, vec![Signal::Term]);
    }

    #[tokio::test(start_paused = true)]
    async fn escalates_to_kill_after_grace() {
        let mut child = FakeChild::new(false);
        let started = tokio::time::Instant::now();
        let exit = terminate(&mut child, Duration::from_millis(200)).await.unwrap();
        assert_eq!(exit, ChildExit::Signal(9));
        assert_eq!(child.signals, vec![Signal::Term, Signal::Kill]);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
