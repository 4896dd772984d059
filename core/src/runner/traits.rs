use std::io;

use async_trait::async_trait;

use super::types::{ChildExit, Signal};

/// A running child as seen by the result assembler, which owns it
/// exclusively and is the only caller allowed to signal it.
#[async_trait]
pub trait ChildSession: Send {
    fn id(&self) -> Option<u32>;
    async fn signal(&mut self, signal: Signal) -> io::Result<()>;
    /// Waits for exit. Cancel safe.
    async fn wait(&mut self) -> io::Result<ChildExit>;
}
