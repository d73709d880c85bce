//! Executors that run jobs away from the caller.

use tokio::runtime::Handle;

use crate::Result;

/// A unit of work handed to a [`JobRunner`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted tasks, usually on another thread.
///
/// `submit` returns once the task is accepted, not when it finishes.
pub trait JobRunner: Send + Sync {
    fn submit(&self, task: Task) -> Result<()>;
}

/// Runs tasks on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioRunner {
    handle: Handle,
}

impl TokioRunner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Runner bound to the runtime the caller is running in.
    pub fn current() -> Result<Self> {
        Ok(Self::new(Handle::try_current()?))
    }
}

impl JobRunner for TokioRunner {
    fn submit(&self, task: Task) -> Result<()> {
        // The join handle is dropped: progress is observed through the tracker.
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}

/// Runs every task on a fresh OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRunner;

impl JobRunner for ThreadRunner {
    fn submit(&self, task: Task) -> Result<()> {
        std::thread::Builder::new()
            .name("ext-job".to_string())
            .spawn(task)?;
        Ok(())
    }
}

/// Runs tasks on the calling thread before `submit` returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineRunner;

impl JobRunner for InlineRunner {
    fn submit(&self, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}
