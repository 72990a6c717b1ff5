//! spidev dispatch error types.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use thiserror::Error;

use crate::outcome::Outcome;

#[derive(Debug, Error)]
pub enum SpidevError {
    /// No live worker context is bound to this fd.
    #[error("no worker context for fd {0}")]
    UnknownHandle(RawFd),

    /// The worker for this fd has a task pending or executing.
    #[error("fd {0} already has a task pending")]
    Busy(RawFd),

    /// The worker's lock is poisoned.
    #[error("worker for fd {0} died while holding its lock")]
    Poisoned(RawFd),

    /// Failed to spawn the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// OS error with errno.
    #[error("OS error: {0}")]
    Os(#[from] Errno),
}

impl SpidevError {
    /// Errno reported to the caller for non-busy failures.
    pub fn errno(&self) -> Errno {
        match self {
            Self::UnknownHandle(_) => Errno::EBADF,
            Self::Busy(_) => Errno::EBUSY,
            Self::Poisoned(_) => Errno::EOWNERDEAD,
            Self::Spawn(e) => e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EAGAIN),
            Self::Os(e) => *e,
        }
    }

    /// Outcome delivered to the caller for this failure.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Busy(_) => Outcome::Busy,
            other => Outcome::NativeError(other.errno()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpidevError>;

/// A rejected hand-off. Carries the task back so the caller can reply.
#[derive(Error)]
#[error("submit rejected: {error}")]
pub struct SubmitError<T> {
    pub task: T,
    pub error: SpidevError,
}

impl<T> SubmitError<T> {
    pub fn new(task: T, error: SpidevError) -> Self {
        Self { task, error }
    }

    pub fn into_parts(self) -> (T, SpidevError) {
        (self.task, self.error)
    }
}

impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
