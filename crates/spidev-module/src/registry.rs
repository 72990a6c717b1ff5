//! `HandleRegistry` — fd → worker context table.
//!
//! Append-only: contexts are never removed, closed ones just stop
//! matching lookups (their fd reads as -1). The registry lock covers the
//! sequence only; a returned context is protected by its own lock.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use spidev_core::device::SpiDevice;
use spidev_core::error::{Result, SpidevError, SubmitError};
use spidev_core::task::Task;

use crate::config::WorkerConfig;
use crate::worker::{self, WorkerContext};

#[derive(Debug, Default)]
pub struct HandleRegistry {
    contexts: Mutex<Vec<Arc<WorkerContext>>>,
    config: WorkerConfig,
}

impl HandleRegistry {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            contexts: Mutex::new(Vec::new()),
            config,
        }
    }

    fn contexts(&self) -> MutexGuard<'_, Vec<Arc<WorkerContext>>> {
        // Nothing panics while holding this lock; recover regardless.
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `device` to a new worker context and start its thread.
    ///
    /// The context is appended only after the thread exists. If the spawn
    /// fails nothing is appended and `device` is dropped (closing it).
    pub fn register<D: SpiDevice>(&self, device: D) -> Result<Arc<WorkerContext>> {
        let fd = device.fd();
        let ctx = Arc::new(WorkerContext::new(fd));

        let mut builder = thread::Builder::new().name(self.config.thread_name(fd));
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }

        worker::spawn(&ctx, device, builder).map_err(SpidevError::Spawn)?;

        self.contexts().push(Arc::clone(&ctx));
        tracing::debug!(fd, "worker context registered");
        Ok(ctx)
    }

    /// First live context bound to `fd`.
    pub fn lookup(&self, fd: RawFd) -> Option<Arc<WorkerContext>> {
        if fd < 0 {
            return None;
        }
        self.contexts().iter().find(|ctx| ctx.fd() == fd).cloned()
    }

    /// Hand `task` to the worker for `task.fd` without blocking.
    pub fn submit(&self, task: Task) -> std::result::Result<(), SubmitError<Task>> {
        match self.lookup(task.fd) {
            Some(ctx) => ctx.try_submit(task),
            None => {
                let fd = task.fd;
                Err(SubmitError::new(task, SpidevError::UnknownHandle(fd)))
            }
        }
    }

    /// Fds of contexts whose handle is still open.
    pub fn live_handles(&self) -> Vec<RawFd> {
        self.contexts()
            .iter()
            .map(|ctx| ctx.fd())
            .filter(|fd| *fd >= 0)
            .collect()
    }

    /// Every context ever registered, closed ones included.
    pub fn len(&self) -> usize {
        self.contexts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts().is_empty()
    }
}
