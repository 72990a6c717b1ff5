//! `WorkerContext` — one blocking thread bound to one device handle.
//!
//! The context owns a single-slot mailbox guarded by a mutex. The worker
//! thread holds that mutex for the whole time it executes a task, so a
//! dispatcher that tries the mutex with `try_lock` learns "busy"
//! without ever blocking:
//!
//! ```text
//!            try_submit                         worker thread
//!   ─────────────────────────────      ───────────────────────────────
//!   try_lock ── WouldBlock:            lock
//!                Executing → Busy      wait(task_added) until slot full
//!                otherwise → lock      take task          ┐
//!   closed?     → EBADF                execute (blocking) │ lock held
//!   slot full?  → Busy                 state = Idle       ┘
//!   store task, state = Executing      unlock, reply, loop
//!   unlock, notify
//! ```
//!
//! `Idle` means nothing is pending or running. The worker re-takes the
//! lock after each reply before it waits again; a hand-off that meets
//! the lock held while the state reads `Idle` waits out that moment
//! instead of answering busy. `spawn` returns only once the worker is
//! parked.
//!
//! A successful close ends the loop. So does a panic inside an
//! operation: the device is dropped and the caller gets `EOWNERDEAD`.
//! Either way the context stays in the registry but its fd reads as -1
//! and it rejects further hand-offs.

use std::io;
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};

use nix::errno::Errno;

use spidev_core::device::SpiDevice;
use spidev_core::error::{SpidevError, SubmitError};
use spidev_core::outcome::Outcome;
use spidev_core::task::{Operation, Task};
use spidev_core::value::Value;

/// Lifecycle of a worker.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a task.
    Idle = 0,
    /// Performing a blocking operation.
    Executing = 1,
    /// Handle closed, thread exited (or exiting).
    Terminated = 2,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Executing,
            _ => WorkerState::Terminated,
        }
    }
}

#[derive(Default)]
struct Mailbox {
    /// `Some` = task pending. Filled only by `try_submit`, emptied only
    /// by the worker.
    task: Option<Task>,
    /// Set by the worker once the handle is released.
    closed: bool,
}

pub struct WorkerContext {
    /// Bound fd, -1 once released. Atomic so registry scans never wait on
    /// `mailbox` (the worker holds it across blocking calls).
    fd: AtomicI32,
    state: AtomicU8,
    mailbox: Mutex<Mailbox>,
    task_added: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerContext {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            fd: AtomicI32::new(fd),
            state: AtomicU8::new(WorkerState::Idle as u8),
            mailbox: Mutex::new(Mailbox::default()),
            task_added: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    /// Bound fd, or -1 once the handle is released.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.state() == WorkerState::Terminated
    }

    #[inline]
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn set_thread(&self, handle: JoinHandle<()>) {
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Non-blocking hand-off of `task` to this worker.
    ///
    /// `Ok` means accepted for execution, not completed: the worker sends
    /// the terminal reply later. On `Err` the task comes back untouched
    /// and the caller owns the reply.
    pub fn try_submit(&self, task: Task) -> Result<(), SubmitError<Task>> {
        let fd = task.fd;
        let mut mailbox = match self.lock_unless_executing(fd) {
            Ok(Some(guard)) => guard,
            Ok(None) => return Err(SubmitError::new(task, SpidevError::Busy(fd))),
            Err(error) => return Err(SubmitError::new(task, error)),
        };

        if mailbox.closed {
            return Err(SubmitError::new(task, SpidevError::UnknownHandle(fd)));
        }
        // Handed off but not yet picked up by the worker.
        if mailbox.task.is_some() {
            return Err(SubmitError::new(task, SpidevError::Busy(fd)));
        }

        tracing::debug!(fd, op = task.op.name(), "task handed off");
        mailbox.task = Some(task);
        self.set_state(WorkerState::Executing);
        drop(mailbox);
        self.task_added.notify_one();
        Ok(())
    }

    /// Take the mailbox lock, or `None` if a task holds it.
    ///
    /// Outside `Executing` the worker only holds the lock on its way back
    /// to the condvar, so waiting for it is short.
    fn lock_unless_executing(
        &self,
        fd: RawFd,
    ) -> Result<Option<MutexGuard<'_, Mailbox>>, SpidevError> {
        match self.mailbox.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) if self.state() == WorkerState::Executing => Ok(None),
            Err(TryLockError::WouldBlock) => self
                .mailbox
                .lock()
                .map(Some)
                .map_err(|_| SpidevError::Poisoned(fd)),
            Err(TryLockError::Poisoned(_)) => Err(SpidevError::Poisoned(fd)),
        }
    }

    /// Join the worker thread once it has terminated.
    ///
    /// Returns `false` (without blocking) while the worker is still live,
    /// or if it was already joined.
    pub fn join(&self) -> bool {
        if !self.is_terminated() {
            return false;
        }
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => handle.join().is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("fd", &self.fd())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Start the worker thread for `ctx` on `builder`.
///
/// Returns once the worker is parked on its condition, so the first
/// hand-off never sees the startup lock. If the spawn fails `device` is
/// dropped with the closure.
pub(crate) fn spawn<D: SpiDevice>(
    ctx: &Arc<WorkerContext>,
    device: D,
    builder: thread::Builder,
) -> io::Result<()> {
    let (ready_tx, ready_rx) = mpsc::channel();
    let worker_ctx = Arc::clone(ctx);
    let handle = builder.spawn(move || run(worker_ctx, device, ready_tx))?;

    // The signal is sent under the mailbox lock; the lock frees up only
    // when the worker waits.
    if ready_rx.recv().is_ok() {
        drop(ctx.mailbox.lock().unwrap_or_else(PoisonError::into_inner));
    }
    ctx.set_thread(handle);
    Ok(())
}

/// Worker thread main loop.
///
/// Runs until a close releases the handle or an operation panics. The
/// device is owned by this thread and dropped when the loop ends.
fn run<D: SpiDevice>(ctx: Arc<WorkerContext>, mut device: D, ready: mpsc::Sender<()>) {
    let fd = ctx.fd();
    tracing::info!(fd, "worker started");
    let mut ready = Some(ready);

    loop {
        // Operations run under `catch_unwind`, so nothing on this thread
        // panics with the guard held.
        let mut mailbox = ctx.mailbox.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ready) = ready.take() {
            let _ = ready.send(());
        }
        let task = loop {
            if let Some(task) = mailbox.task.take() {
                break task;
            }
            mailbox = ctx
                .task_added
                .wait(mailbox)
                .unwrap_or_else(PoisonError::into_inner);
        };

        let Task { op, reply, .. } = task;
        let op_name = op.name();
        let executed = panic::catch_unwind(AssertUnwindSafe(|| execute(&ctx, &mut device, op)));

        let Ok((outcome, released)) = executed else {
            retire(&ctx, &mut mailbox);
            drop(mailbox);
            tracing::error!(fd, op = op_name, "operation panicked; handle retired");
            // Give the number back before anyone can learn of the failure.
            drop(device);
            reply.send(Outcome::NativeError(Errno::EOWNERDEAD));
            break;
        };

        if released {
            retire(&ctx, &mut mailbox);
        } else {
            ctx.set_state(WorkerState::Idle);
        }
        drop(mailbox);

        match &outcome {
            Outcome::NativeError(errno) => {
                tracing::warn!(fd, op = op_name, %errno, "operation failed");
            }
            _ => tracing::debug!(fd, op = op_name, "operation complete"),
        }
        reply.send(outcome);

        if released {
            break;
        }
    }

    tracing::info!(fd, "worker exiting");
}

/// Mark the context dead. Called with the mailbox lock held.
fn retire(ctx: &WorkerContext, mailbox: &mut Mailbox) {
    mailbox.closed = true;
    ctx.fd.store(-1, Ordering::Release);
    ctx.set_state(WorkerState::Terminated);
}

/// Perform one operation. Returns the outcome and whether the handle
/// was released.
fn execute<D: SpiDevice>(ctx: &WorkerContext, device: &mut D, op: Operation) -> (Outcome, bool) {
    let result = match op {
        Operation::Close => return close(ctx, device),
        Operation::ReadMode => device.mode().map(|m| Some(Value::Int(m.into()))),
        Operation::WriteMode(mode) => device.set_mode(mode).map(|()| None),
        Operation::ReadWordSize => device.word_size().map(|b| Some(Value::Int(b.into()))),
        Operation::WriteWordSize(bits) => device.set_word_size(bits).map(|()| None),
        Operation::ReadMaxSpeed => device.max_speed().map(|hz| Some(Value::Int(hz.into()))),
        Operation::WriteMaxSpeed(hz) => device.set_max_speed(hz).map(|()| None),
        Operation::Transmit(mut transfer) => {
            let result = device.transfer(&mut transfer);
            // Release point for the buffer on both paths.
            drop(transfer);
            result.map(|()| None)
        }
    };

    match result {
        Ok(value) => (Outcome::Success(value), false),
        Err(errno) => (Outcome::NativeError(errno), false),
    }
}

/// The fd stops matching before the kernel can hand the number out
/// again. A failure that left the device open restores it.
fn close<D: SpiDevice>(ctx: &WorkerContext, device: &mut D) -> (Outcome, bool) {
    let fd = ctx.fd.swap(-1, Ordering::AcqRel);
    let result = device.close();
    let released = result.is_ok() || device.fd() < 0;
    if !released {
        ctx.fd.store(fd, Ordering::Release);
    }
    match result {
        Ok(()) => (Outcome::ack(), released),
        Err(errno) => (Outcome::NativeError(errno), released),
    }
}
