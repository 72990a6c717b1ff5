//! `Dispatcher` — validates calls, builds tasks, hands them off.
//!
//! The dispatcher never blocks on a worker. A hand-off either lands in
//! the worker's single slot or is rejected on the spot, and the
//! rejection is answered here with the task's own reply.

use std::os::unix::io::RawFd;
use std::sync::{mpsc, Arc};

use spidev_core::buffer::TransferBuffers;
use spidev_core::device::DeviceOpener;
use spidev_core::error::SpidevError;
use spidev_core::outcome::{Outcome, Reply};
use spidev_core::task::{Operation, Task, Transfer};
use spidev_core::value::{MethodCall, Value};
use spidev_module::config::WorkerConfig;
use spidev_module::registry::HandleRegistry;
use spidev_module::worker::WorkerContext;

use crate::args::{self, ArgResult};
use crate::method::Method;

pub struct Dispatcher<O: DeviceOpener> {
    opener: O,
    registry: HandleRegistry,
    buffers: TransferBuffers,
}

impl<O: DeviceOpener> Dispatcher<O> {
    pub fn new(opener: O, config: WorkerConfig) -> Self {
        Self {
            opener,
            registry: HandleRegistry::new(config),
            buffers: TransferBuffers::new(),
        }
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Transfer buffer accounting.
    pub fn buffers(&self) -> &TransferBuffers {
        &self.buffers
    }

    /// Entry point for one decoded call. Delivers exactly one outcome to
    /// `reply`, now or later from the worker thread.
    pub fn handle_call(&self, call: &MethodCall, reply: Reply) {
        let method = match call.method.parse::<Method>() {
            Ok(method) => method,
            Err(_) => {
                tracing::debug!(method = %call.method, "unknown method");
                reply.send(Outcome::NotImplemented);
                return;
            }
        };

        let built = match method {
            Method::Open => return self.open(&call.arg, reply),
            Method::SetMode => args::handle_and_value::<u8>(&call.arg)
                .map(|(fd, mode)| (fd, Operation::WriteMode(mode))),
            Method::GetMode => args::handle(&call.arg).map(|fd| (fd, Operation::ReadMode)),
            Method::SetMaxSpeed => args::handle_and_value::<u32>(&call.arg)
                .map(|(fd, hz)| (fd, Operation::WriteMaxSpeed(hz))),
            Method::GetMaxSpeed => args::handle(&call.arg).map(|fd| (fd, Operation::ReadMaxSpeed)),
            Method::SetWordSize => args::handle_and_value::<u8>(&call.arg)
                .map(|(fd, bits)| (fd, Operation::WriteWordSize(bits))),
            Method::GetWordSize => args::handle(&call.arg).map(|fd| (fd, Operation::ReadWordSize)),
            Method::Transmit => self.build_transmit(&call.arg),
            Method::Close => args::handle(&call.arg).map(|fd| (fd, Operation::Close)),
        };

        match built {
            Ok((fd, op)) => {
                self.submit(Task::new(fd, op, reply));
            }
            Err(e) => {
                tracing::debug!(method = method.as_str(), error = %e, "illegal argument");
                reply.send(e.into());
            }
        }
    }

    fn build_transmit(&self, arg: &Value) -> ArgResult<(RawFd, Operation)> {
        let t = args::transmit(arg)?;
        // The only allocation on this path, after every check passed.
        let transfer = Transfer {
            speed_hz: t.speed_hz,
            delay_usecs: t.delay_usecs,
            bits_per_word: t.bits_per_word,
            cs_change: t.cs_change,
            buffer: self.buffers.acquire(t.buffer),
        };
        Ok((t.fd, Operation::Transmit(transfer)))
    }

    /// `open`: open the node, start its worker, acknowledge.
    pub fn open(&self, arg: &Value, reply: Reply) {
        let outcome = match args::path(arg) {
            Ok(path) => match self.open_path(path) {
                Ok(_) => Outcome::ack(),
                Err(e) => e.outcome(),
            },
            Err(e) => e.into(),
        };
        reply.send(outcome);
    }

    /// Open `path` and register a worker for it. Returns the new handle.
    pub fn open_path(&self, path: &str) -> Result<RawFd, SpidevError> {
        let device = self.opener.open(path).map_err(|errno| {
            tracing::warn!(path, %errno, "open failed");
            SpidevError::Os(errno)
        })?;
        let ctx = self.registry.register(device).map_err(|e| {
            tracing::warn!(path, error = %e, "worker registration failed");
            e
        })?;
        tracing::info!(path, fd = ctx.fd(), "device opened");
        Ok(ctx.fd())
    }

    /// Hand `task` to its worker, answering rejections immediately.
    ///
    /// Returns whether the task was accepted. A rejected transmit's
    /// buffer is released here since no worker ever owned it.
    pub fn submit(&self, task: Task) -> bool {
        match self.registry.submit(task) {
            Ok(()) => true,
            Err(err) => {
                let (task, error) = err.into_parts();
                match &error {
                    SpidevError::Busy(fd) => {
                        tracing::warn!(fd, op = task.op.name(), "handle busy; task rejected");
                    }
                    other => {
                        tracing::warn!(fd = task.fd, op = task.op.name(), error = %other, "task rejected");
                    }
                }
                task.reply.send(error.outcome());
                false
            }
        }
    }

    /// Close every live handle and join the workers that stop.
    ///
    /// A busy handle cannot be closed without cancelling its task, so it
    /// is reported and left running. Returns the number of handles
    /// closed.
    pub fn shutdown(&self) -> usize {
        let mut closed = 0;
        for fd in self.registry.live_handles() {
            let Some(ctx) = self.registry.lookup(fd) else {
                continue;
            };
            if self.close_context(fd, &ctx) {
                closed += 1;
            }
        }
        tracing::info!(closed, "shutdown complete");
        closed
    }

    fn close_context(&self, fd: RawFd, ctx: &Arc<WorkerContext>) -> bool {
        let (tx, rx) = mpsc::channel();
        let reply = Reply::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        if let Err(err) = ctx.try_submit(Task::new(fd, Operation::Close, reply)) {
            let (rejected, error) = err.into_parts();
            tracing::warn!(fd, error = %error, "handle left open at shutdown");
            rejected.reply.send(error.outcome());
            return false;
        }
        match rx.recv() {
            Ok(outcome) if outcome.is_success() => {
                ctx.join();
                true
            }
            Ok(outcome) => {
                tracing::warn!(fd, %outcome, "close failed at shutdown");
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use spidev_module::fake::{FakeBus, FakeOp};
    use std::time::Duration;

    fn dispatcher(bus: &FakeBus) -> Dispatcher<spidev_module::fake::FakeOpener> {
        Dispatcher::new(bus.opener(), WorkerConfig::default())
    }

    fn call(d: &Dispatcher<impl DeviceOpener>, method: &str, arg: Value) -> Outcome {
        let (tx, rx) = mpsc::channel();
        d.handle_call(
            &MethodCall::new(method, arg),
            Reply::new(move |o| {
                let _ = tx.send(o);
            }),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_open_path_returns_fd() {
        let bus = FakeBus::new();
        let d = dispatcher(&bus);
        let fd = d.open_path("/dev/spidev0.0").unwrap();
        assert_eq!(d.registry().live_handles(), vec![fd]);
    }

    #[test]
    fn test_open_failure_registers_nothing() {
        let bus = FakeBus::new();
        bus.fail_next(FakeOp::Open, Errno::EACCES);
        let d = dispatcher(&bus);
        assert_eq!(
            call(&d, "open", Value::from("/dev/spidev0.0")),
            Outcome::NativeError(Errno::EACCES)
        );
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_rejected_transmit_releases_buffer() {
        let bus = FakeBus::new();
        let d = dispatcher(&bus);
        let arg = Value::map([
            ("fd", Value::Int(4242)),
            ("speed", Value::Int(1_000_000)),
            ("delay", Value::Int(0)),
            ("wordSize", Value::Int(8)),
            ("csChange", Value::Bool(false)),
            ("buffer", Value::Uint8List(vec![0; 8])),
        ]);
        assert_eq!(call(&d, "transmit", arg), Outcome::NativeError(Errno::EBADF));
        assert_eq!(d.buffers().total(), 1);
        assert_eq!(d.buffers().in_use(), 0);
    }

    #[test]
    fn test_shutdown_closes_idle_handles() {
        let bus = FakeBus::new();
        let d = dispatcher(&bus);
        let a = d.open_path("/dev/spidev0.0").unwrap();
        let b = d.open_path("/dev/spidev0.1").unwrap();

        assert_eq!(d.shutdown(), 2);
        assert!(d.registry().live_handles().is_empty());
        assert_eq!(d.registry().len(), 2);
        assert_eq!(call(&d, "getMode", Value::Int(a.into())), Outcome::NativeError(Errno::EBADF));
        assert_eq!(call(&d, "getMode", Value::Int(b.into())), Outcome::NativeError(Errno::EBADF));
    }

    #[test]
    fn test_shutdown_right_after_reply() {
        let bus = FakeBus::new();
        let d = dispatcher(&bus);
        let fd = d.open_path("/dev/spidev0.0").unwrap();

        let arg = Value::List(vec![Value::Int(fd.into()), Value::Int(1_000_000)]);
        assert_eq!(call(&d, "setMaxSpeed", arg), Outcome::ack());
        assert_eq!(d.shutdown(), 1);
        assert!(d.registry().live_handles().is_empty());
    }

    #[test]
    fn test_shutdown_ignores_retired_handle() {
        let bus = FakeBus::new();
        let d = dispatcher(&bus);
        let fd = d.open_path("/dev/spidev0.0").unwrap();
        bus.panic_next(FakeOp::ReadMode);

        assert_eq!(
            call(&d, "getMode", Value::Int(fd.into())),
            Outcome::NativeError(Errno::EOWNERDEAD)
        );
        assert_eq!(d.shutdown(), 0);
    }

    #[test]
    fn test_shutdown_skips_busy_handle() {
        let bus = FakeBus::new();
        let gate = bus.hold_transfers();
        let d = dispatcher(&bus);
        let fd = d.open_path("/dev/spidev0.0").unwrap();

        let (tx, rx) = mpsc::channel();
        d.handle_call(
            &MethodCall::new(
                "transmit",
                Value::map([
                    ("fd", Value::Int(fd.into())),
                    ("speed", Value::Int(1_000_000)),
                    ("delay", Value::Int(0)),
                    ("wordSize", Value::Int(8)),
                    ("csChange", Value::Bool(false)),
                    ("buffer", Value::Uint8List(vec![1])),
                ]),
            ),
            Reply::new(move |o| {
                let _ = tx.send(o);
            }),
        );
        gate.wait_entered(1);

        assert_eq!(d.shutdown(), 0);
        assert_eq!(d.registry().live_handles(), vec![fd]);

        gate.release();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::ack());
    }
}
