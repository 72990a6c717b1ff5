//! End-to-end behaviour of the dispatcher over fake devices.

use std::os::unix::io::RawFd;
use std::sync::mpsc;
use std::time::Duration;

use nix::errno::Errno;
use rstest::rstest;

use spidev_core::outcome::{Outcome, Reply};
use spidev_core::value::{MethodCall, Value};
use spidev_dispatch::Dispatcher;
use spidev_module::config::WorkerConfig;
use spidev_module::fake::{FakeBus, FakeOp, FakeOpener};

const NODE: &str = "/dev/spidevtest";

struct Harness {
    bus: FakeBus,
    dispatcher: Dispatcher<FakeOpener>,
}

impl Harness {
    fn new() -> Self {
        let bus = FakeBus::new();
        let dispatcher = Dispatcher::new(bus.opener(), WorkerConfig::default());
        Self { bus, dispatcher }
    }

    /// Start a call; the receiver yields its single outcome.
    fn start(&self, method: &str, arg: Value) -> mpsc::Receiver<Outcome> {
        let (tx, rx) = mpsc::channel();
        self.dispatcher.handle_call(
            &MethodCall::new(method, arg),
            Reply::new(move |o| {
                let _ = tx.send(o);
            }),
        );
        rx
    }

    fn call(&self, method: &str, arg: Value) -> Outcome {
        recv(&self.start(method, arg))
    }

    fn open(&self) -> RawFd {
        let before = self.dispatcher.registry().live_handles();
        assert_eq!(self.call("open", Value::from(NODE)), Outcome::ack());
        let after = self.dispatcher.registry().live_handles();
        *after.iter().find(|fd| !before.contains(fd)).unwrap()
    }
}

fn recv(rx: &mpsc::Receiver<Outcome>) -> Outcome {
    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(20)).is_err(), "second reply delivered");
    outcome
}

fn fd_arg(fd: RawFd) -> Value {
    Value::Int(fd.into())
}

fn pair(fd: RawFd, value: i64) -> Value {
    Value::List(vec![Value::Int(fd.into()), Value::Int(value)])
}

fn transmit_arg(fd: RawFd, buffer: Vec<u8>) -> Value {
    Value::map([
        ("fd", Value::Int(fd.into())),
        ("speed", Value::Int(1_000_000)),
        ("delay", Value::Int(10)),
        ("wordSize", Value::Int(8)),
        ("csChange", Value::Bool(true)),
        ("buffer", Value::Uint8List(buffer)),
    ])
}

#[test]
fn test_end_to_end_sequence() {
    let h = Harness::new();
    let gate = h.bus.hold_transfers();
    let fd = h.open();

    let transmit = h.start("transmit", transmit_arg(fd, vec![0xde, 0xad]));
    gate.wait_entered(1);
    assert_eq!(h.call("getMode", fd_arg(fd)), Outcome::Busy);

    gate.release();
    assert_eq!(recv(&transmit), Outcome::ack());
    assert_eq!(h.call("getMode", fd_arg(fd)), Outcome::Success(Some(Value::Int(0))));
    assert_eq!(h.call("close", fd_arg(fd)), Outcome::ack());
    assert_eq!(h.call("getMode", fd_arg(fd)), Outcome::NativeError(Errno::EBADF));
}

#[test]
fn test_busy_leaves_running_task_untouched() {
    let h = Harness::new();
    let gate = h.bus.hold_transfers();
    let fd = h.open();

    let first = h.start("transmit", transmit_arg(fd, vec![1, 2, 3]));
    gate.wait_entered(1);

    assert_eq!(h.call("transmit", transmit_arg(fd, vec![9; 64])), Outcome::Busy);
    assert_eq!(h.call("setMode", pair(fd, 3)), Outcome::Busy);
    assert_eq!(h.call("close", fd_arg(fd)), Outcome::Busy);

    gate.release();
    assert_eq!(recv(&first), Outcome::ack());

    let transfers = h.bus.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].tx, vec![1, 2, 3]);
    // The rejected transmit's copy was released by the dispatcher.
    assert_eq!(h.dispatcher.buffers().total(), 2);
    assert_eq!(h.dispatcher.buffers().in_use(), 0);
    assert_eq!(h.call("getMode", fd_arg(fd)), Outcome::Success(Some(Value::Int(0))));
}

#[test]
fn test_transfer_parameters_reach_device() {
    let h = Harness::new();
    let fd = h.open();

    assert_eq!(h.call("transmit", transmit_arg(fd, vec![0x55; 4])), Outcome::ack());
    let transfers = h.bus.transfers();
    assert_eq!(transfers.len(), 1);
    let t = &transfers[0];
    assert_eq!(t.fd, fd);
    assert_eq!(t.speed_hz, 1_000_000);
    assert_eq!(t.delay_usecs, 10);
    assert_eq!(t.bits_per_word, 8);
    assert!(t.cs_change);
    assert_eq!(t.tx, vec![0x55; 4]);
}

#[rstest]
#[case(None)]
#[case(Some(Errno::EIO))]
fn test_buffer_released_once(#[case] failure: Option<Errno>) {
    let h = Harness::new();
    if let Some(errno) = failure {
        h.bus.fail_next(FakeOp::Transfer, errno);
    }
    let fd = h.open();

    let expected = match failure {
        Some(errno) => Outcome::NativeError(errno),
        None => Outcome::ack(),
    };
    assert_eq!(h.call("transmit", transmit_arg(fd, vec![0; 32])), expected);

    let buffers = h.dispatcher.buffers();
    assert_eq!(buffers.total(), 1);
    assert_eq!(buffers.released(), 1);
    assert_eq!(buffers.bytes_in_use(), 0);
}

#[test]
fn test_handles_are_independent() {
    let h = Harness::new();
    let gate = h.bus.hold_transfers();
    let a = h.open();
    let b = h.open();
    assert_ne!(a, b);

    let held = h.start("transmit", transmit_arg(a, vec![1]));
    gate.wait_entered(1);

    // `a` is busy; `b` still answers.
    assert_eq!(h.call("setWordSize", pair(b, 16)), Outcome::ack());
    assert_eq!(h.call("getWordSize", fd_arg(b)), Outcome::Success(Some(Value::Int(16))));
    assert_eq!(h.call("getWordSize", fd_arg(a)), Outcome::Busy);

    gate.release();
    assert_eq!(recv(&held), Outcome::ack());
    assert_eq!(h.call("getWordSize", fd_arg(a)), Outcome::Success(Some(Value::Int(8))));
}

#[test]
fn test_setters_round_trip() {
    let h = Harness::new();
    let fd = h.open();

    assert_eq!(h.call("setMode", pair(fd, 3)), Outcome::ack());
    assert_eq!(h.call("getMode", fd_arg(fd)), Outcome::Success(Some(Value::Int(3))));
    assert_eq!(h.call("setMaxSpeed", pair(fd, 8_000_000)), Outcome::ack());
    assert_eq!(
        h.call("getMaxSpeed", fd_arg(fd)),
        Outcome::Success(Some(Value::Int(8_000_000)))
    );
    assert_eq!(
        h.call("setWordSize", pair(fd, 40)),
        Outcome::NativeError(Errno::EINVAL)
    );
}

#[test]
fn test_failed_close_keeps_handle_usable() {
    let h = Harness::new();
    let fd = h.open();
    h.bus.fail_next(FakeOp::Close, Errno::EIO);

    assert_eq!(h.call("close", fd_arg(fd)), Outcome::NativeError(Errno::EIO));
    assert_eq!(h.call("getMode", fd_arg(fd)), Outcome::Success(Some(Value::Int(0))));
    assert_eq!(h.dispatcher.registry().live_handles(), vec![fd]);

    assert_eq!(h.call("close", fd_arg(fd)), Outcome::ack());
    assert!(h.dispatcher.registry().live_handles().is_empty());
}

#[test]
fn test_closed_handle_is_bad_descriptor() {
    let h = Harness::new();
    let fd = h.open();
    assert_eq!(h.call("close", fd_arg(fd)), Outcome::ack());

    assert_eq!(h.call("close", fd_arg(fd)), Outcome::NativeError(Errno::EBADF));
    assert_eq!(
        h.call("transmit", transmit_arg(fd, vec![1])),
        Outcome::NativeError(Errno::EBADF)
    );
    assert_eq!(h.dispatcher.registry().len(), 1);
}

#[rstest]
#[case("getMode", Value::from("3"))]
#[case("setMode", Value::Int(3))]
#[case("setMaxSpeed", Value::List(vec![Value::Int(3)]))]
#[case("close", Value::Null)]
#[case("transmit", Value::List(vec![]))]
#[case("transmit", Value::map([("fd", Value::Int(3))]))]
fn test_validation_never_reaches_worker(#[case] method: &str, #[case] arg: Value) {
    let h = Harness::new();
    let gate = h.bus.hold_transfers();
    let fd = h.open();
    let held = h.start("transmit", transmit_arg(fd, vec![1]));
    gate.wait_entered(1);

    // A busy handle would answer Busy if the request got that far.
    assert!(matches!(h.call(method, arg), Outcome::IllegalArgument(_)));
    assert_eq!(h.dispatcher.buffers().total(), 1);

    gate.release();
    assert_eq!(recv(&held), Outcome::ack());
}

#[test]
fn test_unknown_method_not_implemented() {
    let h = Harness::new();
    assert_eq!(h.call("reset", Value::Null), Outcome::NotImplemented);
    assert_eq!(h.call("Open", Value::from(NODE)), Outcome::NotImplemented);
    assert!(h.dispatcher.registry().is_empty());
}

#[test]
fn test_open_errors() {
    let h = Harness::new();
    h.bus.remove_node("/dev/spidev9.9");
    assert_eq!(
        h.call("open", Value::from("/dev/spidev9.9")),
        Outcome::NativeError(Errno::ENOENT)
    );
    assert!(matches!(h.call("open", Value::Int(0)), Outcome::IllegalArgument(_)));
    assert!(h.dispatcher.registry().is_empty());
}

#[test]
fn test_calls_after_reply_never_busy() {
    let h = Harness::new();
    let fd = h.open();

    for n in 0..50 {
        let mode = n % 4;
        assert_eq!(h.call("setMode", pair(fd, mode)), Outcome::ack());
        assert_eq!(h.call("getMode", fd_arg(fd)), Outcome::Success(Some(Value::Int(mode))));
    }
}

#[test]
fn test_panicking_worker_retires_handle() {
    let h = Harness::new();
    let fd = h.open();
    h.bus.panic_next(FakeOp::ReadMaxSpeed);

    assert_eq!(h.call("getMaxSpeed", fd_arg(fd)), Outcome::NativeError(Errno::EOWNERDEAD));
    assert_eq!(h.call("getMode", fd_arg(fd)), Outcome::NativeError(Errno::EBADF));
    assert!(h.dispatcher.registry().live_handles().is_empty());

    // The number comes back on reopen and belongs to a working handle.
    let reopened = h.open();
    assert_eq!(reopened, fd);
    assert_eq!(h.dispatcher.registry().live_handles(), vec![fd]);
    assert_eq!(h.call("getMaxSpeed", fd_arg(fd)), Outcome::Success(Some(Value::Int(500_000))));
}

#[test]
fn test_reopen_after_close_gets_fresh_handle() {
    let h = Harness::new();
    let fd = h.open();
    assert_eq!(h.call("setWordSize", pair(fd, 16)), Outcome::ack());
    assert_eq!(h.call("close", fd_arg(fd)), Outcome::ack());

    let reopened = h.open();
    assert_eq!(reopened, fd);
    assert_eq!(h.call("getWordSize", fd_arg(fd)), Outcome::Success(Some(Value::Int(8))));
}
