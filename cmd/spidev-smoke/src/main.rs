//! spidev Dispatch End-to-End Smoke Test
//!
//! Drives the dispatcher against a real spidev node:
//!   Part A — open, register read-back, register writes
//!   Part B — transmit, busy admission, argument validation
//!   Part C — close and post-close behaviour
//!
//! Run: sudo ./target/release/spidev-smoke [/dev/spidevB.C]
//! (path also from SPIDEV_SMOKE_PATH; replies are polled every 1ms up
//! to SPIDEV_SMOKE_POLLS times; log filter from SPIDEV_LOG)

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::errno::Errno;
use tracing_subscriber::EnvFilter;

use spidev_core::env::{env_get, env_get_str};
use spidev_core::outcome::Outcome;
use spidev_core::value::{MethodCall, Value};
use spidev_dispatch::{Dispatcher, METHOD_CHANNEL};
use spidev_module::config::WorkerConfig;
use spidev_module::device::LinuxOpener;
use spidev_module::queued_replies::QueuedReplies;

const DEFAULT_PATH: &str = "/dev/spidev0.0";
const DEFAULT_POLLS: u32 = 200;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

/// Dispatcher plus the poll-side reply queue.
struct Client {
    dispatcher: Dispatcher<LinuxOpener>,
    replies: QueuedReplies,
    polls: u32,
}

impl Client {
    /// Issue one call and poll for its outcome.
    fn call(&self, method: &str, arg: Value) -> Option<Outcome> {
        let (id, reply) = self.replies.reply();
        self.dispatcher.handle_call(&MethodCall::new(method, arg), reply);
        self.replies.wait_for(id, self.polls, Duration::from_millis(1))
    }
}

fn describe(outcome: &Option<Outcome>) -> String {
    match outcome {
        Some(o) => o.to_string(),
        None => "no reply (timeout)".to_string(),
    }
}

fn fd_arg(fd: RawFd) -> Value {
    Value::Int(fd.into())
}

fn pair(fd: RawFd, value: i64) -> Value {
    Value::List(vec![Value::Int(fd.into()), Value::Int(value)])
}

fn transmit_arg(fd: RawFd, speed_hz: i64, buffer: Vec<u8>) -> Value {
    Value::map([
        ("fd", Value::Int(fd.into())),
        ("speed", Value::Int(speed_hz)),
        ("delay", Value::Int(0)),
        ("wordSize", Value::Int(8)),
        ("csChange", Value::Bool(false)),
        ("buffer", Value::Uint8List(buffer)),
    ])
}

fn int_payload(outcome: &Option<Outcome>) -> Option<i64> {
    match outcome {
        Some(Outcome::Success(Some(v))) => v.as_int(),
        _ => None,
    }
}

// ════════════════════════════════════════════════════════════
// Part A: Open and registers
// ════════════════════════════════════════════════════════════

fn test_open(t: &mut TestRunner, c: &Client, path: &str) -> Option<RawFd> {
    t.section("Part A: Open and registers");

    let got = c.call("open", Value::from(path));
    if got != Some(Outcome::ack()) {
        t.fail(&format!("open({})", path), &describe(&got));
        return None;
    }
    let fd = c.dispatcher.registry().live_handles().first().copied();
    t.check(&format!("open({})", path), fd.is_some(), "no live handle after open");
    let fd = fd?;
    println!("       fd = {}", fd);

    let mode = c.call("getMode", fd_arg(fd));
    let mode_val = int_payload(&mode);
    t.check("getMode → integer", mode_val.is_some(), &describe(&mode));

    if let Some(m) = mode_val {
        let got = c.call("setMode", pair(fd, m));
        t.check("setMode (same mode)", got == Some(Outcome::ack()), &describe(&got));
    }

    let bits = c.call("getWordSize", fd_arg(fd));
    t.check("getWordSize → integer", int_payload(&bits).is_some(), &describe(&bits));

    let speed = c.call("getMaxSpeed", fd_arg(fd));
    t.check("getMaxSpeed → integer", int_payload(&speed).is_some(), &describe(&speed));

    let got = c.call("setMaxSpeed", pair(fd, 500_000));
    t.check("setMaxSpeed(500kHz)", got == Some(Outcome::ack()), &describe(&got));

    Some(fd)
}

// ════════════════════════════════════════════════════════════
// Part B: Transmit, admission, validation
// ════════════════════════════════════════════════════════════

fn test_transmit(t: &mut TestRunner, c: &Client, fd: RawFd) {
    t.section("Part B: Transmit, admission, validation");

    let got = c.call("transmit", transmit_arg(fd, 500_000, vec![0x9f, 0, 0, 0]));
    t.check("transmit 4 bytes", got == Some(Outcome::ack()), &describe(&got));

    // A slow 4 KiB transfer keeps the worker busy long enough to observe.
    let (id, reply) = c.replies.reply();
    c.dispatcher.handle_call(
        &MethodCall::new("transmit", transmit_arg(fd, 10_000, vec![0; 4096])),
        reply,
    );
    let during = c.call("getMode", fd_arg(fd));
    t.check(
        "getMode during transmit → busy or value",
        matches!(during, Some(Outcome::Busy) | Some(Outcome::Success(_))),
        &describe(&during),
    );
    if during != Some(Outcome::Busy) {
        println!("       (transfer finished before the second call)");
    }
    let done = c.replies.wait_for(id, 10_000, Duration::from_millis(1));
    t.check("slow transmit completes", done == Some(Outcome::ack()), &describe(&done));

    let got = c.call("setMode", fd_arg(fd));
    t.check(
        "setMode(int) → illegal argument",
        matches!(got, Some(Outcome::IllegalArgument(_))),
        &describe(&got),
    );

    let got = c.call("transmit", Value::map([("fd", fd_arg(fd))]));
    t.check(
        "transmit without speed → illegal argument",
        matches!(got, Some(Outcome::IllegalArgument(_))),
        &describe(&got),
    );

    let got = c.call("reset", Value::Null);
    t.check("unknown method → not implemented", got == Some(Outcome::NotImplemented), &describe(&got));

    println!(
        "       buffers: total={} released={} in_use={}",
        c.dispatcher.buffers().total(),
        c.dispatcher.buffers().released(),
        c.dispatcher.buffers().in_use()
    );
    t.check(
        "all transfer buffers released",
        c.dispatcher.buffers().in_use() == 0,
        "buffers still in use",
    );
}

// ════════════════════════════════════════════════════════════
// Part C: Close
// ════════════════════════════════════════════════════════════

fn test_close(t: &mut TestRunner, c: &Client, fd: RawFd) {
    t.section("Part C: Close");

    let got = c.call("close", fd_arg(fd));
    t.check("close", got == Some(Outcome::ack()), &describe(&got));

    let got = c.call("getMode", fd_arg(fd));
    t.check(
        "getMode after close → EBADF",
        got == Some(Outcome::NativeError(Errno::EBADF)),
        &describe(&got),
    );

    t.check(
        "no live handles",
        c.dispatcher.registry().live_handles().is_empty(),
        "handle still live",
    );
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SPIDEV_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    init_logging();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| env_get_str("SPIDEV_SMOKE_PATH", DEFAULT_PATH));

    println!("spidev dispatch smoke test");
    println!("  channel: {}", METHOD_CHANNEL);
    println!("  device:  {}", path);

    let client = Client {
        dispatcher: Dispatcher::new(LinuxOpener, WorkerConfig::from_env()),
        replies: QueuedReplies::new(),
        polls: env_get("SPIDEV_SMOKE_POLLS", DEFAULT_POLLS),
    };
    let mut t = TestRunner::new();

    if let Some(fd) = test_open(&mut t, &client, &path) {
        test_transmit(&mut t, &client, fd);
        test_close(&mut t, &client, fd);
    }

    t.summary();
    tracing::info!(passed = t.passed, failed = t.failed, "smoke run finished");
    if t.failed > 0 {
        std::process::exit(1);
    }
}
