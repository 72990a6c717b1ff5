//! In-memory spidev test double.
//!
//! A [`FakeBus`] hands out [`FakeSpidev`] devices through a
//! [`FakeOpener`] and lets tests script what happens next:
//!
//! - `fail_next(op, errno)`: the next `op` on any device fails once.
//! - `fail_next_close_released(errno)`: the next close fails but still
//!   releases the fd, as Linux close does.
//! - `panic_next(op)`: the next `op` panics inside the worker.
//! - `hold_transfers()` / `hold_closes()`: those operations block until
//!   the returned gate is released, so a test can observe a worker
//!   mid-operation.
//!
//! Transfers are loopback: the buffer is left as transmitted and a
//! [`TransferRecord`] is logged.
//!
//! Fds are allocated like the kernel does: the lowest free number wins,
//! so a closed or dropped device's number comes straight back.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;

use spidev_core::device::{DeviceOpener, SpiDevice};
use spidev_core::task::Transfer;

/// Lowest fd handed out; well clear of real descriptors in test output.
pub const FAKE_FD_BASE: RawFd = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Open,
    ReadMode,
    WriteMode,
    ReadWordSize,
    WriteWordSize,
    ReadMaxSpeed,
    WriteMaxSpeed,
    Transfer,
    Close,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Fail(Errno),
    FailReleased(Errno),
    Panic,
}

/// One logged transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub fd: RawFd,
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cs_change: bool,
    pub tx: Vec<u8>,
    /// Name of the thread that ran the transfer.
    pub thread: Option<String>,
}

#[derive(Debug, Default)]
struct GateInner {
    held: bool,
    entered: usize,
}

#[derive(Debug, Default)]
struct GateState {
    inner: Mutex<GateInner>,
    changed: Condvar,
}

impl GateState {
    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by a device at the start of a held operation.
    fn pass(&self) {
        let mut inner = self.lock();
        inner.entered += 1;
        self.changed.notify_all();
        while inner.held {
            inner = self.changed.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Holds one kind of operation until released. Dropping the gate
/// releases it.
#[derive(Debug)]
pub struct OpGate {
    state: Arc<GateState>,
}

impl OpGate {
    /// Block until at least `n` held operations have started.
    pub fn wait_entered(&self, n: usize) {
        let mut inner = self.state.lock();
        while inner.entered < n {
            inner = self
                .state
                .changed
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn release(&self) {
        self.state.lock().held = false;
        self.state.changed.notify_all();
    }
}

impl Drop for OpGate {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug)]
struct BusState {
    open_fds: Mutex<BTreeSet<RawFd>>,
    faults: Mutex<HashMap<FakeOp, VecDeque<Fault>>>,
    missing: Mutex<HashSet<String>>,
    gate: Arc<GateState>,
    close_gate: Arc<GateState>,
    transfers: Mutex<Vec<TransferRecord>>,
}

impl BusState {
    /// Next scripted failure for `op`. An injected panic fires here.
    fn next_fault(&self, op: FakeOp) -> Option<Fault> {
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        if let Some(Fault::Panic) = fault {
            panic!("injected panic in {:?}", op);
        }
        fault
    }

    fn take_fault(&self, op: FakeOp) -> Result<(), Errno> {
        match self.next_fault(op) {
            Some(Fault::Fail(errno)) | Some(Fault::FailReleased(errno)) => Err(errno),
            _ => Ok(()),
        }
    }

    fn allocate_fd(&self) -> RawFd {
        let mut open = self.open_fds.lock().unwrap_or_else(PoisonError::into_inner);
        let mut fd = FAKE_FD_BASE;
        while open.contains(&fd) {
            fd += 1;
        }
        open.insert(fd);
        fd
    }

    fn release_fd(&self, fd: RawFd) {
        self.open_fds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&fd);
    }
}

/// Shared script and log for a family of fake devices.
#[derive(Debug, Clone)]
pub struct FakeBus {
    state: Arc<BusState>,
}

impl Default for FakeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BusState {
                open_fds: Mutex::new(BTreeSet::new()),
                faults: Mutex::new(HashMap::new()),
                missing: Mutex::new(HashSet::new()),
                gate: Arc::new(GateState::default()),
                close_gate: Arc::new(GateState::default()),
                transfers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn opener(&self) -> FakeOpener {
        FakeOpener { bus: self.clone() }
    }

    /// Opening `path` fails with `ENOENT`.
    pub fn remove_node(&self, path: &str) {
        self.state
            .missing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_owned());
    }

    /// The next `op` fails once with `errno`.
    pub fn fail_next(&self, op: FakeOp, errno: Errno) {
        self.push_fault(op, Fault::Fail(errno));
    }

    /// The next close fails with `errno` after releasing the fd.
    pub fn fail_next_close_released(&self, errno: Errno) {
        self.push_fault(FakeOp::Close, Fault::FailReleased(errno));
    }

    /// The next `op` panics.
    pub fn panic_next(&self, op: FakeOp) {
        self.push_fault(op, Fault::Panic);
    }

    fn push_fault(&self, op: FakeOp, fault: Fault) {
        self.state
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Block every transfer until the returned gate is released.
    pub fn hold_transfers(&self) -> OpGate {
        hold(&self.state.gate)
    }

    /// Block every close until the returned gate is released.
    pub fn hold_closes(&self) -> OpGate {
        hold(&self.state.close_gate)
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state
            .transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn hold(gate: &Arc<GateState>) -> OpGate {
    gate.lock().held = true;
    OpGate {
        state: Arc::clone(gate),
    }
}

#[derive(Debug, Clone)]
pub struct FakeOpener {
    bus: FakeBus,
}

impl DeviceOpener for FakeOpener {
    type Device = FakeSpidev;

    fn open(&self, path: &str) -> Result<FakeSpidev, Errno> {
        let state = &self.bus.state;
        state.take_fault(FakeOp::Open)?;
        if state
            .missing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
        {
            return Err(Errno::ENOENT);
        }
        Ok(FakeSpidev {
            fd: state.allocate_fd(),
            mode: 0,
            bits: 8,
            speed_hz: 500_000,
            bus: Arc::clone(state),
        })
    }
}

/// Register state defaults match a freshly opened spidev node.
#[derive(Debug)]
pub struct FakeSpidev {
    fd: RawFd,
    mode: u8,
    bits: u8,
    speed_hz: u32,
    bus: Arc<BusState>,
}

impl FakeSpidev {
    fn check(&self, op: FakeOp) -> Result<(), Errno> {
        if self.fd < 0 {
            return Err(Errno::EBADF);
        }
        self.bus.take_fault(op)
    }

    fn release(&mut self) {
        self.bus.release_fd(self.fd);
        self.fd = -1;
    }
}

impl SpiDevice for FakeSpidev {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn mode(&mut self) -> Result<u8, Errno> {
        self.check(FakeOp::ReadMode)?;
        Ok(self.mode)
    }

    fn set_mode(&mut self, mode: u8) -> Result<(), Errno> {
        self.check(FakeOp::WriteMode)?;
        self.mode = mode;
        Ok(())
    }

    fn word_size(&mut self) -> Result<u8, Errno> {
        self.check(FakeOp::ReadWordSize)?;
        Ok(self.bits)
    }

    fn set_word_size(&mut self, bits: u8) -> Result<(), Errno> {
        self.check(FakeOp::WriteWordSize)?;
        // Same rule as the spi core: 0 means 8, otherwise 1..=32.
        if bits > 32 {
            return Err(Errno::EINVAL);
        }
        self.bits = if bits == 0 { 8 } else { bits };
        Ok(())
    }

    fn max_speed(&mut self) -> Result<u32, Errno> {
        self.check(FakeOp::ReadMaxSpeed)?;
        Ok(self.speed_hz)
    }

    fn set_max_speed(&mut self, hz: u32) -> Result<(), Errno> {
        self.check(FakeOp::WriteMaxSpeed)?;
        self.speed_hz = hz;
        Ok(())
    }

    fn transfer(&mut self, transfer: &mut Transfer) -> Result<(), Errno> {
        self.bus.gate.pass();
        self.check(FakeOp::Transfer)?;
        self.bus
            .transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TransferRecord {
                fd: self.fd,
                speed_hz: transfer.speed_hz,
                delay_usecs: transfer.delay_usecs,
                bits_per_word: transfer.bits_per_word,
                cs_change: transfer.cs_change,
                tx: transfer.buffer.as_slice().to_vec(),
                thread: std::thread::current().name().map(str::to_owned),
            });
        Ok(())
    }

    fn close(&mut self) -> Result<(), Errno> {
        if self.fd < 0 {
            return Err(Errno::EBADF);
        }
        self.bus.close_gate.pass();
        match self.bus.next_fault(FakeOp::Close) {
            Some(Fault::Fail(errno)) => Err(errno),
            Some(Fault::FailReleased(errno)) => {
                self.release();
                Err(errno)
            }
            _ => {
                self.release();
                Ok(())
            }
        }
    }
}

impl Drop for FakeSpidev {
    fn drop(&mut self) {
        if self.fd >= 0 {
            self.release();
        }
    }
}
