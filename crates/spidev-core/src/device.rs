//! Device access abstraction.
//!
//! A `SpiDevice` is the blocking, low-level side of one open handle.
//! Exactly one worker thread owns each device for its whole lifetime,
//! so the methods take `&mut self` and may block freely.
//!
//! # Implementors
//!
//! - `LinuxSpidev` (spidev-module, default): a `/dev/spidevB.C` node
//!   driven with `SPI_IOC_*` ioctls.
//!
//! - `FakeSpidev` (spidev-module, feature = "test-support"): in-memory
//!   device with scriptable failures and gated transfers.

use std::os::unix::io::RawFd;

use nix::errno::Errno;

use crate::task::Transfer;

/// Blocking access to one open SPI device.
///
/// **Contract:**
/// - Each call issues exactly one low-level request. No retries.
/// - Failures report the raw errno.
/// - `close()` that fails either leaves the device open and usable, or
///   reports `fd() < 0` when the handle was released anyway.
pub trait SpiDevice: Send + 'static {
    /// Handle identifier this device is registered under.
    fn fd(&self) -> RawFd;

    fn mode(&mut self) -> Result<u8, Errno>;
    fn set_mode(&mut self, mode: u8) -> Result<(), Errno>;

    fn word_size(&mut self) -> Result<u8, Errno>;
    fn set_word_size(&mut self, bits: u8) -> Result<(), Errno>;

    fn max_speed(&mut self) -> Result<u32, Errno>;
    fn set_max_speed(&mut self, hz: u32) -> Result<(), Errno>;

    /// One full-duplex transfer. `transfer.buffer` is both the transmit
    /// source and the receive destination.
    fn transfer(&mut self, transfer: &mut Transfer) -> Result<(), Errno>;

    /// Release the underlying handle.
    fn close(&mut self) -> Result<(), Errno>;
}

/// Opens devices by path.
pub trait DeviceOpener: Send + Sync + 'static {
    type Device: SpiDevice;

    /// Open `path` for bidirectional blocking access.
    fn open(&self, path: &str) -> Result<Self::Device, Errno>;
}
