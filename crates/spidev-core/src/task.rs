//! Task types.
//!
//! A [`Task`] is one requested operation against one device handle,
//! plus the [`Reply`] its terminal outcome goes to. The operation is a
//! sum type: each variant carries only the operands it needs.

use std::fmt;
use std::os::unix::io::RawFd;

use crate::buffer::TransferBuffer;
use crate::outcome::Reply;

/// Descriptor for one full-duplex transfer.
///
/// Field widths follow `struct spi_ioc_transfer`.
#[derive(Debug)]
pub struct Transfer {
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cs_change: bool,
    /// Transmit source and receive destination.
    pub buffer: TransferBuffer,
}

/// The fixed operation set.
#[derive(Debug)]
pub enum Operation {
    Close,
    ReadMode,
    WriteMode(u8),
    ReadWordSize,
    WriteWordSize(u8),
    ReadMaxSpeed,
    WriteMaxSpeed(u32),
    Transmit(Transfer),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Close => "close",
            Operation::ReadMode => "read-mode",
            Operation::WriteMode(_) => "write-mode",
            Operation::ReadWordSize => "read-word-size",
            Operation::WriteWordSize(_) => "write-word-size",
            Operation::ReadMaxSpeed => "read-max-speed",
            Operation::WriteMaxSpeed(_) => "write-max-speed",
            Operation::Transmit(_) => "transmit",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One operation addressed to one handle.
#[derive(Debug)]
pub struct Task {
    pub fd: RawFd,
    pub op: Operation,
    pub reply: Reply,
}

impl Task {
    pub fn new(fd: RawFd, op: Operation, reply: Reply) -> Self {
        Self { fd, op, reply }
    }
}
