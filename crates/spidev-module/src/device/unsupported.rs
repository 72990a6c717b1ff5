//! Fallback for targets without spidev.

use std::os::unix::io::RawFd;

use nix::errno::Errno;

use spidev_core::device::{DeviceOpener, SpiDevice};
use spidev_core::task::Transfer;

/// Never constructed: `LinuxOpener::open` always fails here.
pub struct LinuxSpidev {
    fd: RawFd,
}

impl SpiDevice for LinuxSpidev {
    fn fd(&self) -> RawFd {
        self.fd
    }
    fn mode(&mut self) -> Result<u8, Errno> {
        Err(Errno::ENOTSUP)
    }
    fn set_mode(&mut self, _mode: u8) -> Result<(), Errno> {
        Err(Errno::ENOTSUP)
    }
    fn word_size(&mut self) -> Result<u8, Errno> {
        Err(Errno::ENOTSUP)
    }
    fn set_word_size(&mut self, _bits: u8) -> Result<(), Errno> {
        Err(Errno::ENOTSUP)
    }
    fn max_speed(&mut self) -> Result<u32, Errno> {
        Err(Errno::ENOTSUP)
    }
    fn set_max_speed(&mut self, _hz: u32) -> Result<(), Errno> {
        Err(Errno::ENOTSUP)
    }
    fn transfer(&mut self, _transfer: &mut Transfer) -> Result<(), Errno> {
        Err(Errno::ENOTSUP)
    }
    fn close(&mut self) -> Result<(), Errno> {
        Err(Errno::ENOTSUP)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxOpener;

impl DeviceOpener for LinuxOpener {
    type Device = LinuxSpidev;

    fn open(&self, _path: &str) -> Result<LinuxSpidev, Errno> {
        Err(Errno::ENOTSUP)
    }
}
