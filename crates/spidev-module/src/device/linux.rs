//! `LinuxSpidev` — default `SpiDevice` implementation.
//!
//! One open `/dev/spidevB.C` node. Every method is a single ioctl on the
//! raw fd; nothing is cached, nothing is retried.

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;

use spidev_core::device::{DeviceOpener, SpiDevice};
use spidev_core::task::Transfer;

use crate::spidev_sys::{self, SpiIocTransfer};

pub struct LinuxSpidev {
    fd: RawFd,
    path: String,
}

impl LinuxSpidev {
    /// Open `path` read/write. The device owns the fd and closes it on
    /// drop unless `close()` already did.
    pub fn open(path: &str) -> Result<Self, Errno> {
        let fd = fcntl::open(path, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty())?;
        Ok(Self {
            fd,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    fn live_fd(&self) -> Result<RawFd, Errno> {
        if self.fd < 0 {
            Err(Errno::EBADF)
        } else {
            Ok(self.fd)
        }
    }
}

impl SpiDevice for LinuxSpidev {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn mode(&mut self) -> Result<u8, Errno> {
        let mut mode: u8 = 0;
        // Safety: `mode` is a valid u8 out-pointer for the duration of the call.
        unsafe { spidev_sys::spi_ioc_rd_mode(self.live_fd()?, &mut mode) }?;
        Ok(mode)
    }

    fn set_mode(&mut self, mode: u8) -> Result<(), Errno> {
        unsafe { spidev_sys::spi_ioc_wr_mode(self.live_fd()?, &mode) }?;
        Ok(())
    }

    fn word_size(&mut self) -> Result<u8, Errno> {
        let mut bits: u8 = 0;
        unsafe { spidev_sys::spi_ioc_rd_bits_per_word(self.live_fd()?, &mut bits) }?;
        Ok(bits)
    }

    fn set_word_size(&mut self, bits: u8) -> Result<(), Errno> {
        unsafe { spidev_sys::spi_ioc_wr_bits_per_word(self.live_fd()?, &bits) }?;
        Ok(())
    }

    fn max_speed(&mut self) -> Result<u32, Errno> {
        let mut hz: u32 = 0;
        unsafe { spidev_sys::spi_ioc_rd_max_speed_hz(self.live_fd()?, &mut hz) }?;
        Ok(hz)
    }

    fn set_max_speed(&mut self, hz: u32) -> Result<(), Errno> {
        unsafe { spidev_sys::spi_ioc_wr_max_speed_hz(self.live_fd()?, &hz) }?;
        Ok(())
    }

    fn transfer(&mut self, transfer: &mut Transfer) -> Result<(), Errno> {
        let fd = self.live_fd()?;
        let len = u32::try_from(transfer.buffer.len()).map_err(|_| Errno::EMSGSIZE)?;
        // Same allocation for both directions: the driver reads tx before
        // it writes rx for each word.
        let addr = transfer.buffer.as_mut_ptr() as u64;
        let xfer = SpiIocTransfer {
            tx_buf: addr,
            rx_buf: addr,
            len,
            speed_hz: transfer.speed_hz,
            delay_usecs: transfer.delay_usecs,
            bits_per_word: transfer.bits_per_word,
            cs_change: u8::from(transfer.cs_change),
            ..Default::default()
        };
        // Safety: `addr` points at `len` writable bytes owned by `transfer`,
        // which outlives this blocking call.
        unsafe { spidev_sys::spi_ioc_message(fd, std::slice::from_ref(&xfer)) }?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Errno> {
        let fd = self.live_fd()?;
        // Linux frees the number even when close reports an error, and it
        // may already belong to someone else by the time we could retry.
        self.fd = -1;
        match unistd::close(fd) {
            Ok(()) | Err(Errno::EINTR) => Ok(()),
            Err(errno) => Err(errno),
        }
    }
}

impl Drop for LinuxSpidev {
    fn drop(&mut self) {
        if self.fd >= 0 {
            let _ = unistd::close(self.fd);
            self.fd = -1;
        }
    }
}

/// `LinuxOpener` — default `DeviceOpener` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxOpener;

impl DeviceOpener for LinuxOpener {
    type Device = LinuxSpidev;

    fn open(&self, path: &str) -> Result<LinuxSpidev, Errno> {
        LinuxSpidev::open(path)
    }
}
