//! Raw bindings to the Linux spidev driver.
//!
//! Mirrors `<linux/spi/spidev.h>`. Only the requests the worker issues
//! are bound here.

// ── ioctl ──

const SPI_IOC_MAGIC: u8 = b'k';

/// `struct spi_ioc_transfer` (32 bytes).
///
/// `tx_buf` and `rx_buf` are userspace addresses widened to 64 bits.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SpiIocTransfer {
    pub tx_buf: u64,
    pub rx_buf: u64,
    pub len: u32,
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cs_change: u8,
    pub tx_nbits: u8,
    pub rx_nbits: u8,
    pub word_delay_usecs: u8,
    pub _pad: u8,
}

// _IOR('k', 1, __u8) / _IOW('k', 1, __u8)
nix::ioctl_read!(spi_ioc_rd_mode, SPI_IOC_MAGIC, 1, u8);
nix::ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, 1, u8);

// _IOR('k', 3, __u8) / _IOW('k', 3, __u8)
nix::ioctl_read!(spi_ioc_rd_bits_per_word, SPI_IOC_MAGIC, 3, u8);
nix::ioctl_write_ptr!(spi_ioc_wr_bits_per_word, SPI_IOC_MAGIC, 3, u8);

// _IOR('k', 4, __u32) / _IOW('k', 4, __u32)
nix::ioctl_read!(spi_ioc_rd_max_speed_hz, SPI_IOC_MAGIC, 4, u32);
nix::ioctl_write_ptr!(spi_ioc_wr_max_speed_hz, SPI_IOC_MAGIC, 4, u32);

// SPI_IOC_MESSAGE(N): _IOW('k', 0, char[N * sizeof(struct spi_ioc_transfer)])
nix::ioctl_write_buf!(spi_ioc_message, SPI_IOC_MAGIC, 0, SpiIocTransfer);
