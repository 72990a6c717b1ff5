//! Platform device backends.
//!
//! spidev only exists on Linux. Elsewhere the opener fails every open
//! with `ENOTSUP`, so the dispatcher still builds and answers requests.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::*;
    } else {
        mod unsupported;
        pub use unsupported::*;
    }
}
