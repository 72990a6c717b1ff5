//! # spidev-module — Default implementations
//!
//! This crate provides the default implementation for every spidev-core
//! seam, plus the per-handle worker machinery.
//!
//! ## Default stack
//!
//! | Seam            | Default Impl       | Alternative                  |
//! |-----------------|--------------------|------------------------------|
//! | DeviceOpener    | LinuxOpener        | FakeOpener (test-support)    |
//! | SpiDevice       | LinuxSpidev        | FakeSpidev (test-support)    |
//! | Responder       | closure            | QueuedReplies                |
//!
//! ## Execution model
//!
//! ```text
//! HandleRegistry ──lookup(fd)──► WorkerContext ──try_submit──► [mailbox: 1 slot]
//!                                     │                             │
//!                                     └── worker thread ◄── notify ─┘
//!                                           execute op (blocking)
//!                                           reply.send(outcome)
//! ```

pub mod config;
pub mod device;
pub mod worker;
pub mod registry;
pub mod queued_replies;

#[cfg(target_os = "linux")]
pub mod spidev_sys;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;
