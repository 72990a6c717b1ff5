//! # spidev-core — Trait definitions for spidev dispatch
//!
//! This crate defines the types and trait boundaries shared by every
//! part of the spidev dispatcher: the decoded request values, the reply
//! outcomes, the task sum type handed to a worker, and the device seam
//! the worker drives.
//!
//! ## Design principle
//!
//! > "One handle, one thread, one task at a time."
//!
//! Nothing in this crate spawns threads or touches a device node.
//! Default implementations live in `spidev-module`; the request entry
//! point lives in `spidev-dispatch`.

pub mod value;
pub mod outcome;
pub mod task;
pub mod buffer;
pub mod device;
pub mod error;
pub mod env;
