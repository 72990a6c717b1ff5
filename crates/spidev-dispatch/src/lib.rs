//! # spidev-dispatch — The request entry point
//!
//! Turns decoded method calls into serialized, blocking spidev
//! operations:
//!
//! ```text
//! on_receive(call, reply)
//!     1. Parse method name          → unknown? NotImplemented
//!     2. Validate argument shape    → bad? IllegalArgument (no task built)
//!     3. open: open + register worker, reply directly
//!        else: build Task (transmit copies the buffer)
//!     4. Hand off without blocking  → busy? Busy / no handle? EBADF
//!     5. Worker executes and replies
//! ```
//!
//! Exactly one outcome is delivered per call, either here (steps 1-4)
//! or by the worker thread (step 5).

pub mod method;
pub mod args;
pub mod dispatcher;
pub mod plugin;

pub use dispatcher::Dispatcher;
pub use method::Method;
pub use plugin::{ChannelRegistry, MethodReceiver, METHOD_CHANNEL};
