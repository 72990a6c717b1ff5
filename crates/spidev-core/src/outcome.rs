//! Reply outcomes and the reply-channel abstraction.
//!
//! Every request terminates in exactly one [`Outcome`]. The transport
//! that carries the outcome back to whoever issued the request is an
//! external collaborator, seen here only through the [`Responder`] trait.
//!
//! # Implementors
//!
//! - Any `FnOnce(Outcome) + Send + 'static` closure (blanket impl).
//!   Tests and simple hosts use this with a channel sender.
//!
//! - `QueuedReplies` (spidev-module): pushes `(id, outcome)` pairs onto a
//!   lock-free queue that the host polls.

use std::fmt;

use nix::errno::Errno;

use crate::value::Value;

/// Error code of the busy outcome.
pub const BUSY_CODE: &str = "busy";

/// Human-readable explanation attached to the busy outcome.
pub const BUSY_MESSAGE: &str = "a different task is running on the fd already";

/// Terminal outcome of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation succeeded, with an optional return value.
    Success(Option<Value>),
    /// The request arguments were malformed. Never reaches a worker.
    IllegalArgument(String),
    /// The underlying OS call failed with this errno.
    NativeError(Errno),
    /// The handle already has a task pending or executing.
    Busy,
    /// Unrecognized method name.
    NotImplemented,
}

impl Outcome {
    #[inline]
    pub fn ack() -> Self {
        Outcome::Success(None)
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(None) => write!(f, "success"),
            Outcome::Success(Some(v)) => write!(f, "success: {:?}", v),
            Outcome::IllegalArgument(msg) => write!(f, "illegal argument: {}", msg),
            Outcome::NativeError(e) => write!(f, "native error: {} ({})", *e as i32, e.desc()),
            Outcome::Busy => write!(f, "{}: {}", BUSY_CODE, BUSY_MESSAGE),
            Outcome::NotImplemented => write!(f, "not implemented"),
        }
    }
}

/// Accepts exactly one terminal outcome.
///
/// `respond` consumes the boxed responder, so a second delivery does
/// not type-check.
pub trait Responder: Send + 'static {
    fn respond(self: Box<Self>, outcome: Outcome);
}

impl<F> Responder for F
where
    F: FnOnce(Outcome) + Send + 'static,
{
    fn respond(self: Box<Self>, outcome: Outcome) {
        (*self)(outcome)
    }
}

/// Owning handle to a pending reply.
///
/// A `Reply` that is dropped without being sent (for example when its
/// task is discarded during unwinding) delivers `NativeError(EOWNERDEAD)`
/// from its destructor.
pub struct Reply {
    responder: Option<Box<dyn Responder>>,
}

impl Reply {
    pub fn new<R: Responder>(responder: R) -> Self {
        Self {
            responder: Some(Box::new(responder)),
        }
    }

    /// Deliver the terminal outcome.
    pub fn send(mut self, outcome: Outcome) {
        if let Some(responder) = self.responder.take() {
            responder.respond(outcome);
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("pending", &self.responder.is_some())
            .finish()
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.take() {
            tracing::warn!("reply dropped without an outcome; reporting EOWNERDEAD");
            responder.respond(Outcome::NativeError(Errno::EOWNERDEAD));
        }
    }
}
