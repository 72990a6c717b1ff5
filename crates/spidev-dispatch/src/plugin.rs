//! Plugin host boundary.
//!
//! The host decodes incoming messages into [`MethodCall`]s and routes them
//! by channel name to a [`MethodReceiver`]. `init` builds the dispatcher
//! and binds it to [`METHOD_CHANNEL`]; `deinit` closes what is still
//! open.

use std::sync::Arc;

use spidev_core::device::DeviceOpener;
use spidev_core::outcome::Reply;
use spidev_core::value::MethodCall;
use spidev_module::config::WorkerConfig;

use crate::dispatcher::Dispatcher;

/// Well-known channel the dispatcher listens on.
pub const METHOD_CHANNEL: &str = "plugins.flutter.io/flutter_spidev";

/// Handler for decoded calls on one channel. Must answer every call
/// exactly once through `reply`.
pub trait MethodReceiver: Send + Sync {
    fn on_receive(&self, call: &MethodCall, reply: Reply);
}

/// Host-side channel table.
pub trait ChannelRegistry {
    fn set_receiver(&mut self, channel: &str, receiver: Arc<dyn MethodReceiver>);
}

impl<O: DeviceOpener> MethodReceiver for Dispatcher<O> {
    fn on_receive(&self, call: &MethodCall, reply: Reply) {
        self.handle_call(call, reply);
    }
}

/// Build a dispatcher over `opener` and register it on [`METHOD_CHANNEL`].
pub fn init<R, O>(registry: &mut R, opener: O, config: WorkerConfig) -> Arc<Dispatcher<O>>
where
    R: ChannelRegistry + ?Sized,
    O: DeviceOpener,
{
    tracing::info!(channel = METHOD_CHANNEL, "Initializing...");
    let dispatcher = Arc::new(Dispatcher::new(opener, config));
    registry.set_receiver(METHOD_CHANNEL, Arc::clone(&dispatcher) as Arc<dyn MethodReceiver>);
    tracing::info!("Done.");
    dispatcher
}

/// Close every idle handle. Returns how many were closed.
pub fn deinit<O: DeviceOpener>(dispatcher: &Dispatcher<O>) -> usize {
    tracing::info!(channel = METHOD_CHANNEL, "Deinitializing...");
    dispatcher.shutdown()
}
