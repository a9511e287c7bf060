//! Consumer façade: owns a registration and the context it executes on.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::BusInner;
use crate::context::Context;
use crate::error::Error;
use crate::holder::HandlerHolder;
use crate::message::Message;

/// A handle to one address registration. Created by
/// [`EventBus::consumer`](crate::EventBus::consumer) or
/// [`EventBus::local_consumer`](crate::EventBus::local_consumer); the
/// handler is attached separately and runs on this consumer's [`Context`].
pub struct MessageConsumer {
    bus: Arc<BusInner>,
    context: Context,
    address: String,
    local_only: bool,
    holder: Mutex<Option<Arc<HandlerHolder>>>,
}

impl MessageConsumer {
    pub(crate) fn new(
        bus: Arc<BusInner>,
        context: Context,
        address: String,
        local_only: bool,
    ) -> Self {
        Self {
            bus,
            context,
            address,
            local_only,
            holder: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn is_registered(&self) -> bool {
        self.holder
            .lock()
            .as_ref()
            .map_or(false, |holder| !holder.is_removed())
    }

    /// Attaches the handler, registering this consumer on the bus. Fails
    /// with [`Error::IllegalState`] when a handler is already attached or
    /// the bus is not started.
    pub fn handler(&self, handler: impl Fn(Message) + Send + Sync + 'static) -> Result<(), Error> {
        let mut slot = self.holder.lock();
        if slot.is_some() {
            return Err(Error::IllegalState("handler already registered"));
        }
        let holder = self.bus.add_registration(
            self.address.clone(),
            Arc::new(handler),
            self.context.clone(),
            self.local_only,
        )?;
        *slot = Some(holder);
        Ok(())
    }

    /// Removes the registration. Idempotent; completes successfully when no
    /// handler is attached.
    pub async fn unregister(&self) -> Result<(), Error> {
        let holder = self.holder.lock().take();
        if let Some(holder) = holder {
            self.bus.remove_registration(&holder);
        }
        Ok(())
    }
}
