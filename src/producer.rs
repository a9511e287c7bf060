//! Producer façade: a pre-addressed writer in send or publish mode.

use std::sync::Arc;

use crate::bus::BusInner;
use crate::error::Error;
use crate::message::IntoBody;
use crate::options::DeliveryOptions;

/// Created by [`EventBus::sender`](crate::EventBus::sender) (point-to-point)
/// or [`EventBus::publisher`](crate::EventBus::publisher) (fan-out). Every
/// [`write`](Self::write) emits with the producer's stored options.
pub struct MessageProducer {
    bus: Arc<BusInner>,
    address: String,
    send: bool,
    options: DeliveryOptions,
}

impl MessageProducer {
    pub(crate) fn new(
        bus: Arc<BusInner>,
        address: String,
        send: bool,
        options: DeliveryOptions,
    ) -> Self {
        Self {
            bus,
            address,
            send,
            options,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: DeliveryOptions) {
        self.options = options;
    }

    pub fn write(&self, body: impl IntoBody) -> Result<(), Error> {
        if self.send {
            self.bus
                .send_to(self.address.clone(), body.into_body(), self.options.clone(), None)
        } else {
            self.bus
                .publish_to(self.address.clone(), body.into_body(), self.options.clone())
        }
    }
}
