//! Delivery engine: routes one message to one holder (send) or to every
//! holder (publish) for its address, scheduling each delivery onto the
//! holder's context.

use std::sync::Arc;

use crate::bus::BusInner;
use crate::error::Error;
use crate::holder::HandlerHolder;
use crate::interceptor::{DeliveryContext, Interceptor};
use crate::message::Message;
use crate::reply::ReplyHandler;

/// Drives the outbound interceptor chain on the sender's context and hands
/// the message to local delivery at the end of the chain.
pub(crate) struct OutboundDeliveryContext {
    bus: Arc<BusInner>,
    message: Message,
    chain: Vec<Interceptor>,
    idx: usize,
    reply_handler: Option<Arc<ReplyHandler>>,
    result: Option<Result<(), Error>>,
}

impl OutboundDeliveryContext {
    pub(crate) fn new(
        bus: Arc<BusInner>,
        message: Message,
        reply_handler: Option<Arc<ReplyHandler>>,
    ) -> Self {
        let chain = bus.outbound_snapshot();
        Self {
            bus,
            message,
            chain,
            idx: 0,
            reply_handler,
            result: None,
        }
    }

    /// Runs the chain to completion and reports the write outcome. A chain
    /// that short-circuited counts as written: the message was consumed, not
    /// failed.
    pub(crate) fn dispatch(mut self) -> Result<(), Error> {
        self.next();
        self.result.unwrap_or(Ok(()))
    }

    fn finish(&mut self) {
        if self.result.is_some() {
            return;
        }
        self.bus
            .metrics()
            .message_sent(self.message.address(), !self.message.is_send(), self.message.is_local());

        let result = deliver_message_locally(&self.bus, &self.message);
        if let Err(err) = &result {
            warn!("unhandled message to {}: {}", self.message.address(), err);
            if let Some(reply_handler) = self.reply_handler.take() {
                reply_handler.fail(err.clone());
            }
        }
        self.result = Some(result);
    }
}

impl DeliveryContext for OutboundDeliveryContext {
    fn message(&self) -> &Message {
        &self.message
    }

    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    fn is_send(&self) -> bool {
        self.message.is_send()
    }

    fn next(&mut self) {
        if self.idx < self.chain.len() {
            self.idx += 1;
            let interceptor = self.chain[self.idx - 1].clone();
            (*interceptor)(self);
        } else {
            self.finish();
        }
    }
}

/// Runs the inbound chain on the receiver's context, ending in the user
/// handler. The message stays readable after the handler ran, so an
/// interceptor may still inspect it after calling `next`.
struct InboundDeliveryContext {
    message: Message,
    chain: Vec<Interceptor>,
    idx: usize,
    delivered: bool,
    holder: Arc<HandlerHolder>,
}

impl DeliveryContext for InboundDeliveryContext {
    fn message(&self) -> &Message {
        &self.message
    }

    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    fn is_send(&self) -> bool {
        self.message.is_send()
    }

    fn next(&mut self) {
        if self.idx < self.chain.len() {
            self.idx += 1;
            let interceptor = self.chain[self.idx - 1].clone();
            (*interceptor)(self);
        } else if !self.delivered {
            self.delivered = true;
            (*self.holder.handler)(self.message.clone());
        }
    }
}

/// Delivers to the registered handlers of the message's address. Returns
/// [`Error::NoHandlers`] when the address is empty, including the case where
/// a concurrent unregistration emptied the sequence between lookup and
/// selection.
pub(crate) fn deliver_message_locally(bus: &Arc<BusInner>, msg: &Message) -> Result<(), Error> {
    let metrics = bus.metrics();
    let Some(handlers) = bus.registry().lookup(msg.address()) else {
        metrics.message_received(msg.address(), !msg.is_send(), msg.is_local(), 0);
        return Err(Error::NoHandlers {
            address: msg.address().to_owned(),
        });
    };

    if msg.is_send() {
        let holder = handlers.next();
        metrics.message_received(
            msg.address(),
            false,
            msg.is_local(),
            holder.is_some() as usize,
        );
        match holder {
            Some(holder) => {
                deliver_to_handler(bus, msg, holder);
                Ok(())
            }
            None => Err(Error::NoHandlers {
                address: msg.address().to_owned(),
            }),
        }
    } else {
        metrics.message_received(msg.address(), true, msg.is_local(), handlers.len());
        for holder in handlers.iter() {
            deliver_to_handler(bus, msg, holder.clone());
        }
        Ok(())
    }
}

fn deliver_to_handler(bus: &Arc<BusInner>, msg: &Message, holder: Arc<HandlerHolder>) {
    let msg = msg.clone();
    let bus = bus.clone();
    let context = holder.context.clone();

    context.run(move || {
        // The holder might have been unregistered after the message was
        // scheduled but before this task ran.
        if !holder.is_removed() {
            match msg.copy_before_receive() {
                Ok(copy) => {
                    let mut ctx = InboundDeliveryContext {
                        message: copy,
                        chain: bus.inbound_snapshot(),
                        idx: 0,
                        delivered: false,
                        holder: holder.clone(),
                    };
                    ctx.next();
                }
                Err(err) => holder.context.report(anyhow::Error::new(err)),
            }
        }
        if holder.reply_handler {
            bus.remove_registration(&holder);
        }
    });
}
