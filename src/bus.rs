//! Bus façade: public operations, lifecycle and the wiring between the
//! registry, dispatcher, codecs, interceptors and metrics.

use core::any::Any;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use crate::codec::{CodecRegistry, MessageCodec};
use crate::consumer::MessageConsumer;
use crate::context::{Context, HookKey};
use crate::dispatcher::OutboundDeliveryContext;
use crate::error::Error;
use crate::holder::{HandlerHolder, MessageHandler};
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::message::{Body, Headers, IntoBody, Message};
use crate::metrics::{EventBusMetrics, NoopMetrics};
use crate::options::{DeliveryOptions, EventBusOptions};
use crate::producer::MessageProducer;
use crate::registry::HandlerRegistry;
use crate::reply::{ReplyHandler, REPLY_ADDRESS_PREFIX};

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const CLOSED: u8 = 2;

/// Local in-process event bus.
///
/// Cheap to clone; all clones share the same state. Must be created and used
/// inside a tokio runtime, since handler contexts are tokio tasks.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn build() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    pub fn new() -> Self {
        Self::build().build()
    }

    /// Transitions the bus to started. Exactly one `start` may succeed over
    /// the bus lifetime.
    pub fn start(&self) -> Result<(), Error> {
        match self
            .inner
            .state
            .compare_exchange(CREATED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                info!("event bus started");
                Ok(())
            }
            Err(CLOSED) => Err(Error::IllegalState("event bus already closed")),
            Err(_) => Err(Error::IllegalState("event bus already started")),
        }
    }

    /// Unregisters every handler, closes metrics and transitions to closed.
    /// Completes immediately on a bus that never started; idempotent.
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }

    /// Point-to-point emission: one of the address's handlers receives the
    /// message, chosen round-robin.
    pub fn send(&self, address: impl Into<String>, body: impl IntoBody) -> Result<(), Error> {
        self.send_with(address, body, DeliveryOptions::new())
    }

    pub fn send_with(
        &self,
        address: impl Into<String>,
        body: impl IntoBody,
        options: DeliveryOptions,
    ) -> Result<(), Error> {
        self.inner
            .send_to(address.into(), body.into_body(), options, None)
    }

    /// Broadcast emission: every handler of the address receives its own
    /// copy of the message.
    pub fn publish(&self, address: impl Into<String>, body: impl IntoBody) -> Result<(), Error> {
        self.publish_with(address, body, DeliveryOptions::new())
    }

    pub fn publish_with(
        &self,
        address: impl Into<String>,
        body: impl IntoBody,
        options: DeliveryOptions,
    ) -> Result<(), Error> {
        self.inner
            .publish_to(address.into(), body.into_body(), options)
    }

    /// Point-to-point emission awaiting a reply, with the bus default
    /// timeout.
    pub async fn request(
        &self,
        address: impl Into<String>,
        body: impl IntoBody,
    ) -> Result<Message, Error> {
        let options =
            DeliveryOptions::new().set_send_timeout(self.inner.options.default_send_timeout());
        self.request_with(address, body, options).await
    }

    pub async fn request_with(
        &self,
        address: impl Into<String>,
        body: impl IntoBody,
        options: DeliveryOptions,
    ) -> Result<Message, Error> {
        self.inner
            .request_to(address.into(), body.into_body(), options)
            .await
    }

    /// Creates a consumer for `address` on a fresh context.
    pub fn consumer(&self, address: impl Into<String>) -> Result<MessageConsumer, Error> {
        self.consumer_impl(address.into(), false)
    }

    /// Like [`consumer`](Self::consumer) but never receives messages from a
    /// non-local origin.
    pub fn local_consumer(&self, address: impl Into<String>) -> Result<MessageConsumer, Error> {
        self.consumer_impl(address.into(), true)
    }

    fn consumer_impl(&self, address: String, local_only: bool) -> Result<MessageConsumer, Error> {
        self.inner.check_started()?;
        check_consumer_address(&address)?;
        Ok(MessageConsumer::new(
            self.inner.clone(),
            Context::new(),
            address,
            local_only,
        ))
    }

    /// Pre-addressed point-to-point producer.
    pub fn sender(&self, address: impl Into<String>) -> Result<MessageProducer, Error> {
        self.producer_impl(address.into(), true, self.default_options())
    }

    pub fn sender_with(
        &self,
        address: impl Into<String>,
        options: DeliveryOptions,
    ) -> Result<MessageProducer, Error> {
        self.producer_impl(address.into(), true, options)
    }

    /// Pre-addressed broadcast producer.
    pub fn publisher(&self, address: impl Into<String>) -> Result<MessageProducer, Error> {
        self.producer_impl(address.into(), false, self.default_options())
    }

    pub fn publisher_with(
        &self,
        address: impl Into<String>,
        options: DeliveryOptions,
    ) -> Result<MessageProducer, Error> {
        self.producer_impl(address.into(), false, options)
    }

    fn producer_impl(
        &self,
        address: String,
        send: bool,
        options: DeliveryOptions,
    ) -> Result<MessageProducer, Error> {
        check_address(&address)?;
        Ok(MessageProducer::new(self.inner.clone(), address, send, options))
    }

    fn default_options(&self) -> DeliveryOptions {
        DeliveryOptions::new().set_send_timeout(self.inner.options.default_send_timeout())
    }

    pub fn register_codec(&self, codec: Arc<dyn MessageCodec>) -> Result<(), Error> {
        self.inner.codecs.register(codec)
    }

    pub fn unregister_codec(&self, name: &str) {
        self.inner.codecs.unregister(name);
    }

    /// Registers `codec` as the default for bodies of type `T`.
    pub fn register_default_codec<T: Any>(&self, codec: Arc<dyn MessageCodec>) -> Result<(), Error> {
        self.inner.codecs.register_default::<T>(codec)
    }

    pub fn unregister_default_codec<T: Any>(&self) {
        self.inner.codecs.unregister_default::<T>();
    }

    pub fn add_outbound_interceptor(&self, interceptor: Interceptor) {
        self.inner.outbound.add(interceptor);
    }

    /// Removes by handle identity; returns `false` for an unknown handle.
    pub fn remove_outbound_interceptor(&self, interceptor: &Interceptor) -> bool {
        self.inner.outbound.remove(interceptor)
    }

    pub fn add_inbound_interceptor(&self, interceptor: Interceptor) {
        self.inner.inbound.add(interceptor);
    }

    pub fn remove_inbound_interceptor(&self, interceptor: &Interceptor) -> bool {
        self.inner.inbound.remove(interceptor)
    }

    /// Creates a fresh serialising execution context on the current runtime,
    /// e.g. to close it later and tear down the consumers registered on it.
    pub fn context(&self) -> Context {
        Context::new()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct EventBusBuilder {
    options: EventBusOptions,
    metrics: Option<Arc<dyn EventBusMetrics>>,
}

impl EventBusBuilder {
    pub fn options(mut self, options: EventBusOptions) -> Self {
        self.options = options;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn EventBusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> EventBus {
        EventBus {
            inner: Arc::new(BusInner {
                state: AtomicU8::new(CREATED),
                registry: HandlerRegistry::default(),
                codecs: CodecRegistry::default(),
                outbound: InterceptorChain::default(),
                inbound: InterceptorChain::default(),
                reply_sequence: AtomicU64::new(0),
                send_context: Context::new(),
                options: self.options,
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
            }),
        }
    }
}

pub(crate) struct BusInner {
    state: AtomicU8,
    registry: HandlerRegistry,
    pub(crate) codecs: CodecRegistry,
    outbound: InterceptorChain,
    inbound: InterceptorChain,
    reply_sequence: AtomicU64,
    /// Fallback context: reply handlers resolve on it.
    send_context: Context,
    options: EventBusOptions,
    metrics: Arc<dyn EventBusMetrics>,
}

impl BusInner {
    pub(crate) fn check_started(&self) -> Result<(), Error> {
        match self.state.load(Ordering::SeqCst) {
            STARTED => Ok(()),
            CLOSED => Err(Error::IllegalState("event bus already closed")),
            _ => Err(Error::IllegalState("event bus not started")),
        }
    }

    pub(crate) fn metrics(&self) -> &dyn EventBusMetrics {
        &*self.metrics
    }

    pub(crate) fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub(crate) fn outbound_snapshot(&self) -> Vec<Interceptor> {
        self.outbound.snapshot()
    }

    pub(crate) fn inbound_snapshot(&self) -> Vec<Interceptor> {
        self.inbound.snapshot()
    }

    pub(crate) fn next_reply_sequence(&self) -> u64 {
        self.reply_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn create_message(
        self: &Arc<Self>,
        send: bool,
        address: String,
        headers: Headers,
        body: Body,
        codec_name: Option<&str>,
    ) -> Result<Message, Error> {
        check_address(&address)?;
        let codec = self.codecs.lookup(&body, codec_name)?;
        Ok(Message {
            address,
            reply_address: None,
            headers,
            body,
            codec,
            send,
            local: true,
            bus: Arc::downgrade(self),
        })
    }

    pub(crate) fn send_to(
        self: &Arc<Self>,
        address: String,
        body: Body,
        options: DeliveryOptions,
        reply_handler: Option<Arc<ReplyHandler>>,
    ) -> Result<(), Error> {
        let msg = self.create_message(
            true,
            address,
            options.headers().clone(),
            body,
            options.codec_name(),
        )?;
        self.send_or_pub(msg, reply_handler)
    }

    pub(crate) fn publish_to(
        self: &Arc<Self>,
        address: String,
        body: Body,
        options: DeliveryOptions,
    ) -> Result<(), Error> {
        let msg = self.create_message(
            false,
            address,
            options.headers().clone(),
            body,
            options.codec_name(),
        )?;
        self.send_or_pub(msg, None)
    }

    pub(crate) async fn request_to(
        self: &Arc<Self>,
        address: String,
        body: Body,
        options: DeliveryOptions,
    ) -> Result<Message, Error> {
        self.check_started()?;
        let mut msg = self.create_message(
            true,
            address,
            options.headers().clone(),
            body,
            options.codec_name(),
        )?;

        let (handler, rx) = ReplyHandler::create(self, msg.address(), options.send_timeout());
        msg.reply_address = Some(handler.reply_address.clone());

        // Dispatch failures are routed through the reply handler, so the
        // future below observes them; `fail` is idempotent.
        if let Err(err) = self.send_or_pub(msg, Some(handler.clone())) {
            handler.fail(err);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Internal("reply handler dropped before completion".into())),
        }
    }

    fn send_or_pub(
        self: &Arc<Self>,
        msg: Message,
        reply_handler: Option<Arc<ReplyHandler>>,
    ) -> Result<(), Error> {
        self.check_started()?;
        OutboundDeliveryContext::new(self.clone(), msg, reply_handler).dispatch()
    }

    pub(crate) fn add_registration(
        self: &Arc<Self>,
        address: String,
        handler: MessageHandler,
        context: Context,
        local_only: bool,
    ) -> Result<Arc<HandlerHolder>, Error> {
        self.check_started()?;
        let holder = Arc::new(HandlerHolder::new(
            address, handler, context, false, local_only,
        ));
        self.registry.register(holder.clone());

        // Closing the owning context tears the registration down again.
        let key = HookKey {
            address: holder.address.clone(),
            registration: holder.id,
        };
        let bus = Arc::downgrade(self);
        let weak_holder = Arc::downgrade(&holder);
        holder.context.add_close_hook(key, move || {
            if let (Some(bus), Some(holder)) = (bus.upgrade(), weak_holder.upgrade()) {
                bus.remove_registration(&holder);
            }
        });

        self.metrics.handler_registered(&holder.address);
        debug!(
            "registered handler {} on {} (local_only={})",
            holder.id, holder.address, holder.local_only
        );
        Ok(holder)
    }

    /// One-shot registration backing a request's reply future. Not tied to a
    /// context lifecycle; removal happens through reply, timeout or failure.
    pub(crate) fn add_reply_registration(
        self: &Arc<Self>,
        address: String,
        handler: MessageHandler,
    ) -> Arc<HandlerHolder> {
        let holder = Arc::new(HandlerHolder::new(
            address,
            handler,
            self.send_context.clone(),
            true,
            true,
        ));
        self.registry.register(holder.clone());
        self.metrics.handler_registered(&holder.address);
        holder
    }

    pub(crate) fn remove_registration(&self, holder: &Arc<HandlerHolder>) {
        if self.registry.unregister(holder) {
            if !holder.reply_handler {
                holder.context.remove_close_hook(&HookKey {
                    address: holder.address.clone(),
                    registration: holder.id,
                });
            }
            self.metrics.handler_unregistered(&holder.address);
            debug!("unregistered handler {} from {}", holder.id, holder.address);
        }
    }

    async fn close(self: &Arc<Self>) -> Result<(), Error> {
        if self
            .state
            .compare_exchange(STARTED, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let holders = self.registry.holders();
        let count = holders.len();
        join_all(holders.into_iter().map(|holder| {
            let bus = self.clone();
            async move {
                bus.remove_registration(&holder);
            }
        }))
        .await;

        self.metrics.close();
        info!("event bus closed, {count} handlers unregistered");
        Ok(())
    }
}

fn check_address(address: &str) -> Result<(), Error> {
    if address.is_empty() {
        return Err(Error::InvalidAddress("address must not be empty".into()));
    }
    Ok(())
}

fn check_consumer_address(address: &str) -> Result<(), Error> {
    check_address(address)?;
    if address.starts_with(REPLY_ADDRESS_PREFIX) {
        return Err(Error::InvalidAddress(format!(
            "address must not use the reserved prefix '{REPLY_ADDRESS_PREFIX}'"
        )));
    }
    Ok(())
}
