mod bus;
mod codec;
mod consumer;
mod context;
mod dispatcher;
pub mod error;
mod holder;
mod interceptor;
mod message;
mod metrics;
mod options;
mod producer;
mod registry;
mod reply;
pub mod sequence;

#[macro_use]
extern crate log;

pub use bus::{EventBus, EventBusBuilder};
pub use codec::{
    BoolCodec, BufferCodec, F64Codec, I32Codec, I64Codec, JsonCodec, LocalCodec, MessageCodec,
    NullCodec, StringCodec,
};
pub use consumer::MessageConsumer;
pub use context::Context;
pub use error::{Error, ReplyException, ReplyFailure};
pub use interceptor::{interceptor, DeliveryContext, Interceptor};
pub use message::{Body, Headers, IntoBody, Message};
pub use metrics::EventBusMetrics;
pub use options::{DeliveryOptions, EventBusOptions, DEFAULT_SEND_TIMEOUT};
pub use producer::MessageProducer;
pub use sequence::CyclicSequence;
