//! Messages flowing through the bus.
//!
//! A [`Message`] carries an opaque [`Body`] (an `Arc<dyn Any>`), a string
//! [`Headers`] multi-map and the codec that produces the per-delivery body
//! copy. Every handler receives its own copy of the message; mutating one
//! copy never affects another receiver.

use core::any::Any;
use core::fmt;
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::bus::BusInner;
use crate::codec::MessageCodec;
use crate::error::{Error, ReplyException};
use crate::options::DeliveryOptions;

/// An untyped message body.
pub type Body = Arc<dyn Any + Send + Sync>;

/// Conversion into an untyped [`Body`].
///
/// Implemented for the primitive types covered by the built-in codecs, for
/// `Arc<T>` (shared without copying) and for [`Body`] itself.
pub trait IntoBody {
    fn into_body(self) -> Body;
}

impl IntoBody for Body {
    fn into_body(self) -> Body {
        self
    }
}

impl<T: Any + Send + Sync> IntoBody for Arc<T> {
    fn into_body(self) -> Body {
        self
    }
}

macro_rules! into_body_owned {
    ($($ty:ty),+) => {
        $(impl IntoBody for $ty {
            fn into_body(self) -> Body {
                Arc::new(self)
            }
        })+
    };
}

into_body_owned!(String, i32, i64, f64, bool, (), serde_json::Value, bytes::Bytes);

impl IntoBody for &str {
    fn into_body(self) -> Body {
        Arc::new(self.to_owned())
    }
}

/// A string multi-map: several values may be added under the same name.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: SmallVec<[(String, String); 4]>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value, keeping any previous values for the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Replaces all values for `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.entries.retain(|(n, _)| n.as_str() != name);
        self.entries.push((name, value.into()));
        self
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.entries.retain(|(n, _)| n.as_str() != name);
        self
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.as_str() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A message routed by the bus.
///
/// Handlers receive an owned `Message` and may reply through it when the
/// sender attached a reply address (i.e. used `request`).
#[derive(Clone)]
pub struct Message {
    pub(crate) address: String,
    pub(crate) reply_address: Option<String>,
    pub(crate) headers: Headers,
    pub(crate) body: Body,
    pub(crate) codec: Arc<dyn MessageCodec>,
    pub(crate) send: bool,
    pub(crate) local: bool,
    pub(crate) bus: Weak<BusInner>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("address", &self.address)
            .field("reply_address", &self.reply_address)
            .field("headers", &self.headers)
            .field("codec", &self.codec.name())
            .field("send", &self.send)
            .field("local", &self.local)
            .finish()
    }
}

impl Message {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn reply_address(&self) -> Option<&str> {
        self.reply_address.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Typed view of the body. `None` when the body is of a different type.
    pub fn body_as<T: Any>(&self) -> Option<&T> {
        self.body.downcast_ref::<T>()
    }

    /// `true` for point-to-point emissions, `false` for publishes.
    pub fn is_send(&self) -> bool {
        self.send
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Replies to the sender. No-op when the message carries no reply
    /// address (plain `send`/`publish`).
    pub fn reply(&self, body: impl IntoBody) -> Result<(), Error> {
        self.reply_with(body, DeliveryOptions::new())
    }

    pub fn reply_with(&self, body: impl IntoBody, options: DeliveryOptions) -> Result<(), Error> {
        let Some(reply_address) = &self.reply_address else {
            return Ok(());
        };
        self.bus()?
            .send_to(reply_address.clone(), body.into_body(), options, None)
    }

    /// Replies and awaits a further reply from the original requester.
    pub async fn request_reply(
        &self,
        body: impl IntoBody,
        options: DeliveryOptions,
    ) -> Result<Message, Error> {
        let Some(reply_address) = &self.reply_address else {
            return Err(Error::IllegalState("message has no reply address"));
        };
        let bus = self.bus()?;
        bus.request_to(reply_address.clone(), body.into_body(), options)
            .await
    }

    /// Signals a failure back to the requester; surfaced there as
    /// [`Error::Recipient`]. No-op without a reply address.
    pub fn fail(&self, code: i32, message: impl Into<String>) -> Result<(), Error> {
        self.reply(Arc::new(ReplyException::recipient(code, message)))
    }

    /// The independent copy handed to one receiver: fresh headers plus the
    /// codec-transformed body.
    pub(crate) fn copy_before_receive(&self) -> Result<Message, Error> {
        Ok(Message {
            address: self.address.clone(),
            reply_address: self.reply_address.clone(),
            headers: self.headers.clone(),
            body: self.codec.transform(&self.body)?,
            codec: self.codec.clone(),
            send: self.send,
            local: self.local,
            bus: self.bus.clone(),
        })
    }

    fn bus(&self) -> Result<Arc<BusInner>, Error> {
        self.bus
            .upgrade()
            .ok_or(Error::IllegalState("event bus has been dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_multi_value() {
        let mut headers = Headers::new();
        headers.add("k", "a").add("k", "b").add("other", "c");

        assert_eq!(headers.get("k"), Some("a"));
        assert_eq!(headers.get_all("k").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(headers.len(), 3);

        headers.set("k", "z");
        assert_eq!(headers.get_all("k").collect::<Vec<_>>(), vec!["z"]);

        headers.remove("other");
        assert!(!headers.contains("other"));
        assert_eq!(headers.len(), 1);
    }
}
