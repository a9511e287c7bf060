//! Body codecs and their registry.
//!
//! A codec names a body encoding and produces the per-delivery body copy via
//! [`MessageCodec::transform`]. The wire half of the contract
//! (`encode_to_wire`/`decode_from_wire`) is unused by local dispatch but kept
//! so codecs written against this bus stay transport-capable.
//!
//! Lookup precedence when a message is created: explicit codec-name override,
//! then the default codec registered for the body's concrete type, then the
//! fallback local codec (which shares the body by reference and cannot go to
//! the wire).

use core::any::{Any, TypeId};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::Error;
use crate::message::Body;

pub trait MessageCodec: Send + Sync {
    /// Unique codec name, referenced by the `codec_name` delivery option.
    fn name(&self) -> &str;

    /// Produces the body instance a single receiver will observe.
    fn transform(&self, body: &Body) -> Result<Body, Error>;

    fn encode_to_wire(&self, buf: &mut BytesMut, body: &Body) -> Result<(), Error>;

    fn decode_from_wire(&self, buf: &mut Bytes) -> Result<Body, Error>;
}

fn expect_body<'a, T: Any>(codec: &str, body: &'a Body) -> Result<&'a T, Error> {
    body.downcast_ref::<T>()
        .ok_or_else(|| Error::Codec(format!("codec '{codec}' cannot handle this body type")))
}

fn take_prefixed(buf: &mut Bytes) -> Result<Bytes, Error> {
    if buf.remaining() < 4 {
        return Err(Error::Codec("truncated body".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::Codec("truncated body".into()));
    }
    Ok(buf.split_to(len))
}

macro_rules! numeric_codec {
    ($codec:ident, $name:literal, $ty:ty, $put:ident, $get:ident, $width:literal) => {
        pub struct $codec;

        impl MessageCodec for $codec {
            fn name(&self) -> &str {
                $name
            }

            fn transform(&self, body: &Body) -> Result<Body, Error> {
                Ok(Arc::new(*expect_body::<$ty>($name, body)?))
            }

            fn encode_to_wire(&self, buf: &mut BytesMut, body: &Body) -> Result<(), Error> {
                buf.$put(*expect_body::<$ty>($name, body)?);
                Ok(())
            }

            fn decode_from_wire(&self, buf: &mut Bytes) -> Result<Body, Error> {
                if buf.remaining() < $width {
                    return Err(Error::Codec("truncated body".into()));
                }
                Ok(Arc::new(buf.$get()))
            }
        }
    };
}

numeric_codec!(I32Codec, "i32", i32, put_i32, get_i32, 4);
numeric_codec!(I64Codec, "i64", i64, put_i64, get_i64, 8);
numeric_codec!(F64Codec, "f64", f64, put_f64, get_f64, 8);

pub struct StringCodec;

impl MessageCodec for StringCodec {
    fn name(&self) -> &str {
        "string"
    }

    fn transform(&self, body: &Body) -> Result<Body, Error> {
        Ok(Arc::new(expect_body::<String>("string", body)?.clone()))
    }

    fn encode_to_wire(&self, buf: &mut BytesMut, body: &Body) -> Result<(), Error> {
        let s = expect_body::<String>("string", body)?;
        buf.put_u32(s.len() as u32);
        buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn decode_from_wire(&self, buf: &mut Bytes) -> Result<Body, Error> {
        let raw = take_prefixed(buf)?;
        let s = String::from_utf8(raw.to_vec())
            .map_err(|err| Error::Codec(format!("invalid utf-8 string body: {err}")))?;
        Ok(Arc::new(s))
    }
}

pub struct BoolCodec;

impl MessageCodec for BoolCodec {
    fn name(&self) -> &str {
        "bool"
    }

    fn transform(&self, body: &Body) -> Result<Body, Error> {
        Ok(Arc::new(*expect_body::<bool>("bool", body)?))
    }

    fn encode_to_wire(&self, buf: &mut BytesMut, body: &Body) -> Result<(), Error> {
        buf.put_u8(*expect_body::<bool>("bool", body)? as u8);
        Ok(())
    }

    fn decode_from_wire(&self, buf: &mut Bytes) -> Result<Body, Error> {
        if buf.remaining() < 1 {
            return Err(Error::Codec("truncated body".into()));
        }
        Ok(Arc::new(buf.get_u8() != 0))
    }
}

/// Codec for the empty `()` body.
pub struct NullCodec;

impl MessageCodec for NullCodec {
    fn name(&self) -> &str {
        "null"
    }

    fn transform(&self, _body: &Body) -> Result<Body, Error> {
        Ok(Arc::new(()))
    }

    fn encode_to_wire(&self, _buf: &mut BytesMut, _body: &Body) -> Result<(), Error> {
        Ok(())
    }

    fn decode_from_wire(&self, _buf: &mut Bytes) -> Result<Body, Error> {
        Ok(Arc::new(()))
    }
}

pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn transform(&self, body: &Body) -> Result<Body, Error> {
        Ok(Arc::new(expect_body::<serde_json::Value>("json", body)?.clone()))
    }

    fn encode_to_wire(&self, buf: &mut BytesMut, body: &Body) -> Result<(), Error> {
        let value = expect_body::<serde_json::Value>("json", body)?;
        let raw = serde_json::to_vec(value)
            .map_err(|err| Error::Codec(format!("json encode failed: {err}")))?;
        buf.put_u32(raw.len() as u32);
        buf.put_slice(&raw);
        Ok(())
    }

    fn decode_from_wire(&self, buf: &mut Bytes) -> Result<Body, Error> {
        let raw = take_prefixed(buf)?;
        let value: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|err| Error::Codec(format!("json decode failed: {err}")))?;
        Ok(Arc::new(value))
    }
}

/// Codec for raw [`Bytes`] bodies. `Bytes` is immutable, so the transform
/// shares the underlying buffer.
pub struct BufferCodec;

impl MessageCodec for BufferCodec {
    fn name(&self) -> &str {
        "buffer"
    }

    fn transform(&self, body: &Body) -> Result<Body, Error> {
        Ok(Arc::new(expect_body::<Bytes>("buffer", body)?.clone()))
    }

    fn encode_to_wire(&self, buf: &mut BytesMut, body: &Body) -> Result<(), Error> {
        let bytes = expect_body::<Bytes>("buffer", body)?;
        buf.put_u32(bytes.len() as u32);
        buf.put_slice(bytes);
        Ok(())
    }

    fn decode_from_wire(&self, buf: &mut Bytes) -> Result<Body, Error> {
        Ok(Arc::new(take_prefixed(buf)?))
    }
}

/// Fallback codec for body types with no registered default. Delivery shares
/// the `Arc`; such bodies cannot leave the process.
pub struct LocalCodec;

impl MessageCodec for LocalCodec {
    fn name(&self) -> &str {
        "local"
    }

    fn transform(&self, body: &Body) -> Result<Body, Error> {
        Ok(body.clone())
    }

    fn encode_to_wire(&self, _buf: &mut BytesMut, _body: &Body) -> Result<(), Error> {
        Err(Error::Codec("local-only body cannot be wire-encoded".into()))
    }

    fn decode_from_wire(&self, _buf: &mut Bytes) -> Result<Body, Error> {
        Err(Error::Codec("local-only body cannot be wire-decoded".into()))
    }
}

pub(crate) struct CodecRegistry {
    by_name: DashMap<String, Arc<dyn MessageCodec>>,
    by_type: DashMap<TypeId, Arc<dyn MessageCodec>>,
    fallback: Arc<dyn MessageCodec>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let registry = Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            fallback: Arc::new(LocalCodec),
        };

        registry.install::<String>(Arc::new(StringCodec));
        registry.install::<i32>(Arc::new(I32Codec));
        registry.install::<i64>(Arc::new(I64Codec));
        registry.install::<f64>(Arc::new(F64Codec));
        registry.install::<bool>(Arc::new(BoolCodec));
        registry.install::<()>(Arc::new(NullCodec));
        registry.install::<serde_json::Value>(Arc::new(JsonCodec));
        registry.install::<Bytes>(Arc::new(BufferCodec));

        registry
    }
}

impl CodecRegistry {
    fn install<T: Any>(&self, codec: Arc<dyn MessageCodec>) {
        self.by_name.insert(codec.name().to_owned(), codec.clone());
        self.by_type.insert(TypeId::of::<T>(), codec);
    }

    pub(crate) fn register(&self, codec: Arc<dyn MessageCodec>) -> Result<(), Error> {
        match self.by_name.entry(codec.name().to_owned()) {
            Entry::Occupied(_) => Err(Error::IllegalState("codec name already registered")),
            Entry::Vacant(entry) => {
                entry.insert(codec);
                Ok(())
            }
        }
    }

    pub(crate) fn unregister(&self, name: &str) {
        self.by_name.remove(name);
    }

    /// Registers a default codec for a body type. Both the type slot and the
    /// codec name must be free; a name collision rolls the type slot back.
    pub(crate) fn register_default<T: Any>(
        &self,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<(), Error> {
        match self.by_type.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => {
                return Err(Error::IllegalState(
                    "default codec already registered for this type",
                ))
            }
            Entry::Vacant(entry) => {
                entry.insert(codec.clone());
            }
        }
        match self.by_name.entry(codec.name().to_owned()) {
            Entry::Occupied(_) => {
                self.by_type.remove(&TypeId::of::<T>());
                Err(Error::IllegalState("codec name already registered"))
            }
            Entry::Vacant(entry) => {
                entry.insert(codec);
                Ok(())
            }
        }
    }

    pub(crate) fn unregister_default<T: Any>(&self) {
        if let Some((_, codec)) = self.by_type.remove(&TypeId::of::<T>()) {
            // only drop the name slot when it still points at this codec
            self.by_name
                .remove_if(codec.name(), |_, existing| Arc::ptr_eq(existing, &codec));
        }
    }

    pub(crate) fn lookup(
        &self,
        body: &Body,
        codec_name: Option<&str>,
    ) -> Result<Arc<dyn MessageCodec>, Error> {
        if let Some(name) = codec_name {
            return self
                .by_name
                .get(name)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| Error::CodecNotFound(name.to_owned()));
        }

        let type_id = (**body).type_id();
        Ok(self
            .by_type
            .get(&type_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.fallback.clone()))
    }
}
