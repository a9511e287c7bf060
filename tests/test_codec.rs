use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use eventbus::{Body, DeliveryOptions, Error, EventBus, MessageCodec, StringCodec};

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

fn started_bus() -> EventBus {
    let bus = EventBus::new();
    bus.start().unwrap();
    bus
}

fn body_ptr(body: &Body) -> *const () {
    Arc::as_ptr(body) as *const ()
}

/// Bodies with a default codec are copied per delivery
#[tokio::test]
async fn test_default_codec_copies() {
    let bus = started_bus();
    let received = Arc::new(Mutex::new(Vec::<Body>::new()));

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let received = received.clone();
            move |msg| received.lock().push(msg.body().clone())
        })
        .unwrap();

    let original: Body = Arc::new("hello".to_string());
    bus.send("addr", original.clone()).unwrap();

    wait_until(|| !received.lock().is_empty()).await;

    {
        let received = received.lock();
        assert_eq!(received[0].downcast_ref::<String>(), Some(&"hello".to_string()));
        assert_ne!(body_ptr(&received[0]), body_ptr(&original));
    }

    bus.close().await.unwrap();
}

struct Payload {
    marker: u64,
}

/// Bodies without a codec fall back to sharing the Arc
#[tokio::test]
async fn test_fallback_codec_shares() {
    let bus = started_bus();
    let received = Arc::new(Mutex::new(Vec::<Body>::new()));

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let received = received.clone();
            move |msg| received.lock().push(msg.body().clone())
        })
        .unwrap();

    let original: Body = Arc::new(Payload { marker: 7 });
    bus.send("addr", original.clone()).unwrap();

    wait_until(|| !received.lock().is_empty()).await;

    {
        let received = received.lock();
        assert_eq!(received[0].downcast_ref::<Payload>().unwrap().marker, 7);
        assert_eq!(body_ptr(&received[0]), body_ptr(&original));
    }

    bus.close().await.unwrap();
}

struct UpperCodec;

impl MessageCodec for UpperCodec {
    fn name(&self) -> &str {
        "upper"
    }

    fn transform(&self, body: &Body) -> Result<Body, Error> {
        let s = body
            .downcast_ref::<String>()
            .ok_or_else(|| Error::Codec("upper: not a string".into()))?;
        Ok(Arc::new(s.to_uppercase()))
    }

    fn encode_to_wire(&self, buf: &mut BytesMut, body: &Body) -> Result<(), Error> {
        StringCodec.encode_to_wire(buf, body)
    }

    fn decode_from_wire(&self, buf: &mut Bytes) -> Result<Body, Error> {
        StringCodec.decode_from_wire(buf)
    }
}

/// The codec-name override beats the default codec for the body type
#[tokio::test]
async fn test_codec_name_override() {
    let bus = started_bus();
    let received = Arc::new(Mutex::new(Vec::new()));

    bus.register_codec(Arc::new(UpperCodec)).unwrap();

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let received = received.clone();
            move |msg| received.lock().push(msg.body_as::<String>().unwrap().clone())
        })
        .unwrap();

    let options = DeliveryOptions::new().set_codec_name("upper");
    bus.send_with("addr", "hello", options).unwrap();

    wait_until(|| !received.lock().is_empty()).await;
    assert_eq!(*received.lock(), vec!["HELLO".to_string()]);

    bus.close().await.unwrap();
}

/// An unknown codec name is rejected at emission time
#[tokio::test]
async fn test_unknown_codec_name() {
    let bus = started_bus();

    let result = bus.send_with(
        "addr",
        "x",
        DeliveryOptions::new().set_codec_name("nonexistent"),
    );
    assert!(matches!(result, Err(Error::CodecNotFound(_))));

    bus.close().await.unwrap();
}

/// Codec names are unique; unregistering frees the name again
#[tokio::test]
async fn test_duplicate_codec_registration() {
    let bus = started_bus();

    bus.register_codec(Arc::new(UpperCodec)).unwrap();
    assert!(matches!(
        bus.register_codec(Arc::new(UpperCodec)),
        Err(Error::IllegalState(_))
    ));

    bus.unregister_codec("upper");
    bus.register_codec(Arc::new(UpperCodec)).unwrap();

    bus.close().await.unwrap();
}

/// A default codec cannot take a name an existing codec already holds
#[tokio::test]
async fn test_default_codec_name_collision() {
    let bus = started_bus();

    bus.register_codec(Arc::new(UpperCodec)).unwrap();
    assert!(matches!(
        bus.register_default_codec::<Payload>(Arc::new(UpperCodec)),
        Err(Error::IllegalState(_))
    ));

    // the failed registration must not leave a default for the type behind
    let received = Arc::new(Mutex::new(Vec::<Body>::new()));
    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let received = received.clone();
            move |msg| received.lock().push(msg.body().clone())
        })
        .unwrap();

    let original: Body = Arc::new(Payload { marker: 3 });
    bus.send("addr", original.clone()).unwrap();
    wait_until(|| !received.lock().is_empty()).await;
    assert_eq!(body_ptr(&received.lock()[0]), body_ptr(&original));

    bus.close().await.unwrap();
}

struct PayloadCodec;

impl MessageCodec for PayloadCodec {
    fn name(&self) -> &str {
        "payload"
    }

    fn transform(&self, body: &Body) -> Result<Body, Error> {
        let payload = body
            .downcast_ref::<Payload>()
            .ok_or_else(|| Error::Codec("payload: wrong body type".into()))?;
        Ok(Arc::new(Payload {
            marker: payload.marker,
        }))
    }

    fn encode_to_wire(&self, _buf: &mut BytesMut, _body: &Body) -> Result<(), Error> {
        Err(Error::Codec("payload is local-only".into()))
    }

    fn decode_from_wire(&self, _buf: &mut Bytes) -> Result<Body, Error> {
        Err(Error::Codec("payload is local-only".into()))
    }
}

/// A default codec registered for a user type takes over from the fallback
#[tokio::test]
async fn test_register_default_codec() {
    let bus = started_bus();
    let received = Arc::new(Mutex::new(Vec::<Body>::new()));

    bus.register_default_codec::<Payload>(Arc::new(PayloadCodec))
        .unwrap();
    assert!(matches!(
        bus.register_default_codec::<Payload>(Arc::new(PayloadCodec)),
        Err(Error::IllegalState(_))
    ));

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let received = received.clone();
            move |msg| received.lock().push(msg.body().clone())
        })
        .unwrap();

    let original: Body = Arc::new(Payload { marker: 9 });
    bus.send("addr", original.clone()).unwrap();
    wait_until(|| received.lock().len() == 1).await;
    // copied by the registered codec, not shared
    assert_ne!(body_ptr(&received.lock()[0]), body_ptr(&original));

    bus.unregister_default_codec::<Payload>();
    bus.send("addr", original.clone()).unwrap();
    wait_until(|| received.lock().len() == 2).await;
    // back to the sharing fallback
    assert_eq!(body_ptr(&received.lock()[1]), body_ptr(&original));

    bus.close().await.unwrap();
}
