use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;

use eventbus::{interceptor, EventBus};

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

/// Outbound interceptors run in registration order before delivery
#[tokio::test]
async fn test_outbound_order() {
    let bus = started_bus();
    let trace = Arc::new(Mutex::new(Vec::new()));
    let delivered = Arc::new(AtomicU32::new(0));

    for name in ["first", "second"] {
        bus.add_outbound_interceptor(interceptor({
            let trace = trace.clone();
            move |ctx| {
                trace.lock().push(name);
                assert!(ctx.is_send());
                ctx.next();
            }
        }));
    }

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let delivered = delivered.clone();
            move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    bus.send("addr", "x").unwrap();
    wait_until(|| delivered.load(Ordering::SeqCst) == 1).await;

    assert_eq!(*trace.lock(), vec!["first", "second"]);

    bus.close().await.unwrap();
}

/// An outbound interceptor that does not call next suppresses delivery
#[tokio::test]
async fn test_outbound_short_circuit() {
    let bus = started_bus();
    let delivered = Arc::new(AtomicU32::new(0));

    bus.add_outbound_interceptor(interceptor(|_ctx| {
        // swallow the message
    }));

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let delivered = delivered.clone();
            move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    // suppressed, not failed
    bus.send("addr", "x").unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), 0);

    bus.close().await.unwrap();
}

/// Inbound interceptors run on the receive side and may modify the copy
#[tokio::test]
async fn test_inbound_mutation() {
    let bus = started_bus();
    let seen = Arc::new(Mutex::new(Vec::new()));

    bus.add_inbound_interceptor(interceptor(|ctx| {
        ctx.message_mut().headers_mut().set("stamp", "inbound");
        ctx.next();
    }));

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let seen = seen.clone();
            move |msg| {
                seen.lock()
                    .push(msg.headers().get("stamp").unwrap_or("missing").to_owned());
            }
        })
        .unwrap();

    bus.send("addr", "x").unwrap();
    wait_until(|| !seen.lock().is_empty()).await;

    assert_eq!(*seen.lock(), vec!["inbound".to_string()]);

    bus.close().await.unwrap();
}

/// A removed interceptor is no longer invoked; removal matches by handle
#[tokio::test]
async fn test_remove_interceptor() {
    let bus = started_bus();
    let hits = Arc::new(AtomicU32::new(0));
    let delivered = Arc::new(AtomicU32::new(0));

    let handle = interceptor({
        let hits = hits.clone();
        move |ctx| {
            hits.fetch_add(1, Ordering::SeqCst);
            ctx.next();
        }
    });
    bus.add_outbound_interceptor(handle.clone());

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let delivered = delivered.clone();
            move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    bus.send("addr", "x").unwrap();
    wait_until(|| delivered.load(Ordering::SeqCst) == 1).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(bus.remove_outbound_interceptor(&handle));
    assert!(!bus.remove_outbound_interceptor(&handle));

    bus.send("addr", "x").unwrap();
    wait_until(|| delivered.load(Ordering::SeqCst) == 2).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    bus.close().await.unwrap();
}

/// Chain mutations during a delivery do not affect the in-flight chain
#[tokio::test]
async fn test_chain_snapshot_isolation() {
    let bus = started_bus();
    let late_hits = Arc::new(AtomicU32::new(0));
    let delivered = Arc::new(AtomicU32::new(0));
    let installed = Arc::new(AtomicBool::new(false));

    bus.add_outbound_interceptor(interceptor({
        let bus = bus.clone();
        let late_hits = late_hits.clone();
        let installed = installed.clone();
        move |ctx| {
            if !installed.swap(true, Ordering::SeqCst) {
                bus.add_outbound_interceptor(interceptor({
                    let late_hits = late_hits.clone();
                    move |ctx| {
                        late_hits.fetch_add(1, Ordering::SeqCst);
                        ctx.next();
                    }
                }));
            }
            ctx.next();
        }
    }));

    let consumer = bus.consumer("addr").unwrap();
    consumer
        .handler({
            let delivered = delivered.clone();
            move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    // first delivery installed the late interceptor but must not run it
    bus.send("addr", "x").unwrap();
    wait_until(|| delivered.load(Ordering::SeqCst) == 1).await;
    assert_eq!(late_hits.load(Ordering::SeqCst), 0);

    // the next delivery sees the new chain
    bus.send("addr", "x").unwrap();
    wait_until(|| delivered.load(Ordering::SeqCst) == 2).await;
    assert_eq!(late_hits.load(Ordering::SeqCst), 1);

    bus.close().await.unwrap();
}
