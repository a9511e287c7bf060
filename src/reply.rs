//! Request/reply correlation.
//!
//! Each request registers a hidden one-shot handler on a synthetic
//! `__reply.<n>` address, arms a timeout and resolves a future with the
//! first reply or a failure. The one-shot unregistration in the dispatcher
//! plus the take-once sender guarantee the future completes at most once.

use core::time::Duration;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bus::BusInner;
use crate::error::{Error, ReplyException};
use crate::holder::HandlerHolder;
use crate::message::Message;

/// Reserved prefix of synthetic reply addresses; user consumers cannot
/// register under it.
pub(crate) const REPLY_ADDRESS_PREFIX: &str = "__reply.";

pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Message, Error>>;

struct ReplyState {
    tx: Option<oneshot::Sender<Result<Message, Error>>>,
    timer: Option<JoinHandle<()>>,
}

pub(crate) struct ReplyHandler {
    pub(crate) reply_address: String,
    origin_address: String,
    timeout: Duration,
    bus: Weak<BusInner>,
    state: Mutex<ReplyState>,
    holder: OnceLock<Arc<HandlerHolder>>,
}

impl ReplyHandler {
    /// Registers the one-shot reply consumer and arms the timeout.
    pub(crate) fn create(
        bus: &Arc<BusInner>,
        origin_address: &str,
        timeout: Duration,
    ) -> (Arc<ReplyHandler>, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        let reply_address = format!("{}{}", REPLY_ADDRESS_PREFIX, bus.next_reply_sequence());

        let handler = Arc::new(ReplyHandler {
            reply_address: reply_address.clone(),
            origin_address: origin_address.to_owned(),
            timeout,
            bus: Arc::downgrade(bus),
            state: Mutex::new(ReplyState {
                tx: Some(tx),
                timer: None,
            }),
            holder: OnceLock::new(),
        });

        let holder = bus.add_reply_registration(reply_address, {
            let handler = handler.clone();
            Arc::new(move |msg: Message| handler.handle_reply(msg))
        });
        let _ = handler.holder.set(holder);

        let timer = tokio::spawn({
            let handler = handler.clone();
            async move {
                tokio::time::sleep(handler.timeout).await;
                handler.on_timeout();
            }
        });
        let mut state = handler.state.lock();
        if state.tx.is_some() {
            state.timer = Some(timer);
        } else {
            // completed before the timer was stored
            timer.abort();
        }
        drop(state);

        (handler, rx)
    }

    /// First reply wins; later replies find the sender gone and are dropped.
    fn handle_reply(&self, msg: Message) {
        let tx = {
            let mut state = self.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.tx.take()
        };
        let Some(tx) = tx else {
            return;
        };

        let failure = msg.body_as::<ReplyException>().cloned();
        let result = match failure {
            Some(ex) => Err(ex.into_error(&self.origin_address, self.timeout)),
            None => Ok(msg),
        };
        self.record_failure(&result);
        let _ = tx.send(result);
    }

    fn on_timeout(&self) {
        let tx = {
            let mut state = self.state.lock();
            state.timer = None;
            state.tx.take()
        };
        let Some(tx) = tx else {
            return;
        };

        warn!(
            "no reply received on {} within {:?}",
            self.origin_address, self.timeout
        );
        self.unregister();
        let result = Err(Error::Timeout {
            address: self.origin_address.clone(),
            timeout: self.timeout,
        });
        self.record_failure(&result);
        let _ = tx.send(result);
    }

    /// Fails the pending future right away; used when dispatch itself found
    /// no handlers.
    pub(crate) fn fail(&self, err: Error) {
        let tx = {
            let mut state = self.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.tx.take()
        };
        let Some(tx) = tx else {
            return;
        };

        self.unregister();
        let result = Err(err);
        self.record_failure(&result);
        let _ = tx.send(result);
    }

    fn unregister(&self) {
        if let (Some(bus), Some(holder)) = (self.bus.upgrade(), self.holder.get()) {
            bus.remove_registration(holder);
        }
    }

    fn record_failure(&self, result: &Result<Message, Error>) {
        if let Err(err) = result {
            if let Some(bus) = self.bus.upgrade() {
                bus.metrics().reply_failure(&self.origin_address, err);
            }
        }
    }
}
