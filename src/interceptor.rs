//! Outbound and inbound interceptor chains.
//!
//! Interceptors run in registration order and must call
//! [`DeliveryContext::next`] to pass the delivery on; not calling it drops
//! the message on that side. The chain is captured as a snapshot when a
//! delivery enters it, so adds/removes never affect in-flight deliveries.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::message::Message;

/// What an interceptor sees of one delivery.
pub trait DeliveryContext {
    fn message(&self) -> &Message;

    /// Mutable access, e.g. to stamp headers.
    fn message_mut(&mut self) -> &mut Message;

    /// `true` for point-to-point emissions, `false` for publishes.
    fn is_send(&self) -> bool;

    /// Passes the delivery to the following interceptor, or to the
    /// dispatcher/handler at the end of the chain.
    fn next(&mut self);
}

pub type Interceptor = Arc<dyn Fn(&mut dyn DeliveryContext) + Send + Sync>;

/// Convenience wrapper turning a closure into an [`Interceptor`] handle.
/// Keep the returned handle to remove the interceptor again.
pub fn interceptor(f: impl Fn(&mut dyn DeliveryContext) + Send + Sync + 'static) -> Interceptor {
    Arc::new(f)
}

/// Append-only registration-ordered list; readers take consistent snapshots.
#[derive(Default)]
pub(crate) struct InterceptorChain {
    list: RwLock<Vec<Interceptor>>,
}

impl InterceptorChain {
    pub(crate) fn add(&self, interceptor: Interceptor) {
        self.list.write().push(interceptor);
    }

    /// Removes by handle identity. Returns `false` when the handle was not
    /// registered.
    pub(crate) fn remove(&self, interceptor: &Interceptor) -> bool {
        let mut list = self.list.write();
        match list.iter().position(|i| Arc::ptr_eq(i, interceptor)) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Interceptor> {
        self.list.read().clone()
    }
}
