//! Passive metrics SPI, invoked inline on the dispatch path.

use crate::error::Error;

/// Observer of bus activity. Implementations must be thread-safe; calls
/// happen on whatever thread drives the emission or delivery.
pub trait EventBusMetrics: Send + Sync {
    fn handler_registered(&self, _address: &str) {}

    fn handler_unregistered(&self, _address: &str) {}

    /// One emission leaving the bus façade, after the outbound chain.
    fn message_sent(&self, _address: &str, _publish: bool, _local: bool) {}

    /// One routing decision: `handlers` is the number of deliveries
    /// scheduled (0 for a dead address).
    fn message_received(&self, _address: &str, _publish: bool, _local: bool, _handlers: usize) {}

    fn reply_failure(&self, _address: &str, _err: &Error) {}

    /// The bus is closing; flush and release resources.
    fn close(&self) {}
}

/// Default metrics implementation: ignores everything.
pub(crate) struct NoopMetrics;

impl EventBusMetrics for NoopMetrics {}
