use core::time::Duration;

use crate::message::Headers;

/// Default reply timeout for [`request`](crate::EventBus::request), 30 seconds.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Per-emission delivery options: headers attached to the message, an
/// optional codec-name override, the reply timeout and the local-only flag.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    headers: Headers,
    codec_name: Option<String>,
    send_timeout: Duration,
    local_only: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            headers: Headers::new(),
            codec_name: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            local_only: false,
        }
    }
}

impl DeliveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn set_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn set_codec_name(mut self, name: impl Into<String>) -> Self {
        self.codec_name = Some(name.into());
        self
    }

    pub fn set_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn set_local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn codec_name(&self) -> Option<&str> {
        self.codec_name.as_deref()
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn local_only(&self) -> bool {
        self.local_only
    }
}

/// Bus-wide configuration, applied at build time.
#[derive(Debug, Clone)]
pub struct EventBusOptions {
    default_send_timeout: Duration,
}

impl Default for EventBusOptions {
    fn default() -> Self {
        Self {
            default_send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl EventBusOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply timeout used by `request` calls that do not carry explicit
    /// [`DeliveryOptions`].
    pub fn set_default_send_timeout(mut self, timeout: Duration) -> Self {
        self.default_send_timeout = timeout;
        self
    }

    pub fn default_send_timeout(&self) -> Duration {
        self.default_send_timeout
    }
}
