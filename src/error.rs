use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds surfaced by the bus, either synchronously from an emission
/// or through a reply future.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("no handlers for address {address}")]
    NoHandlers { address: String },

    #[error("no reply received on {address} within {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("recipient failure ({code}): {message}")]
    Recipient { code: i32, message: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("no codec registered under name '{0}'")]
    CodecNotFound(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("event bus internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_no_handlers(&self) -> bool {
        matches!(self, Error::NoHandlers { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Category of a failed reply, carried inside a [`ReplyException`] body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyFailure {
    Timeout,
    NoHandlers,
    RecipientFailure,
    Error,
}

/// Body of a failure reply. Produced by [`Message::fail`](crate::Message::fail)
/// on the responder side and decoded back into an [`Error`] by the
/// requester's reply handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyException {
    pub failure: ReplyFailure,
    pub code: i32,
    pub message: String,
}

impl ReplyException {
    pub fn recipient(code: i32, message: impl Into<String>) -> Self {
        Self {
            failure: ReplyFailure::RecipientFailure,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn into_error(self, origin_address: &str, timeout: Duration) -> Error {
        match self.failure {
            ReplyFailure::RecipientFailure => Error::Recipient {
                code: self.code,
                message: self.message,
            },
            ReplyFailure::NoHandlers => Error::NoHandlers {
                address: origin_address.to_owned(),
            },
            ReplyFailure::Timeout => Error::Timeout {
                address: origin_address.to_owned(),
                timeout,
            },
            ReplyFailure::Error => Error::Internal(self.message),
        }
    }
}
