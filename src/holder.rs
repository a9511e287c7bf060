//! Internal record binding one registration to its execution context.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::Context;
use crate::message::Message;

static REGISTRATION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Lives in exactly one cyclic sequence until removed. The removed flag is
/// the authoritative should-not-deliver signal; dropping the holder from the
/// registry snapshot only stops future selection.
pub(crate) struct HandlerHolder {
    pub(crate) id: u64,
    pub(crate) address: String,
    pub(crate) handler: MessageHandler,
    pub(crate) context: Context,
    pub(crate) reply_handler: bool,
    pub(crate) local_only: bool,
    removed: AtomicBool,
}

impl HandlerHolder {
    pub(crate) fn new(
        address: String,
        handler: MessageHandler,
        context: Context,
        reply_handler: bool,
        local_only: bool,
    ) -> Self {
        Self {
            id: REGISTRATION_ID.fetch_add(1, Ordering::Relaxed),
            address,
            handler,
            context,
            reply_handler,
            local_only,
            removed: AtomicBool::new(false),
        }
    }

    /// Marks the holder removed. Returns `true` only for the first caller.
    pub(crate) fn set_removed(&self) -> bool {
        !self.removed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}
