//! Concurrent address → handler-sequence registry.
//!
//! All mutation happens through the map's per-key entry API, so concurrent
//! register/unregister on one address never lose or duplicate holders and no
//! global lock exists. Invariant: every sequence stored in the map is
//! non-empty.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::holder::HandlerHolder;
use crate::sequence::CyclicSequence;

pub(crate) type HandlerSequence = CyclicSequence<Arc<HandlerHolder>>;

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    map: DashMap<String, HandlerSequence>,
}

impl HandlerRegistry {
    pub(crate) fn register(&self, holder: Arc<HandlerHolder>) {
        match self.map.entry(holder.address.clone()) {
            Entry::Occupied(mut entry) => {
                let next = entry.get().add(holder);
                *entry.get_mut() = next;
            }
            Entry::Vacant(entry) => {
                entry.insert(CyclicSequence::with(holder));
            }
        }
    }

    /// Flags the holder removed and swaps in a sequence without it. Only the
    /// first caller for a given holder does any work; the flag is set before
    /// the snapshot is replaced so in-flight deliveries already see it.
    pub(crate) fn unregister(&self, holder: &Arc<HandlerHolder>) -> bool {
        if !holder.set_removed() {
            return false;
        }
        if let Entry::Occupied(mut entry) = self.map.entry(holder.address.clone()) {
            let next = entry.get().remove_first(|h| Arc::ptr_eq(h, holder));
            if next.is_empty() {
                entry.remove();
            } else {
                *entry.get_mut() = next;
            }
        }
        true
    }

    /// Non-blocking snapshot lookup.
    pub(crate) fn lookup(&self, address: &str) -> Option<HandlerSequence> {
        self.map.get(address).map(|entry| entry.value().clone())
    }

    /// Every live holder, across all addresses.
    pub(crate) fn holders(&self) -> Vec<Arc<HandlerHolder>> {
        self.map
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect()
    }
}
