//! # Subscription Table
//!
//! The committed subscriptions of one actor, shared by its plug and its
//! delivery adapter.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// Committed `topic -> handler` map of one actor.
///
/// Shared between the plug, which writes it while replaying a commit, and the
/// delivery adapter, which reads it for every inbound message and records the
/// topics the multiplexer dropped.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    committed: RwLock<BTreeMap<String, String>>,
    dropped: Mutex<BTreeSet<String>>,
    shut_down: AtomicBool,
}

impl SubscriptionTable {
    pub fn handler(&self, topic: &str) -> Option<String> {
        self.committed.read().get(topic).cloned()
    }

    pub fn insert(&self, topic: &str, handler: &str) -> Option<String> {
        self.committed
            .write()
            .insert(topic.to_string(), handler.to_string())
    }

    pub fn remove(&self, topic: &str) -> Option<String> {
        self.committed.write().remove(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.committed.read().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.committed.read().clone()
    }

    pub fn restore(&self, subscribed: BTreeMap<String, String>) {
        *self.committed.write() = subscribed;
    }

    /// Empty the map, returning the topics it held.
    pub fn clear(&self) -> Vec<String> {
        let taken = std::mem::take(&mut *self.committed.write());
        taken.into_keys().collect()
    }

    pub fn mark_dropped(&self, topic: &str) {
        self.dropped.lock().insert(topic.to_string());
    }

    pub fn forget_dropped(&self, topic: &str) {
        self.dropped.lock().remove(topic);
    }

    pub fn take_dropped(&self) -> BTreeSet<String> {
        std::mem::take(&mut *self.dropped.lock())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn shut_down(&self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_returns_held_topics() {
        let table = SubscriptionTable::default();
        table.insert("forum-b", "handler2");
        table.insert("forum-a", "handler1");

        assert_eq!(table.clear(), vec!["forum-a", "forum-b"]);
        assert!(table.topics().is_empty());
    }

    #[test]
    fn test_forget_dropped_cancels_mark() {
        let table = SubscriptionTable::default();
        table.mark_dropped("forum-a");
        table.mark_dropped("forum-b");
        table.forget_dropped("forum-a");

        let dropped: Vec<_> = table.take_dropped().into_iter().collect();
        assert_eq!(dropped, vec!["forum-b"]);
        assert!(table.take_dropped().is_empty());
    }
}
