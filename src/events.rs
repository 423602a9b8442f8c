//! Change notifications published after every committed mutation.
//!
//! Observers (a UI layer, another engine instance) subscribe to a
//! [`ChangeNotifier`] and re-read the records named in each [`ChangeSet`].
//! Exactly one change set is published per committed operation; failed
//! operations publish nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the notification channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// The four record collections owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Members,
    Sessions,
    Bookings,
    Transactions,
}

impl Collection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Members => "members",
            Self::Sessions => "sessions",
            Self::Bookings => "bookings",
            Self::Transactions => "transactions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ids touched by one committed operation, grouped by collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    changes: BTreeMap<Collection, BTreeSet<String>>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` in `collection` was created, updated or removed.
    pub fn touch(&mut self, collection: Collection, id: impl Into<String>) -> &mut Self {
        self.changes.entry(collection).or_default().insert(id.into());
        self
    }

    /// Builder form of [`ChangeSet::touch`].
    #[must_use]
    pub fn with(mut self, collection: Collection, id: impl Into<String>) -> Self {
        self.touch(collection, id);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        self.changes
            .get(&collection)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Affected ids in `collection`, sorted.
    pub fn ids(&self, collection: Collection) -> impl Iterator<Item = &str> {
        self.changes
            .get(&collection)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    pub fn collections(&self) -> impl Iterator<Item = Collection> + '_ {
        self.changes.keys().copied()
    }
}

/// Fan-out point for [`ChangeSet`]s.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeSet>,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.tx.subscribe()
    }

    /// Publishes a change set. Having no subscribers is not an error.
    pub fn publish(&self, changes: ChangeSet) {
        if changes.is_empty() {
            return;
        }
        match self.tx.send(changes) {
            Ok(receivers) => debug!(receivers, "change notification delivered"),
            Err(_) => debug!("change notification dropped: no active subscribers"),
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_change_set_groups_ids_by_collection() {
        let mut changes = ChangeSet::new()
            .with(Collection::Members, "member-2")
            .with(Collection::Members, "member-1")
            .with(Collection::Sessions, "session-1");
        changes.touch(Collection::Members, "member-1");

        let members: Vec<_> = changes.ids(Collection::Members).collect();
        assert_eq!(members, vec!["member-1", "member-2"]);
        assert!(changes.contains(Collection::Sessions, "session-1"));
        assert_eq!(changes.ids(Collection::Bookings).count(), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let notifier = ChangeNotifier::new(4);
        let mut rx = notifier.subscribe();

        notifier.publish(ChangeSet::new().with(Collection::Sessions, "session-9"));
        let received = rx.recv().await.unwrap();
        assert!(received.contains(Collection::Sessions, "session-9"));
    }

    #[test]
    fn test_publish_without_subscribers_is_ignored() {
        let notifier = ChangeNotifier::default();
        notifier.publish(ChangeSet::new().with(Collection::Members, "member-1"));
    }
}
