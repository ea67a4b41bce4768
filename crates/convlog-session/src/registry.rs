use crate::container::ConversationContainer;
use crate::item::ConversationItem;
use chrono::{DateTime, Local};
use convlog_core::CorrelationKeys;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// The set of conversations currently being tracked.
///
/// Containers are kept in creation order and looked up by OR-match on either
/// correlation key. One lock guards both mutation and iteration. At most one
/// container exists per session: [`add`](Self::add) looks up before inserting,
/// under the same write lock.
pub struct ConversationRegistry {
    containers: RwLock<Vec<ConversationContainer>>,
}

impl ConversationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of the container tracking the session with `keys`.
    pub async fn find_by_session(&self, keys: &CorrelationKeys) -> Option<ConversationContainer> {
        let containers = self.containers.read().await;
        containers.iter().find(|c| c.matches(keys)).cloned()
    }

    /// Snapshot of the container that has `key` as either correlation key.
    pub async fn find_by_key(&self, key: &str) -> Option<ConversationContainer> {
        let containers = self.containers.read().await;
        containers.iter().find(|c| c.matches_key(key)).cloned()
    }

    /// Whether a container matches `keys`.
    pub async fn contains(&self, keys: &CorrelationKeys) -> bool {
        let containers = self.containers.read().await;
        containers.iter().any(|c| c.matches(keys))
    }

    /// Insert `container` unless its session is already tracked.
    ///
    /// Returns `true` if it was inserted. The first container for a session
    /// wins; later ones are dropped.
    pub async fn add(&self, container: ConversationContainer) -> bool {
        let keys = container.keys();
        if !keys.is_trackable() {
            debug!(container = %container.id(), "Ignoring session without correlation keys");
            return false;
        }

        let mut containers = self.containers.write().await;
        if let Some(existing) = containers.iter().find(|c| c.matches(&keys)) {
            debug!(session = %keys, container = %existing.id(), "Session already tracked");
            return false;
        }
        info!(session = %keys, container = %container.id(), "Tracking conversation");
        containers.push(container);
        true
    }

    /// Stop tracking the session with `keys`. Its transcript stays on disk.
    pub async fn remove(&self, keys: &CorrelationKeys) -> Option<ConversationContainer> {
        let mut containers = self.containers.write().await;
        let pos = containers.iter().position(|c| c.matches(keys))?;
        let removed = containers.remove(pos);
        info!(session = %keys, container = %removed.id(), "Stopped tracking conversation");
        Some(removed)
    }

    /// Append `item` to the matching container. Returns `false` if the session
    /// is not tracked.
    pub async fn append(&self, keys: &CorrelationKeys, item: ConversationItem) -> bool {
        let mut containers = self.containers.write().await;
        match containers.iter_mut().find(|c| c.matches(keys)) {
            Some(container) => {
                container.push(item);
                true
            }
            None => false,
        }
    }

    /// Record inbound activity at `at`. Returns a snapshot of the container
    /// taken under the same lock.
    pub async fn touch(
        &self,
        keys: &CorrelationKeys,
        at: DateTime<Local>,
    ) -> Option<ConversationContainer> {
        let mut containers = self.containers.write().await;
        let container = containers.iter_mut().find(|c| c.matches(keys))?;
        container.record_activity(at);
        Some(container.clone())
    }

    /// Visit every container in creation order under the read lock.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ConversationContainer),
    {
        let containers = self.containers.read().await;
        for container in containers.iter() {
            f(container);
        }
    }

    /// Snapshot of every container in creation order, for the periodic flush.
    ///
    /// Writing happens on the snapshot so the lock is not held across I/O.
    pub async fn snapshot(&self) -> Vec<ConversationContainer> {
        let mut out = Vec::new();
        self.for_each(|c| out.push(c.clone())).await;
        out
    }

    /// Number of tracked conversations.
    pub async fn len(&self) -> usize {
        self.containers.read().await.len()
    }

    /// Whether nothing is tracked.
    pub async fn is_empty(&self) -> bool {
        self.containers.read().await.is_empty()
    }
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::item::ItemDetail;
    use convlog_client::InMemorySession;
    use std::sync::Arc;

    fn container(primary: &str, secondary: &str) -> ConversationContainer {
        ConversationContainer::new(InMemorySession::new(CorrelationKeys::new(primary, secondary)))
    }

    fn participant(keys: &CorrelationKeys, name: &str) -> ConversationItem {
        ConversationItem::new(
            keys.clone(),
            "<participant/>",
            ItemDetail::Participant {
                display_name: Some(name.into()),
            },
        )
    }

    #[tokio::test]
    async fn test_dual_key_lookup_returns_same_container() {
        let registry = ConversationRegistry::new();
        assert!(registry.add(container("A", "B")).await);

        let by_primary = registry.find_by_key("A").await.unwrap();
        let by_secondary = registry.find_by_key("B").await.unwrap();
        assert_eq!(by_primary.id(), by_secondary.id());
    }

    #[tokio::test]
    async fn test_secondary_only_session() {
        let registry = ConversationRegistry::new();
        registry.add(container("", "B")).await;

        assert!(registry.find_by_key("").await.is_none());
        assert!(registry
            .find_by_session(&CorrelationKeys::primary("A"))
            .await
            .is_none());
        assert!(registry.find_by_key("B").await.is_some());
        assert!(registry
            .find_by_session(&CorrelationKeys::new("A", "B"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_add_is_suppressed() {
        let registry = ConversationRegistry::new();
        let session = InMemorySession::new(CorrelationKeys::primary("S1"));
        let first = ConversationContainer::new(session.clone());
        let first_id = first.id();

        assert!(registry.add(first).await);
        assert!(!registry.add(ConversationContainer::new(session)).await);
        // Same key on a different handle is still the same conversation.
        assert!(!registry.add(container("S1", "")).await);

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.find_by_key("S1").await.unwrap().id(), first_id);
    }

    #[tokio::test]
    async fn test_untrackable_session_is_ignored() {
        let registry = ConversationRegistry::new();
        assert!(!registry.add(container("", "")).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_size_is_adds_minus_removes() {
        let registry = ConversationRegistry::new();
        let n = 6;
        for i in 0..n {
            registry.add(container(&format!("S{i}"), "")).await;
        }
        let m = 4;
        for i in 0..m {
            assert!(registry
                .remove(&CorrelationKeys::primary(format!("S{i}")))
                .await
                .is_some());
        }
        assert_eq!(registry.len().await, n - m);
        // Removing an untracked session changes nothing.
        assert!(registry.remove(&CorrelationKeys::primary("S0")).await.is_none());
        assert_eq!(registry.len().await, n - m);
    }

    #[tokio::test]
    async fn test_append_only_affects_matching_container() {
        let registry = ConversationRegistry::new();
        registry.add(container("S1", "")).await;
        registry.add(container("S2", "")).await;

        let s1 = CorrelationKeys::primary("S1");
        assert!(registry.append(&s1, participant(&s1, "Ada")).await);
        assert!(!registry
            .append(&CorrelationKeys::primary("nope"), participant(&s1, "x"))
            .await);

        assert_eq!(registry.find_by_key("S1").await.unwrap().items().len(), 1);
        assert!(registry.find_by_key("S2").await.unwrap().items().is_empty());
    }

    #[tokio::test]
    async fn test_touch_records_activity() {
        let registry = ConversationRegistry::new();
        registry.add(container("S1", "")).await;
        let at = Local::now();

        let touched = registry
            .touch(&CorrelationKeys::primary("S1"), at)
            .await
            .unwrap();
        assert_eq!(touched.transcript(None).last_activity, Some(at));
        assert!(registry.touch(&CorrelationKeys::primary("S9"), at).await.is_none());

        // Later periodic snapshots keep the recorded activity.
        let all = registry.snapshot().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].transcript(None).last_activity, Some(at));
    }

    #[tokio::test]
    async fn test_for_each_in_creation_order() {
        let registry = ConversationRegistry::new();
        for key in ["c", "a", "b"] {
            registry.add(container(key, "")).await;
        }
        let mut seen = Vec::new();
        registry
            .for_each(|c| seen.push(c.keys().primary_id))
            .await;
        assert_eq!(seen, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_concurrent_adds_keep_one_container_per_session() {
        let registry = Arc::new(ConversationRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("S{}", i % 4);
                registry.add(container(&key, "")).await
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 4);
        assert_eq!(registry.len().await, 4);
    }
}
