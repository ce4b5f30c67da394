//! Keyed registry of per-conversation stores.
//!
//! Conversation state is process-wide durable state keyed by conversation
//! id: a store is created on first use and lives for the conversation's
//! lifetime. The registry is capacity-bounded; at capacity the oldest
//! conversation is evicted before a new one is created.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use tidepool_core::ConversationId;

use crate::store::StateStore;

/// Maximum number of in-memory conversations before oldest are evicted.
const MAX_CONVERSATIONS: usize = 1_000;

struct Entry {
    store: Arc<StateStore>,
    /// Creation order, for eviction
    seq: u64,
}

/// Process-wide map of conversation id → state store.
pub struct StoreRegistry {
    stores: RwLock<HashMap<ConversationId, Entry>>,
    capacity: usize,
    next_seq: AtomicU64,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CONVERSATIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            capacity,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Get the store for a conversation, creating it on first use.
    pub async fn get_or_create(&self, id: &ConversationId) -> Arc<StateStore> {
        {
            let stores = self.stores.read().await;
            if let Some(entry) = stores.get(id) {
                return entry.store.clone();
            }
        }

        let mut stores = self.stores.write().await;
        // Re-check under the write lock — another task may have won.
        if let Some(entry) = stores.get(id) {
            return entry.store.clone();
        }

        // Evict oldest conversation if at capacity
        if stores.len() >= self.capacity {
            if let Some(oldest_key) = stores
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone())
            {
                tracing::debug!(conversation_id = %oldest_key, "Evicting oldest conversation");
                stores.remove(&oldest_key);
            }
        }

        let store = Arc::new(StateStore::new());
        stores.insert(
            id.clone(),
            Entry {
                store: store.clone(),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        store
    }

    /// Look up an existing store without creating one.
    pub async fn get(&self, id: &ConversationId) -> Option<Arc<StateStore>> {
        self.stores.read().await.get(id).map(|e| e.store.clone())
    }

    /// Ids of all live conversations.
    pub async fn ids(&self) -> Vec<ConversationId> {
        self.stores.read().await.keys().cloned().collect()
    }

    /// Number of live conversations.
    pub async fn len(&self) -> usize {
        self.stores.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stores.read().await.is_empty()
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_core::Message;

    #[tokio::test]
    async fn get_or_create_returns_same_store() {
        let registry = StoreRegistry::new();
        let id = ConversationId::from("default");

        let a = registry.get_or_create(&id).await;
        a.update(|s| s.with_message(Message::user("hello")));

        let b = registry.get_or_create(&id).await;
        assert_eq!(b.read().state.messages.len(), 1);
    }

    #[tokio::test]
    async fn get_without_create_returns_none() {
        let registry = StoreRegistry::new();
        let id = ConversationId::from("missing");
        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn eviction_drops_oldest() {
        let registry = StoreRegistry::with_capacity(2);
        let first = ConversationId::from("first");
        let second = ConversationId::from("second");
        let third = ConversationId::from("third");

        registry.get_or_create(&first).await;
        registry.get_or_create(&second).await;
        registry.get_or_create(&third).await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.get(&first).await.is_none());
        assert!(registry.get(&third).await.is_some());
    }
}
