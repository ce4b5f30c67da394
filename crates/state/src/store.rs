//! The versioned state store.
//!
//! All conversation mutation goes through [`StateStore::update`], which
//! serializes writers, replaces the state wholesale, and publishes the
//! new version over a broadcast channel. Subscribers consume on their own
//! tasks, so an observer can never reenter `update` inside the commit
//! path. Publications are strictly version-ordered; a lagged receiver
//! resynchronizes by calling [`StateStore::read`].

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use tidepool_core::ConversationState;

/// An immutable state value paired with its version number.
///
/// Versions start at 0 for the empty initial state and increase by one
/// per successful update.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct VersionedState {
    pub version: u64,
    pub state: ConversationState,
}

/// Durable container for one conversation's state.
pub struct StateStore {
    current: Mutex<Arc<VersionedState>>,
    tx: broadcast::Sender<Arc<VersionedState>>,
}

impl StateStore {
    /// Create a store holding the empty initial state.
    pub fn new() -> Self {
        Self::with_state(ConversationState::new())
    }

    /// Create a store seeded with an existing state (version 0).
    pub fn with_state(state: ConversationState) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            current: Mutex::new(Arc::new(VersionedState { version: 0, state })),
            tx,
        }
    }

    /// The current durable snapshot.
    pub fn read(&self) -> Arc<VersionedState> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Atomically replace the state with the value produced by `f`.
    ///
    /// The transformation runs under the store lock, so no two updates
    /// interleave and no update is lost under concurrent triggers. The
    /// committed value is published to all subscribers after the lock is
    /// released. `f` must be a pure transformation — it is handed the
    /// previous state by reference and returns the full replacement.
    pub fn update(
        &self,
        f: impl FnOnce(&ConversationState) -> ConversationState,
    ) -> Arc<VersionedState> {
        let next = {
            let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
            let next = Arc::new(VersionedState {
                version: guard.version + 1,
                state: f(&guard.state),
            });
            *guard = next.clone();
            next
        };

        // Ignore send errors (no subscribers = that's fine)
        let _ = self.tx.send(next.clone());
        next
    }

    /// Subscribe to state updates.
    ///
    /// Returns the current snapshot together with a receiver for all
    /// subsequent versions, so an observer attaching after N updates
    /// starts from state N rather than waiting for update N+1.
    pub fn subscribe(&self) -> (Arc<VersionedState>, broadcast::Receiver<Arc<VersionedState>>) {
        // Take the lock around both reads so no version published between
        // the snapshot and the receiver registration can be missed.
        let guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let rx = self.tx.subscribe();
        (guard.clone(), rx)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
