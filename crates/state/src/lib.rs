//! Durable, versioned conversation state for Tidepool.
//!
//! `StateStore` is the single owner of a conversation's
//! `ConversationState`. Every mutation is an atomic read-modify-write
//! that produces a whole new immutable value, bumps a monotonic version,
//! and broadcasts the result to subscribers. `StoreRegistry` keys stores
//! by conversation id.

pub mod registry;
pub mod store;

pub use registry::StoreRegistry;
pub use store::{StateStore, VersionedState};
