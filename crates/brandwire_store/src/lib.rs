#![forbid(unsafe_code)]

//! Persistence contract for the messaging hub.
//!
//! The hub calls the store synchronously from inside its event loop, so every
//! method here is a single round trip. Durable state (conversations,
//! messages, follow relationships) lives behind [`HubStore`]; the hub's
//! registry and follower index are rebuilt from it on connect.

mod memory;
mod pg;

pub use memory::MemoryHubStore;
pub use pg::PgHubStore;

use std::collections::HashSet;

use brandwire_domain::{BrandId, Conversation, ConversationId, Message};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	/// The requested row does not exist. Expected outcome, not a failure.
	#[error("row not found")]
	NotFound,

	/// The write violated a schema constraint (e.g. a disallowed
	/// message kind).
	#[error("constraint violation: {0}")]
	Constraint(String),

	/// A persisted row could not be mapped back into a domain value.
	#[error("invalid row: {0}")]
	InvalidRow(String),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
}

/// The narrow persistence surface the hub depends on.
#[async_trait::async_trait]
pub trait HubStore: Send + Sync {
	/// Brands the given participant follows. Unknown participants yield an
	/// empty set, not an error.
	async fn load_followed_brands(&self, participant_id: &str) -> Result<HashSet<BrandId>, StoreError>;

	async fn conversation_by_id(&self, id: &ConversationId) -> Result<Conversation, StoreError>;

	async fn create_conversation(&self, conv: &Conversation) -> Result<(), StoreError>;

	async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError>;

	/// Campaign lifecycle hook: flips the conversation status to closed.
	async fn mark_conversation_closed(&self, id: &ConversationId) -> Result<(), StoreError>;

	async fn save_message(&self, msg: &Message) -> Result<(), StoreError>;

	/// One page of a conversation's history, newest first.
	async fn conversation_messages(
		&self,
		id: &ConversationId,
		offset: u32,
		limit: u32,
	) -> Result<Vec<Message>, StoreError>;

	async fn update_last_message_at(&self, id: &ConversationId, at_unix_ms: i64) -> Result<(), StoreError>;

	/// Marks every unread message sent by `sender_id` in the conversation
	/// as read. Returns the number of rows flipped.
	async fn mark_messages_read(&self, conversation_id: &ConversationId, sender_id: &str) -> Result<u64, StoreError>;

	async fn follow_brand(&self, participant_id: &str, brand: &BrandId) -> Result<(), StoreError>;

	async fn unfollow_brand(&self, participant_id: &str, brand: &BrandId) -> Result<(), StoreError>;
}
