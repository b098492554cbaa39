#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use brandwire_domain::{BrandId, Conversation, ConversationId, ConversationStatus, Message};
use tokio::sync::Mutex;

use crate::{HubStore, StoreError};

/// In-process store used when persistence is disabled, and by tests.
#[derive(Default)]
pub struct MemoryHubStore {
	inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
	conversations: HashMap<ConversationId, Conversation>,
	messages: Vec<Message>,
	follows: HashMap<String, HashSet<BrandId>>,
	fail_saves: bool,
	fail_loads: bool,
}

impl MemoryHubStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make subsequent `save_message` calls fail, to exercise the
	/// persist-before-broadcast path.
	pub async fn set_fail_saves(&self, fail: bool) {
		self.inner.lock().await.fail_saves = fail;
	}

	/// Make subsequent `load_followed_brands` calls fail, to exercise the
	/// registration abort path.
	pub async fn set_fail_loads(&self, fail: bool) {
		self.inner.lock().await.fail_loads = fail;
	}

	pub async fn message_count(&self, id: &ConversationId) -> usize {
		let state = self.inner.lock().await;
		state.messages.iter().filter(|m| &m.conversation_id == id).count()
	}
}

#[async_trait::async_trait]
impl HubStore for MemoryHubStore {
	async fn load_followed_brands(&self, participant_id: &str) -> Result<HashSet<BrandId>, StoreError> {
		let state = self.inner.lock().await;
		if state.fail_loads {
			return Err(StoreError::InvalidRow("simulated load failure".to_string()));
		}
		Ok(state.follows.get(participant_id).cloned().unwrap_or_default())
	}

	async fn conversation_by_id(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
		let state = self.inner.lock().await;
		state.conversations.get(id).cloned().ok_or(StoreError::NotFound)
	}

	async fn create_conversation(&self, conv: &Conversation) -> Result<(), StoreError> {
		let mut state = self.inner.lock().await;
		if state.conversations.contains_key(&conv.id) {
			return Err(StoreError::Constraint(format!("duplicate conversation id: {}", conv.id)));
		}
		state.conversations.insert(conv.id.clone(), conv.clone());
		Ok(())
	}

	async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
		let mut state = self.inner.lock().await;
		state.conversations.remove(id);
		state.messages.retain(|m| &m.conversation_id != id);
		Ok(())
	}

	async fn mark_conversation_closed(&self, id: &ConversationId) -> Result<(), StoreError> {
		let mut state = self.inner.lock().await;
		if let Some(conv) = state.conversations.get_mut(id) {
			conv.status = ConversationStatus::Closed;
		}
		Ok(())
	}

	async fn save_message(&self, msg: &Message) -> Result<(), StoreError> {
		let mut state = self.inner.lock().await;
		if state.fail_saves {
			return Err(StoreError::Constraint("saves disabled".to_string()));
		}
		state.messages.push(msg.clone());
		Ok(())
	}

	async fn conversation_messages(
		&self,
		id: &ConversationId,
		offset: u32,
		limit: u32,
	) -> Result<Vec<Message>, StoreError> {
		let state = self.inner.lock().await;
		let mut page: Vec<Message> = state
			.messages
			.iter()
			.filter(|m| &m.conversation_id == id)
			.cloned()
			.collect();
		// Same ordering as the Postgres query: created_at, then id, both
		// descending, so equal-millisecond messages page identically.
		page.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));
		Ok(page.into_iter().skip(offset as usize).take(limit as usize).collect())
	}

	async fn update_last_message_at(&self, id: &ConversationId, at_unix_ms: i64) -> Result<(), StoreError> {
		let mut state = self.inner.lock().await;
		if let Some(conv) = state.conversations.get_mut(id) {
			conv.last_message_at = at_unix_ms;
		}
		Ok(())
	}

	async fn mark_messages_read(&self, conversation_id: &ConversationId, sender_id: &str) -> Result<u64, StoreError> {
		let mut state = self.inner.lock().await;
		let mut flipped = 0u64;
		for msg in state
			.messages
			.iter_mut()
			.filter(|m| &m.conversation_id == conversation_id && m.sender_id == sender_id && !m.is_read)
		{
			msg.is_read = true;
			flipped += 1;
		}
		Ok(flipped)
	}

	async fn follow_brand(&self, participant_id: &str, brand: &BrandId) -> Result<(), StoreError> {
		let mut state = self.inner.lock().await;
		state
			.follows
			.entry(participant_id.to_string())
			.or_default()
			.insert(brand.clone());
		Ok(())
	}

	async fn unfollow_brand(&self, participant_id: &str, brand: &BrandId) -> Result<(), StoreError> {
		let mut state = self.inner.lock().await;
		if let Some(set) = state.follows.get_mut(participant_id) {
			set.remove(brand);
			if set.is_empty() {
				state.follows.remove(participant_id);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use brandwire_domain::{ConversationKind, MessageContent, MessageId};

	use super::*;

	fn conv(id: &str, p1: &str, p2: &str) -> Conversation {
		Conversation {
			id: ConversationId::new(id).unwrap(),
			participant_one: p1.to_string(),
			participant_two: p2.to_string(),
			kind: ConversationKind::Direct,
			campaign_id: None,
			status: ConversationStatus::Active,
			created_at: 1,
			last_message_at: 1,
		}
	}

	fn msg(conv_id: &str, sender: &str, body: &str, at: i64) -> Message {
		Message {
			id: MessageId::new_v4(),
			conversation_id: ConversationId::new(conv_id).unwrap(),
			sender_id: sender.to_string(),
			content: MessageContent::text(body),
			is_read: false,
			created_at: at,
		}
	}

	#[tokio::test]
	async fn missing_conversation_is_not_found() {
		let store = MemoryHubStore::new();
		let id = ConversationId::new("nope").unwrap();
		assert!(matches!(store.conversation_by_id(&id).await, Err(StoreError::NotFound)));
	}

	#[tokio::test]
	async fn unknown_follower_yields_empty_set() {
		let store = MemoryHubStore::new();
		let brands = store.load_followed_brands("ghost").await.unwrap();
		assert!(brands.is_empty());
	}

	#[tokio::test]
	async fn follow_then_unfollow_roundtrips() {
		let store = MemoryHubStore::new();
		let nike = BrandId::new("nike").unwrap();

		store.follow_brand("carol", &nike).await.unwrap();
		assert!(store.load_followed_brands("carol").await.unwrap().contains(&nike));

		store.unfollow_brand("carol", &nike).await.unwrap();
		assert!(store.load_followed_brands("carol").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn mark_read_scopes_to_one_sender() {
		let store = MemoryHubStore::new();
		store.create_conversation(&conv("c1", "alice", "bob")).await.unwrap();
		store.save_message(&msg("c1", "alice", "one", 10)).await.unwrap();
		store.save_message(&msg("c1", "alice", "two", 20)).await.unwrap();
		store.save_message(&msg("c1", "bob", "reply", 30)).await.unwrap();

		let flipped = store
			.mark_messages_read(&ConversationId::new("c1").unwrap(), "alice")
			.await
			.unwrap();
		assert_eq!(flipped, 2);

		// Bob's own message stays unread; a second pass flips nothing.
		let again = store
			.mark_messages_read(&ConversationId::new("c1").unwrap(), "alice")
			.await
			.unwrap();
		assert_eq!(again, 0);
	}

	#[tokio::test]
	async fn history_pages_newest_first() {
		let store = MemoryHubStore::new();
		store.create_conversation(&conv("c1", "alice", "bob")).await.unwrap();
		for (i, body) in ["first", "second", "third"].iter().enumerate() {
			store.save_message(&msg("c1", "alice", body, i as i64)).await.unwrap();
		}

		let id = ConversationId::new("c1").unwrap();
		let page = store.conversation_messages(&id, 0, 2).await.unwrap();
		assert_eq!(page.len(), 2);
		assert_eq!(page[0].content, MessageContent::text("third"));
		assert_eq!(page[1].content, MessageContent::text("second"));

		let rest = store.conversation_messages(&id, 2, 2).await.unwrap();
		assert_eq!(rest.len(), 1);
		assert_eq!(rest[0].content, MessageContent::text("first"));
	}

	#[tokio::test]
	async fn history_breaks_created_at_ties_by_id() {
		let store = MemoryHubStore::new();
		store.create_conversation(&conv("c1", "alice", "bob")).await.unwrap();

		let a = msg("c1", "alice", "a", 10);
		let b = msg("c1", "alice", "b", 10);
		store.save_message(&a).await.unwrap();
		store.save_message(&b).await.unwrap();

		let id = ConversationId::new("c1").unwrap();
		let page = store.conversation_messages(&id, 0, 2).await.unwrap();
		let (higher, lower) = if a.id.0 > b.id.0 { (a, b) } else { (b, a) };
		assert_eq!(page[0].id, higher.id);
		assert_eq!(page[1].id, lower.id);
	}

	#[tokio::test]
	async fn close_then_delete_conversation() {
		let store = MemoryHubStore::new();
		store.create_conversation(&conv("c1", "alice", "bob")).await.unwrap();
		store.save_message(&msg("c1", "alice", "hi", 1)).await.unwrap();

		let id = ConversationId::new("c1").unwrap();
		store.mark_conversation_closed(&id).await.unwrap();
		assert_eq!(store.conversation_by_id(&id).await.unwrap().status, ConversationStatus::Closed);

		// Delete takes the messages with it.
		store.delete_conversation(&id).await.unwrap();
		assert!(matches!(store.conversation_by_id(&id).await, Err(StoreError::NotFound)));
		assert_eq!(store.message_count(&id).await, 0);
	}

	#[tokio::test]
	async fn failed_saves_persist_nothing() {
		let store = MemoryHubStore::new();
		store.create_conversation(&conv("c1", "alice", "bob")).await.unwrap();
		store.set_fail_saves(true).await;

		let err = store.save_message(&msg("c1", "alice", "hi", 1)).await;
		assert!(matches!(err, Err(StoreError::Constraint(_))));
		assert_eq!(store.message_count(&ConversationId::new("c1").unwrap()).await, 0);
	}
}
