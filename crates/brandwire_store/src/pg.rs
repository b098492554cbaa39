#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use brandwire_domain::{
	BrandId, CampaignId, Conversation, ConversationId, ConversationKind, ConversationStatus, Message, MessageContent,
	MessageId, MessageKind,
};
use sqlx::error::ErrorKind;

use crate::{HubStore, StoreError};

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgHubStore {
	pool: sqlx::PgPool,
}

impl PgHubStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			Ok(Self { pool })
		} else {
			Err(anyhow!("unsupported database_url (use postgres:)"))
		}
	}

	pub fn from_pool(pool: sqlx::PgPool) -> Self {
		Self { pool }
	}
}

fn map_db_err(err: sqlx::Error) -> StoreError {
	if let sqlx::Error::Database(db) = &err {
		match db.kind() {
			ErrorKind::CheckViolation | ErrorKind::ForeignKeyViolation | ErrorKind::UniqueViolation | ErrorKind::NotNullViolation => {
				return StoreError::Constraint(db.message().to_string());
			}
			_ => {}
		}
	}
	StoreError::Database(err)
}

type ConversationRow = (String, String, String, String, Option<String>, String, i64, i64);
type MessageRow = (uuid::Uuid, String, String, String, String, bool, i64);

fn conversation_from_row(row: ConversationRow) -> Result<Conversation, StoreError> {
	let (id, participant_one, participant_two, kind, campaign_id, status, created_at, last_message_at) = row;

	let campaign_id = campaign_id
		.map(CampaignId::new)
		.transpose()
		.map_err(|e| StoreError::InvalidRow(e.to_string()))?;

	Ok(Conversation {
		id: ConversationId::new(id).map_err(|e| StoreError::InvalidRow(e.to_string()))?,
		participant_one,
		participant_two,
		kind: ConversationKind::from_str(&kind).map_err(|e| StoreError::InvalidRow(e.to_string()))?,
		campaign_id,
		status: ConversationStatus::from_str(&status).map_err(|e| StoreError::InvalidRow(e.to_string()))?,
		created_at,
		last_message_at,
	})
}

fn message_from_row(row: MessageRow) -> Result<Message, StoreError> {
	let (id, conversation_id, sender_id, kind, content, is_read, created_at) = row;

	let kind = MessageKind::from_str(&kind).map_err(|e| StoreError::InvalidRow(e.to_string()))?;
	let content =
		serde_json::from_str::<MessageContent>(&content).map_err(|e| StoreError::InvalidRow(e.to_string()))?;
	if kind != content.kind() {
		return Err(StoreError::InvalidRow(format!(
			"message_kind column {kind} does not match content kind {}",
			content.kind()
		)));
	}

	Ok(Message {
		id: MessageId(id),
		conversation_id: ConversationId::new(conversation_id).map_err(|e| StoreError::InvalidRow(e.to_string()))?,
		sender_id,
		content,
		is_read,
		created_at,
	})
}

#[async_trait::async_trait]
impl HubStore for PgHubStore {
	async fn load_followed_brands(&self, participant_id: &str) -> Result<HashSet<BrandId>, StoreError> {
		let rows: Vec<(String,)> = sqlx::query_as("SELECT brand_id FROM following_list WHERE follower_id = $1")
			.bind(participant_id)
			.fetch_all(&self.pool)
			.await
			.map_err(map_db_err)?;

		let mut out = HashSet::with_capacity(rows.len());
		for (brand,) in rows {
			out.insert(BrandId::new(brand).map_err(|e| StoreError::InvalidRow(e.to_string()))?);
		}
		Ok(out)
	}

	async fn conversation_by_id(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
		let row: Option<ConversationRow> = sqlx::query_as(
			"SELECT id, participant_one, participant_two, kind, campaign_id, status, created_at, last_message_at \
			FROM conversations WHERE id = $1",
		)
		.bind(id.as_str())
		.fetch_optional(&self.pool)
		.await
		.map_err(map_db_err)?;

		match row {
			Some(row) => conversation_from_row(row),
			None => Err(StoreError::NotFound),
		}
	}

	async fn create_conversation(&self, conv: &Conversation) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO conversations \
			(id, participant_one, participant_two, kind, campaign_id, status, created_at, last_message_at) \
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
		)
		.bind(conv.id.as_str())
		.bind(&conv.participant_one)
		.bind(&conv.participant_two)
		.bind(conv.kind.as_str())
		.bind(conv.campaign_id.as_ref().map(|c| c.as_str()))
		.bind(conv.status.as_str())
		.bind(conv.created_at)
		.bind(conv.last_message_at)
		.execute(&self.pool)
		.await
		.map_err(map_db_err)?;

		Ok(())
	}

	async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
		sqlx::query("DELETE FROM conversations WHERE id = $1")
			.bind(id.as_str())
			.execute(&self.pool)
			.await
			.map_err(map_db_err)?;
		Ok(())
	}

	async fn mark_conversation_closed(&self, id: &ConversationId) -> Result<(), StoreError> {
		sqlx::query("UPDATE conversations SET status = 'closed' WHERE id = $1")
			.bind(id.as_str())
			.execute(&self.pool)
			.await
			.map_err(map_db_err)?;
		Ok(())
	}

	async fn save_message(&self, msg: &Message) -> Result<(), StoreError> {
		let content = serde_json::to_string(&msg.content).map_err(|e| StoreError::InvalidRow(e.to_string()))?;

		sqlx::query(
			"INSERT INTO messages (id, conversation_id, sender_id, message_kind, content, is_read, created_at) \
			VALUES ($1, $2, $3, $4, $5, $6, $7)",
		)
		.bind(msg.id.0)
		.bind(msg.conversation_id.as_str())
		.bind(&msg.sender_id)
		.bind(msg.kind().as_str())
		.bind(content)
		.bind(msg.is_read)
		.bind(msg.created_at)
		.execute(&self.pool)
		.await
		.map_err(map_db_err)?;

		Ok(())
	}

	async fn conversation_messages(
		&self,
		id: &ConversationId,
		offset: u32,
		limit: u32,
	) -> Result<Vec<Message>, StoreError> {
		let rows: Vec<MessageRow> = sqlx::query_as(
			"SELECT id, conversation_id, sender_id, message_kind, content, is_read, created_at \
			FROM messages WHERE conversation_id = $1 \
			ORDER BY created_at DESC, id DESC \
			OFFSET $2 LIMIT $3",
		)
		.bind(id.as_str())
		.bind(i64::from(offset))
		.bind(i64::from(limit))
		.fetch_all(&self.pool)
		.await
		.map_err(map_db_err)?;

		rows.into_iter().map(message_from_row).collect()
	}

	async fn update_last_message_at(&self, id: &ConversationId, at_unix_ms: i64) -> Result<(), StoreError> {
		sqlx::query("UPDATE conversations SET last_message_at = $2 WHERE id = $1")
			.bind(id.as_str())
			.bind(at_unix_ms)
			.execute(&self.pool)
			.await
			.map_err(map_db_err)?;
		Ok(())
	}

	async fn mark_messages_read(&self, conversation_id: &ConversationId, sender_id: &str) -> Result<u64, StoreError> {
		let result = sqlx::query(
			"UPDATE messages SET is_read = TRUE \
			WHERE conversation_id = $1 AND sender_id = $2 AND is_read = FALSE",
		)
		.bind(conversation_id.as_str())
		.bind(sender_id)
		.execute(&self.pool)
		.await
		.map_err(map_db_err)?;

		Ok(result.rows_affected())
	}

	async fn follow_brand(&self, participant_id: &str, brand: &BrandId) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO following_list (follower_id, brand_id) VALUES ($1, $2) \
			ON CONFLICT (follower_id, brand_id) DO NOTHING",
		)
		.bind(participant_id)
		.bind(brand.as_str())
		.execute(&self.pool)
		.await
		.map_err(map_db_err)?;
		Ok(())
	}

	async fn unfollow_brand(&self, participant_id: &str, brand: &BrandId) -> Result<(), StoreError> {
		sqlx::query("DELETE FROM following_list WHERE follower_id = $1 AND brand_id = $2")
			.bind(participant_id)
			.bind(brand.as_str())
			.execute(&self.pool)
			.await
			.map_err(map_db_err)?;
		Ok(())
	}
}
