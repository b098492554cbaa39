#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown participant role: {0}")]
	UnknownRole(String),
	#[error("unknown message kind: {0}")]
	UnknownKind(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Role of a connected participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
	User,
	Brand,
}

impl ParticipantRole {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			ParticipantRole::User => "user",
			ParticipantRole::Brand => "brand",
		}
	}
}

impl fmt::Display for ParticipantRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ParticipantRole {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"user" | "creator" => Ok(ParticipantRole::User),
			"brand" => Ok(ParticipantRole::Brand),
			other => Err(ParseIdError::UnknownRole(other.to_string())),
		}
	}
}

/// Identity of one marketplace participant: a creator account or a brand
/// account, tagged with its role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId {
	role: ParticipantRole,
	id: String,
}

impl ParticipantId {
	/// Create a non-empty participant identity.
	pub fn new(role: ParticipantRole, id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self { role, id })
	}

	pub fn user(id: impl Into<String>) -> Result<Self, ParseIdError> {
		Self::new(ParticipantRole::User, id)
	}

	pub fn brand(id: impl Into<String>) -> Result<Self, ParseIdError> {
		Self::new(ParticipantRole::Brand, id)
	}

	/// Parse a `role:id` string (e.g. `user:creator-1`).
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		let (role_s, id_s) = s
			.split_once(':')
			.ok_or_else(|| ParseIdError::InvalidFormat("expected role:id".into()))?;

		let role = ParticipantRole::from_str(role_s)?;
		Self::new(role, id_s)
	}

	/// The bare account id, as stored in conversation participant columns.
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn role(&self) -> ParticipantRole {
		self.role
	}
}

impl fmt::Display for ParticipantId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.role, self.id)
	}
}

impl FromStr for ParticipantId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ParticipantId::parse(s)
	}
}

/// Brand account identifier, used to key the follower index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandId(String);

impl BrandId {
	/// Create a non-empty `BrandId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for BrandId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for BrandId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		BrandId::new(s.to_string())
	}
}

/// Conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
	/// Create a non-empty `ConversationId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ConversationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ConversationId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ConversationId::new(s.to_string())
	}
}

/// Campaign identifier carried by campaign-linked conversations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(String);

impl CampaignId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for CampaignId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
	/// Create a new random message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Supported message content kinds. Video is deliberately not on the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
	Text,
	Image,
	Document,
}

impl MessageKind {
	/// Stable string identifier, as persisted in the message row.
	pub const fn as_str(self) -> &'static str {
		match self {
			MessageKind::Text => "text",
			MessageKind::Image => "image",
			MessageKind::Document => "document",
		}
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MessageKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"text" | "txt" => Ok(MessageKind::Text),
			"image" => Ok(MessageKind::Image),
			"document" | "pdf" => Ok(MessageKind::Document),
			other => Err(ParseIdError::UnknownKind(other.to_string())),
		}
	}
}

/// Message payload: a closed union over the supported kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
	Text {
		body: String,
	},
	Image {
		url: String,
	},
	Document {
		url: String,
		name: Option<String>,
	},
}

impl MessageContent {
	pub fn text(body: impl Into<String>) -> Self {
		MessageContent::Text { body: body.into() }
	}

	/// The kind tag matching this payload.
	pub const fn kind(&self) -> MessageKind {
		match self {
			MessageContent::Text { .. } => MessageKind::Text,
			MessageContent::Image { .. } => MessageKind::Image,
			MessageContent::Document { .. } => MessageKind::Document,
		}
	}
}

/// How a conversation came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
	Direct,
	Campaign,
}

impl ConversationKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ConversationKind::Direct => "direct",
			ConversationKind::Campaign => "campaign",
		}
	}
}

impl fmt::Display for ConversationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ConversationKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"direct" => Ok(ConversationKind::Direct),
			"campaign" => Ok(ConversationKind::Campaign),
			other => Err(ParseIdError::InvalidFormat(format!("unknown conversation kind: {other}"))),
		}
	}
}

/// Conversation lifecycle status. Campaign-linked conversations are closed
/// when the campaign ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
	Active,
	Closed,
}

impl ConversationStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			ConversationStatus::Active => "active",
			ConversationStatus::Closed => "closed",
		}
	}
}

impl fmt::Display for ConversationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ConversationStatus {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"active" => Ok(ConversationStatus::Active),
			"closed" => Ok(ConversationStatus::Closed),
			other => Err(ParseIdError::InvalidFormat(format!("unknown conversation status: {other}"))),
		}
	}
}

/// One two-party conversation. Created by external collaborators (e.g. when
/// a campaign application is accepted); the hub only reads it and bumps
/// `last_message_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
	pub id: ConversationId,
	pub participant_one: String,
	pub participant_two: String,
	pub kind: ConversationKind,
	pub campaign_id: Option<CampaignId>,
	pub status: ConversationStatus,
	/// Unix milliseconds.
	pub created_at: i64,
	/// Unix milliseconds.
	pub last_message_at: i64,
}

impl Conversation {
	/// Whether `id` is one of the two participants.
	pub fn has_participant(&self, id: &str) -> bool {
		self.participant_one == id || self.participant_two == id
	}

	/// The participant facing `id`, or `None` if `id` is not in the
	/// conversation at all.
	pub fn other_participant(&self, id: &str) -> Option<&str> {
		if self.participant_one == id {
			Some(&self.participant_two)
		} else if self.participant_two == id {
			Some(&self.participant_one)
		} else {
			None
		}
	}
}

/// One persisted chat message. Immutable after creation except for the
/// read flag.
///
/// The kind is not stored; it is derived from the content union, so a
/// message can never carry a `message_kind` tag that disagrees with its
/// payload. The wire and the database still carry the tag explicitly, and
/// deserialization rejects a mismatched pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MessageWire", into = "MessageWire")]
pub struct Message {
	pub id: MessageId,
	pub conversation_id: ConversationId,
	pub sender_id: String,
	pub content: MessageContent,
	pub is_read: bool,
	/// Unix milliseconds.
	pub created_at: i64,
}

impl Message {
	/// The kind tag matching this message's content.
	pub const fn kind(&self) -> MessageKind {
		self.content.kind()
	}
}

/// Wire shape of a message: carries the redundant `message_kind` tag
/// alongside the tagged content union.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageWire {
	id: MessageId,
	conversation_id: ConversationId,
	sender_id: String,
	message_kind: MessageKind,
	content: MessageContent,
	is_read: bool,
	created_at: i64,
}

impl From<Message> for MessageWire {
	fn from(msg: Message) -> Self {
		Self {
			id: msg.id,
			conversation_id: msg.conversation_id,
			sender_id: msg.sender_id,
			message_kind: msg.content.kind(),
			content: msg.content,
			is_read: msg.is_read,
			created_at: msg.created_at,
		}
	}
}

impl TryFrom<MessageWire> for Message {
	type Error = ParseIdError;

	fn try_from(wire: MessageWire) -> Result<Self, Self::Error> {
		if wire.message_kind != wire.content.kind() {
			return Err(ParseIdError::InvalidFormat(format!(
				"message_kind {} does not match content kind {}",
				wire.message_kind,
				wire.content.kind()
			)));
		}
		Ok(Self {
			id: wire.id,
			conversation_id: wire.conversation_id,
			sender_id: wire.sender_id,
			content: wire.content,
			is_read: wire.is_read,
			created_at: wire.created_at,
		})
	}
}
