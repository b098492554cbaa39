#![forbid(unsafe_code)]

pub mod framing;

pub use framing::{DEFAULT_MAX_FRAME_SIZE, CodecError, decode_hello, decode_inbound, encode_frame};

use brandwire_domain::{BrandId, ConversationId, Message, MessageContent, MessageId, ParticipantRole};
use serde::{Deserialize, Serialize};

/// One decoded inbound frame: the client correlation ref plus the typed
/// event. `client_id` is echoed back in acknowledgements and is never
/// trusted as a sender identity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
	#[serde(default)]
	pub client_id: Option<String>,

	#[serde(flatten)]
	pub event: ClientEvent,
}

/// Typed client events, discriminated by the wire `type` field. Anything
/// unrecognized decodes to `Unknown` so the hub can log and drop it without
/// failing the connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
	ChatMessage {
		conversation_id: ConversationId,
		content: MessageContent,
	},
	MarkRead {
		conversation_id: ConversationId,
	},
	Typing {
		conversation_id: ConversationId,
	},
	FollowBrand {
		brand_id: BrandId,
	},
	UnfollowBrand {
		brand_id: BrandId,
	},

	#[serde(other)]
	Unknown,
}

/// Transport handshake: the first line a client sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
	pub role: ParticipantRole,
	pub participant_id: String,
}

/// Frames the hub enqueues onto a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
	/// Sent once right after a successful registration.
	Welcome {
		message: String,
	},

	/// Direct delivery of a freshly persisted message to the other
	/// participant.
	NewMessage {
		message: Message,
	},

	/// Persistence acknowledgement to the sender. Not a delivery receipt.
	MessageAck {
		#[serde(skip_serializing_if = "Option::is_none")]
		client_id: Option<String>,
		conversation_id: ConversationId,
		message_id: MessageId,
	},

	/// Read receipt: `reader_id` has read everything in the conversation.
	MarkRead {
		conversation_id: ConversationId,
		reader_id: String,
	},

	/// Ephemeral typing indicator. Never persisted.
	Typing {
		conversation_id: ConversationId,
		typer_id: String,
	},

	/// Brand fan-out payload delivered to every online follower.
	Announcement {
		brand_id: BrandId,
		body: String,
	},
}
