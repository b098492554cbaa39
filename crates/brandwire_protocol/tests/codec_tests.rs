#![forbid(unsafe_code)]

use brandwire_domain::{
	ConversationId, Message, MessageContent, MessageId, MessageKind, ParticipantRole,
};
use brandwire_protocol::{
	ClientEvent, DEFAULT_MAX_FRAME_SIZE, ServerFrame, decode_hello, decode_inbound, encode_frame,
};

#[test]
fn decodes_chat_message_envelope() {
	let line = r#"{"client_id":"c-17","type":"chat_message","conversation_id":"conv-1","content":{"kind":"text","body":"hi"}}"#;
	let frame = decode_inbound(line, DEFAULT_MAX_FRAME_SIZE).expect("valid envelope");

	assert_eq!(frame.client_id.as_deref(), Some("c-17"));
	match frame.event {
		ClientEvent::ChatMessage {
			conversation_id,
			content,
		} => {
			assert_eq!(conversation_id.as_str(), "conv-1");
			assert_eq!(content, MessageContent::text("hi"));
			assert_eq!(content.kind(), MessageKind::Text);
		}
		other => panic!("expected ChatMessage, got: {other:?}"),
	}
}

#[test]
fn decodes_follow_and_unfollow() {
	let follow = decode_inbound(r#"{"type":"follow_brand","brand_id":"nike"}"#, DEFAULT_MAX_FRAME_SIZE).unwrap();
	match follow.event {
		ClientEvent::FollowBrand { brand_id } => assert_eq!(brand_id.as_str(), "nike"),
		other => panic!("expected FollowBrand, got: {other:?}"),
	}
	assert_eq!(follow.client_id, None);

	let unfollow =
		decode_inbound(r#"{"type":"unfollow_brand","brand_id":"nike"}"#, DEFAULT_MAX_FRAME_SIZE).unwrap();
	assert!(matches!(unfollow.event, ClientEvent::UnfollowBrand { .. }));
}

#[test]
fn unknown_type_decodes_to_unknown_not_error() {
	let line = r#"{"client_id":"c-1","type":"video_call","conversation_id":"conv-1"}"#;
	let frame = decode_inbound(line, DEFAULT_MAX_FRAME_SIZE).expect("unknown types are non-fatal");
	assert_eq!(frame.event, ClientEvent::Unknown);
}

#[test]
fn disallowed_content_kind_is_a_decode_error() {
	// "video" is not part of the closed content union.
	let line = r#"{"type":"chat_message","conversation_id":"conv-1","content":{"kind":"video","url":"x"}}"#;
	assert!(decode_inbound(line, DEFAULT_MAX_FRAME_SIZE).is_err());
}

#[test]
fn oversized_frame_is_rejected() {
	let body = "x".repeat(100);
	let line = format!(r#"{{"type":"typing","conversation_id":"{body}"}}"#);
	assert!(decode_inbound(&line, 64).is_err());
	assert!(decode_inbound(&line, DEFAULT_MAX_FRAME_SIZE).is_ok());
}

#[test]
fn hello_handshake_roundtrip() {
	let hello = decode_hello(
		r#"{"type":"hello","role":"brand","participant_id":"nike"}"#,
		DEFAULT_MAX_FRAME_SIZE,
	)
	.expect("valid hello");
	assert_eq!(hello.role, ParticipantRole::Brand);
	assert_eq!(hello.participant_id, "nike");

	// A non-hello first line closes the socket.
	assert!(decode_hello(r#"{"type":"typing","conversation_id":"c"}"#, DEFAULT_MAX_FRAME_SIZE).is_err());
}

#[test]
fn new_message_frame_wire_shape() {
	let msg = Message {
		id: MessageId::new_v4(),
		conversation_id: ConversationId::new("conv-1").unwrap(),
		sender_id: "alice".to_string(),
		content: MessageContent::text("hi"),
		is_read: false,
		created_at: 1_700_000_000_000,
	};

	let bytes = encode_frame(&ServerFrame::NewMessage { message: msg }).unwrap();
	assert_eq!(*bytes.last().unwrap(), b'\n');

	let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
	assert_eq!(v["type"], "new_message");
	assert_eq!(v["message"]["sender_id"], "alice");
	assert_eq!(v["message"]["message_kind"], "text");
	assert_eq!(v["message"]["content"]["body"], "hi");
	assert_eq!(v["message"]["is_read"], false);
}

#[test]
fn receipt_frames_wire_shape() {
	let conv = ConversationId::new("conv-1").unwrap();

	let read = encode_frame(&ServerFrame::MarkRead {
		conversation_id: conv.clone(),
		reader_id: "alice".to_string(),
	})
	.unwrap();
	let v: serde_json::Value = serde_json::from_slice(&read).unwrap();
	assert_eq!(v["type"], "mark_read");
	assert_eq!(v["conversation_id"], "conv-1");
	assert_eq!(v["reader_id"], "alice");

	let typing = encode_frame(&ServerFrame::Typing {
		conversation_id: conv.clone(),
		typer_id: "nike".to_string(),
	})
	.unwrap();
	let v: serde_json::Value = serde_json::from_slice(&typing).unwrap();
	assert_eq!(v["type"], "typing");
	assert_eq!(v["typer_id"], "nike");

	let ack = encode_frame(&ServerFrame::MessageAck {
		client_id: None,
		conversation_id: conv,
		message_id: MessageId::new_v4(),
	})
	.unwrap();
	let v: serde_json::Value = serde_json::from_slice(&ack).unwrap();
	assert_eq!(v["type"], "message_ack");
	assert!(v.get("client_id").is_none());
}
