#![forbid(unsafe_code)]

use brandwire_domain::ParticipantRole;
use serde::Deserialize;
use thiserror::Error;

use crate::{Hello, InboundFrame, ServerFrame};

/// Default maximum frame size (one JSON line, newline excluded).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("expected hello frame, got type={0}")]
	NotHello(String),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Encode a server frame as one newline-terminated JSON line.
pub fn encode_frame(frame: &ServerFrame) -> Result<Vec<u8>, CodecError> {
	let mut out = serde_json::to_vec(frame)?;
	out.push(b'\n');
	Ok(out)
}

/// Decode one inbound JSON line into a typed frame.
pub fn decode_inbound(line: &str, max_frame_size: usize) -> Result<InboundFrame, CodecError> {
	if line.len() > max_frame_size {
		return Err(CodecError::FrameTooLarge {
			len: line.len(),
			max: max_frame_size,
		});
	}
	Ok(serde_json::from_str(line)?)
}

#[derive(Debug, Deserialize)]
struct HelloWire {
	#[serde(rename = "type")]
	kind: String,
	role: ParticipantRole,
	participant_id: String,
}

/// Decode the handshake line. Anything other than `type: "hello"` is an
/// error so the transport can close the socket early.
pub fn decode_hello(line: &str, max_frame_size: usize) -> Result<Hello, CodecError> {
	if line.len() > max_frame_size {
		return Err(CodecError::FrameTooLarge {
			len: line.len(),
			max: max_frame_size,
		});
	}

	let wire: HelloWire = serde_json::from_str(line)?;
	if wire.kind != "hello" {
		return Err(CodecError::NotHello(wire.kind));
	}

	Ok(Hello {
		role: wire.role,
		participant_id: wire.participant_id,
	})
}
