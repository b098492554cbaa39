#![forbid(unsafe_code)]

use brandwire_domain::ParticipantId;
use brandwire_protocol::InboundFrame;
use tokio::sync::mpsc;

/// A registered connection as the hub sees it: an identity plus the sending
/// side of that connection's outbound frame queue. The transport keeps the
/// receiving side and pumps it to the socket; when the hub drops the last
/// sender clone, the pump observes end-of-stream and shuts the socket down.
#[derive(Debug)]
pub struct Connection {
	pub identity: ParticipantId,
	pub outbound: mpsc::Sender<Vec<u8>>,
}

impl Connection {
	/// Create a connection with a bounded outbound queue of `capacity`
	/// encoded frames. Returns the hub-facing half and the transport-facing
	/// receiver.
	pub fn channel(identity: ParticipantId, capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
		let (outbound, rx) = mpsc::channel(capacity);
		(Self { identity, outbound }, rx)
	}
}

/// An inbound client event, stamped with the sender identity the transport
/// authenticated at registration. The `client_id` inside the frame is an
/// opaque echo token; identity never comes from frame contents.
#[derive(Debug)]
pub struct MessageRequest {
	pub sender: ParticipantId,
	pub frame: InboundFrame,
}
