#![forbid(unsafe_code)]

use brandwire_domain::BrandId;
use brandwire_protocol::{ServerFrame, encode_frame};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::server::hub::Hub;

/// Who a server frame is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
	/// Exactly one participant, by bare id.
	Direct(String),
	/// Every online follower of a brand.
	Followers(BrandId),
}

/// One delivery request for the dispatcher.
#[derive(Debug, Clone)]
pub struct BroadcastEnvelope {
	pub target: BroadcastTarget,
	pub frame: ServerFrame,
}

/// Encode a frame and offer it to one outbound queue. A full queue drops the
/// frame (slow consumers never stall the hub); a closed queue means the
/// connection is tearing down and the frame is silently discarded.
pub(crate) fn try_enqueue(recipient: &str, tx: &mpsc::Sender<Vec<u8>>, frame: &ServerFrame) -> bool {
	match encode_frame(frame) {
		Ok(data) => try_send_bytes(recipient, tx, data),
		Err(e) => {
			warn!(error = %e, recipient = %recipient, "failed to encode outbound frame");
			false
		}
	}
}

fn try_send_bytes(recipient: &str, tx: &mpsc::Sender<Vec<u8>>, data: Vec<u8>) -> bool {
	match tx.try_send(data) {
		Ok(()) => true,
		Err(TrySendError::Full(_)) => {
			metrics::counter!("brandwire_hub_deliveries_dropped_total").increment(1);
			warn!(recipient = %recipient, "outbound queue full, dropping frame");
			false
		}
		Err(TrySendError::Closed(_)) => false,
	}
}

impl Hub {
	/// Resolve a delivery envelope against the live registry and follower
	/// index. Frames for offline recipients are skipped; persisted messages
	/// reach them later through the history read path.
	pub(crate) fn handle_broadcast(&mut self, env: BroadcastEnvelope) {
		let data = match encode_frame(&env.frame) {
			Ok(data) => data,
			Err(e) => {
				warn!(error = %e, "failed to encode broadcast frame");
				return;
			}
		};

		match env.target {
			BroadcastTarget::Direct(ref id) => {
				let Some(entry) = self.registry.get(id) else {
					debug!(recipient = %id, "recipient offline, delivery skipped");
					return;
				};
				try_send_bytes(id, &entry.outbound, data);
			}
			BroadcastTarget::Followers(ref brand) => {
				let Some(bucket) = self.brand_followers.get(brand) else {
					debug!(brand = %brand, "no online followers, fan-out skipped");
					return;
				};
				let mut delivered = 0usize;
				let mut dropped = 0usize;
				for (id, tx) in bucket {
					match tx.try_send(data.clone()) {
						Ok(()) => delivered += 1,
						Err(TrySendError::Full(_)) => {
							dropped += 1;
							warn!(recipient = %id, brand = %brand, "follower queue full, dropping frame");
						}
						Err(TrySendError::Closed(_)) => {}
					}
				}
				if dropped > 0 {
					metrics::counter!("brandwire_hub_deliveries_dropped_total").increment(dropped as u64);
				}
				debug!(brand = %brand, delivered, dropped, "fan-out complete");
			}
		}
	}
}
