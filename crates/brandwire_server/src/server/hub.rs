#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use brandwire_domain::{
	BrandId, Conversation, ConversationId, ConversationStatus, Message, MessageContent, MessageId, ParticipantId,
};
use brandwire_protocol::ServerFrame;
use brandwire_store::{HubStore, StoreError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::server::connection::{Connection, MessageRequest};
use crate::server::dispatch::{BroadcastEnvelope, BroadcastTarget};
use crate::util::time::unix_ms_now;

/// Hub queue sizing. Every channel the hub owns is bounded; overflow on the
/// outbound side is resolved by dropping, never by blocking the hub loop.
#[derive(Debug, Clone)]
pub struct HubSettings {
	/// Capacity of the register / unregister / inbound / broadcast queues.
	pub event_queue_capacity: usize,
}

impl Default for HubSettings {
	fn default() -> Self {
		Self { event_queue_capacity: 256 }
	}
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
	#[error("participant {0} is already registered")]
	AlreadyRegistered(String),

	#[error("conversation {0} not found")]
	NotFound(ConversationId),

	#[error("participant {participant} is not part of conversation {conversation}")]
	Unauthorized {
		conversation: ConversationId,
		participant: String,
	},

	#[error("conversation {0} is closed")]
	ConversationClosed(ConversationId),

	#[error(transparent)]
	Store(#[from] StoreError),
}

pub(crate) struct ConnEntry {
	pub(crate) outbound: mpsc::Sender<Vec<u8>>,
	followed: HashSet<BrandId>,
}

/// The hub actor. Owns the connection registry and the brand-follower index
/// outright; every mutation flows through its event loop, one event per
/// iteration, so observers see a single total order.
pub struct Hub {
	store: Arc<dyn HubStore>,
	pub(crate) registry: HashMap<String, ConnEntry>,
	pub(crate) brand_followers: HashMap<BrandId, HashMap<String, mpsc::Sender<Vec<u8>>>>,

	register_rx: mpsc::Receiver<Connection>,
	unregister_rx: mpsc::Receiver<Connection>,
	requests_rx: mpsc::Receiver<MessageRequest>,
	broadcast_rx: mpsc::Receiver<BroadcastEnvelope>,
	// Kept so handlers can queue follow-up deliveries through the same loop.
	broadcast_tx: mpsc::Sender<BroadcastEnvelope>,
	stop_rx: watch::Receiver<bool>,
}

/// Cloneable handle for talking to a running hub.
#[derive(Clone)]
pub struct HubHandle {
	register_tx: mpsc::Sender<Connection>,
	unregister_tx: mpsc::Sender<Connection>,
	requests_tx: mpsc::Sender<MessageRequest>,
	broadcast_tx: mpsc::Sender<BroadcastEnvelope>,
	stop_tx: Arc<watch::Sender<bool>>,
}

impl HubHandle {
	/// Hand a new connection to the hub. If the identity is already
	/// registered the hub drops the connection, which closes its outbound
	/// queue and lets the transport tear the socket down.
	pub async fn register(&self, conn: Connection) {
		if self.register_tx.send(conn).await.is_err() {
			debug!("register dropped: hub is stopped");
		}
	}

	/// Unregister a connection. Carries the connection's own sender, not
	/// just the identity, so a rejected duplicate disconnecting later can
	/// never tear down the registration that superseded it.
	pub async fn unregister(&self, conn: Connection) {
		if self.unregister_tx.send(conn).await.is_err() {
			debug!("unregister dropped: hub is stopped");
		}
	}

	/// Submit a decoded inbound frame for routing.
	pub async fn submit(&self, req: MessageRequest) {
		if self.requests_tx.send(req).await.is_err() {
			debug!("inbound frame dropped: hub is stopped");
		}
	}

	/// Queue a delivery envelope for dispatch.
	pub(crate) async fn broadcast(&self, env: BroadcastEnvelope) {
		if self.broadcast_tx.send(env).await.is_err() {
			debug!("broadcast dropped: hub is stopped");
		}
	}

	/// Ask the hub to shut down. Safe to call any number of times from any
	/// task; only the first call has an effect.
	pub fn stop(&self) {
		let _ = self.stop_tx.send(true);
	}
}

impl Hub {
	pub fn new(store: Arc<dyn HubStore>, settings: HubSettings) -> (Self, HubHandle) {
		let cap = settings.event_queue_capacity.max(1);
		let (register_tx, register_rx) = mpsc::channel(cap);
		let (unregister_tx, unregister_rx) = mpsc::channel(cap);
		let (requests_tx, requests_rx) = mpsc::channel(cap);
		let (broadcast_tx, broadcast_rx) = mpsc::channel(cap);
		let (stop_tx, stop_rx) = watch::channel(false);

		let hub = Self {
			store,
			registry: HashMap::new(),
			brand_followers: HashMap::new(),
			register_rx,
			unregister_rx,
			requests_rx,
			broadcast_rx,
			broadcast_tx: broadcast_tx.clone(),
			stop_rx,
		};
		let handle = HubHandle {
			register_tx,
			unregister_tx,
			requests_tx,
			broadcast_tx,
			stop_tx: Arc::new(stop_tx),
		};
		(hub, handle)
	}

	/// Run the event loop until stopped. Consumes the hub; all state dies
	/// with the loop, closing every connection queue exactly once.
	pub async fn run(mut self) {
		info!("messaging hub started");
		loop {
			tokio::select! {
				Some(conn) = self.register_rx.recv() => {
					if let Err(e) = self.handle_register(conn).await {
						warn!(error = %e, "registration rejected");
					}
				}
				Some(conn) = self.unregister_rx.recv() => {
					self.handle_unregister(conn);
				}
				Some(req) = self.requests_rx.recv() => {
					if let Err(e) = self.handle_request(req).await {
						warn!(error = %e, "inbound event rejected");
					}
				}
				Some(env) = self.broadcast_rx.recv() => {
					self.handle_broadcast(env);
				}
				_ = self.stop_rx.changed() => {
					break;
				}
				else => break,
			}
		}
		self.shutdown();
	}

	fn shutdown(&mut self) {
		let connections = self.registry.len();
		// Both maps hold sender clones; clearing both drops the last one per
		// connection and closes each outbound queue.
		self.brand_followers.clear();
		self.registry.clear();
		info!(connections, "messaging hub stopped");
	}

	async fn handle_register(&mut self, conn: Connection) -> Result<(), HubError> {
		let id = conn.identity.id().to_string();
		if self.registry.contains_key(&id) {
			metrics::counter!("brandwire_hub_registrations_rejected_total").increment(1);
			// Dropping `conn` here closes the duplicate's queue; the original
			// registration is untouched.
			return Err(HubError::AlreadyRegistered(id));
		}

		// Load follows before touching any hub state: a store failure aborts
		// this registration and nothing needs rolling back.
		let followed = self.store.load_followed_brands(&id).await?;
		for brand in &followed {
			self.brand_followers
				.entry(brand.clone())
				.or_default()
				.insert(id.clone(), conn.outbound.clone());
		}

		let entry = ConnEntry {
			outbound: conn.outbound,
			followed,
		};
		let welcome = ServerFrame::Welcome {
			message: format!("connected as {}", conn.identity),
		};
		crate::server::dispatch::try_enqueue(&id, &entry.outbound, &welcome);

		info!(participant = %conn.identity, brands = entry.followed.len(), "participant connected");
		metrics::counter!("brandwire_hub_connections_total").increment(1);
		self.registry.insert(id, entry);
		Ok(())
	}

	fn handle_unregister(&mut self, conn: Connection) {
		let identity = &conn.identity;
		// Only the connection that actually holds the registration may tear
		// it down; a rejected duplicate's later disconnect is a no-op here.
		let is_current = self
			.registry
			.get(identity.id())
			.is_some_and(|entry| entry.outbound.same_channel(&conn.outbound));
		if !is_current {
			debug!(participant = %identity, "unregister for unknown or superseded connection");
			return;
		}
		let Some(entry) = self.registry.remove(identity.id()) else {
			return;
		};
		for brand in &entry.followed {
			if let Some(bucket) = self.brand_followers.get_mut(brand) {
				bucket.remove(identity.id());
				if bucket.is_empty() {
					self.brand_followers.remove(brand);
				}
			}
		}
		info!(participant = %identity, "participant disconnected");
		// `entry` drops here with the last sender clone, closing the queue.
	}

	async fn handle_request(&mut self, req: MessageRequest) -> Result<(), HubError> {
		use brandwire_protocol::ClientEvent;

		let sender = req.sender;
		match req.frame.event {
			ClientEvent::ChatMessage { conversation_id, content } => {
				self.handle_chat_message(sender, req.frame.client_id, conversation_id, content).await
			}
			ClientEvent::MarkRead { conversation_id } => self.handle_mark_read(sender, conversation_id).await,
			ClientEvent::Typing { conversation_id } => self.handle_typing(sender, conversation_id).await,
			ClientEvent::FollowBrand { brand_id } => self.handle_follow(sender, brand_id).await,
			ClientEvent::UnfollowBrand { brand_id } => self.handle_unfollow(sender, brand_id).await,
			ClientEvent::Unknown => {
				metrics::counter!("brandwire_hub_unknown_events_total").increment(1);
				warn!(participant = %sender, "unknown event type, dropped");
				Ok(())
			}
		}
	}

	/// Fetch a conversation and check the sender is one of its two
	/// participants. Returns the conversation and the other participant id.
	async fn authorized_conversation(
		&self,
		conversation_id: &ConversationId,
		sender: &ParticipantId,
	) -> Result<(Conversation, String), HubError> {
		let conv = self.store.conversation_by_id(conversation_id).await.map_err(|e| match e {
			StoreError::NotFound => HubError::NotFound(conversation_id.clone()),
			other => HubError::Store(other),
		})?;
		let Some(other) = conv.other_participant(sender.id()) else {
			return Err(HubError::Unauthorized {
				conversation: conversation_id.clone(),
				participant: sender.to_string(),
			});
		};
		let other = other.to_string();
		Ok((conv, other))
	}

	async fn handle_chat_message(
		&mut self,
		sender: ParticipantId,
		client_id: Option<String>,
		conversation_id: ConversationId,
		content: MessageContent,
	) -> Result<(), HubError> {
		let (conv, recipient) = self.authorized_conversation(&conversation_id, &sender).await?;
		if conv.status == ConversationStatus::Closed {
			return Err(HubError::ConversationClosed(conversation_id));
		}

		let msg = Message {
			id: MessageId::new_v4(),
			conversation_id: conv.id.clone(),
			sender_id: sender.id().to_string(),
			content,
			is_read: false,
			created_at: unix_ms_now(),
		};

		// Persist before any broadcast; a store failure aborts the whole
		// operation and no frame leaves the hub.
		self.store.save_message(&msg).await?;
		self.store.update_last_message_at(&conv.id, msg.created_at).await?;

		debug!(from = %sender, to = %recipient, conversation = %conv.id, "message persisted");
		metrics::counter!("brandwire_hub_messages_total").increment(1);

		self.queue_broadcast(BroadcastEnvelope {
			target: BroadcastTarget::Direct(sender.id().to_string()),
			frame: ServerFrame::MessageAck {
				client_id,
				conversation_id: conv.id.clone(),
				message_id: msg.id,
			},
		});
		self.queue_broadcast(BroadcastEnvelope {
			target: BroadcastTarget::Direct(recipient),
			frame: ServerFrame::NewMessage { message: msg },
		});
		Ok(())
	}

	async fn handle_mark_read(&mut self, sender: ParticipantId, conversation_id: ConversationId) -> Result<(), HubError> {
		let (conv, other) = self.authorized_conversation(&conversation_id, &sender).await?;

		// Flip the *other* participant's messages: the reader confirms what
		// was sent to them, never their own outgoing messages.
		let flipped = self.store.mark_messages_read(&conv.id, &other).await?;
		debug!(reader = %sender, conversation = %conv.id, flipped, "messages marked read");

		self.queue_broadcast(BroadcastEnvelope {
			target: BroadcastTarget::Direct(other),
			frame: ServerFrame::MarkRead {
				conversation_id: conv.id,
				reader_id: sender.id().to_string(),
			},
		});
		Ok(())
	}

	async fn handle_typing(&mut self, sender: ParticipantId, conversation_id: ConversationId) -> Result<(), HubError> {
		let (conv, other) = self.authorized_conversation(&conversation_id, &sender).await?;
		if conv.status == ConversationStatus::Closed {
			return Err(HubError::ConversationClosed(conversation_id));
		}

		self.queue_broadcast(BroadcastEnvelope {
			target: BroadcastTarget::Direct(other),
			frame: ServerFrame::Typing {
				conversation_id: conv.id,
				typer_id: sender.id().to_string(),
			},
		});
		Ok(())
	}

	async fn handle_follow(&mut self, sender: ParticipantId, brand: BrandId) -> Result<(), HubError> {
		let id = sender.id().to_string();
		let Some(entry) = self.registry.get_mut(&id) else {
			debug!(participant = %sender, "follow from unregistered participant, ignored");
			return Ok(());
		};
		self.brand_followers
			.entry(brand.clone())
			.or_default()
			.insert(id.clone(), entry.outbound.clone());
		entry.followed.insert(brand.clone());
		info!(participant = %sender, brand = %brand, "brand followed");

		// The in-memory index is already updated; a persistence failure is
		// logged and heals at the next reconnect.
		if let Err(e) = self.store.follow_brand(&id, &brand).await {
			warn!(error = %e, participant = %id, brand = %brand, "failed to persist follow");
		}
		Ok(())
	}

	async fn handle_unfollow(&mut self, sender: ParticipantId, brand: BrandId) -> Result<(), HubError> {
		let id = sender.id().to_string();
		let Some(entry) = self.registry.get_mut(&id) else {
			debug!(participant = %sender, "unfollow from unregistered participant, ignored");
			return Ok(());
		};
		entry.followed.remove(&brand);
		if let Some(bucket) = self.brand_followers.get_mut(&brand) {
			bucket.remove(&id);
			if bucket.is_empty() {
				self.brand_followers.remove(&brand);
			}
		}
		info!(participant = %sender, brand = %brand, "brand unfollowed");

		if let Err(e) = self.store.unfollow_brand(&id, &brand).await {
			warn!(error = %e, participant = %id, brand = %brand, "failed to persist unfollow");
		}
		Ok(())
	}

	/// Queue an envelope onto the hub's own broadcast channel. The actor is
	/// the only drainer of that channel, so an awaited send from inside a
	/// handler could never complete on a full queue. On overflow the head
	/// of the queue is dispatched inline first, so deliveries keep their
	/// enqueue order even under sustained pressure.
	fn queue_broadcast(&mut self, mut env: BroadcastEnvelope) {
		loop {
			match self.broadcast_tx.try_send(env) {
				Ok(()) => return,
				Err(mpsc::error::TrySendError::Full(back)) => {
					env = back;
					match self.broadcast_rx.try_recv() {
						Ok(next) => self.handle_broadcast(next),
						Err(_) => {
							self.handle_broadcast(env);
							return;
						}
					}
				}
				Err(mpsc::error::TrySendError::Closed(_)) => return,
			}
		}
	}
}
