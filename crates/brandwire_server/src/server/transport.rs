#![forbid(unsafe_code)]

use anyhow::Context as _;
use brandwire_domain::ParticipantId;
use brandwire_protocol::{DEFAULT_MAX_FRAME_SIZE, decode_hello, decode_inbound};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::server::connection::{Connection, MessageRequest};
use crate::server::hub::HubHandle;

#[derive(Debug, Clone)]
pub struct TransportSettings {
	/// Maximum accepted inbound line length in bytes.
	pub max_frame_size: usize,
	/// Per-connection outbound queue capacity, in encoded frames.
	pub outbound_queue_capacity: usize,
}

impl Default for TransportSettings {
	fn default() -> Self {
		Self {
			max_frame_size: DEFAULT_MAX_FRAME_SIZE,
			outbound_queue_capacity: 256,
		}
	}
}

/// Accept loop for the newline-delimited JSON transport. Each accepted
/// socket gets its own task; the loop itself only ever awaits `accept`.
pub async fn serve(listener: TcpListener, hub: HubHandle, settings: TransportSettings) -> anyhow::Result<()> {
	loop {
		let (socket, remote) = listener.accept().await.context("accept connection")?;
		metrics::counter!("brandwire_transport_accepted_total").increment(1);

		let hub = hub.clone();
		let settings = settings.clone();
		tokio::spawn(async move {
			info!(%remote, "accepted connection");
			if let Err(e) = handle_socket(socket, hub, settings).await {
				debug!(%remote, error = %e, "connection closed with error");
			}
		});
	}
}

/// Read one newline-terminated line, enforcing the size cap while reading
/// rather than after: a client streaming bytes with no `\n` gets cut off as
/// soon as the buffer passes `max`, never an unbounded allocation.
/// `Ok(None)` means clean end-of-stream.
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
	reader: &mut R,
	buf: &mut Vec<u8>,
	max: usize,
) -> anyhow::Result<Option<String>> {
	buf.clear();
	loop {
		let (found_newline, used, eof) = {
			let chunk = reader.fill_buf().await.context("read frame")?;
			if chunk.is_empty() {
				(false, 0, true)
			} else if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
				buf.extend_from_slice(&chunk[..pos]);
				(true, pos + 1, false)
			} else {
				buf.extend_from_slice(chunk);
				(false, chunk.len(), false)
			}
		};
		reader.consume(used);

		if buf.len() > max {
			metrics::counter!("brandwire_transport_oversized_frames_total").increment(1);
			anyhow::bail!("inbound frame exceeds {max} bytes");
		}
		if found_newline {
			break;
		}
		if eof {
			if buf.is_empty() {
				return Ok(None);
			}
			break;
		}
	}

	let line = String::from_utf8(std::mem::take(buf)).context("frame is not valid utf-8")?;
	Ok(Some(line))
}

async fn handle_socket(socket: TcpStream, hub: HubHandle, settings: TransportSettings) -> anyhow::Result<()> {
	let (read_half, mut write_half) = socket.into_split();
	let mut reader = BufReader::new(read_half);
	let mut buf = Vec::new();

	// First line must be a hello; anything else fails the handshake and the
	// socket never reaches the hub.
	let Some(first) = read_line_bounded(&mut reader, &mut buf, settings.max_frame_size).await? else {
		return Ok(());
	};
	let hello = decode_hello(&first, settings.max_frame_size).context("decode hello")?;
	let identity = ParticipantId::new(hello.role, hello.participant_id).context("invalid participant id")?;

	let (conn, mut outbound_rx) = Connection::channel(identity.clone(), settings.outbound_queue_capacity);
	// Kept weak so the later unregister can name this exact connection
	// without holding its queue open: a duplicate socket's disconnect must
	// never unregister the original, and a strong clone here would stop the
	// writer pump from ever observing the queue close.
	let outbound = conn.outbound.downgrade();
	hub.register(conn).await;

	// Writer pump: the sole writer for this socket. Exits when the hub drops
	// the queue's last sender (unregister, duplicate rejection, or shutdown).
	let writer = tokio::spawn(async move {
		while let Some(frame) = outbound_rx.recv().await {
			if write_half.write_all(&frame).await.is_err() {
				break;
			}
		}
		let _ = write_half.shutdown().await;
	});

	let read_result = read_loop(&mut reader, &mut buf, &hub, &identity, settings.max_frame_size).await;

	// Unregister on every exit path so the registry never leaks an entry.
	// If the upgrade fails the hub already dropped every sender for this
	// connection (duplicate rejection or shutdown) and there is nothing left
	// to unregister.
	if let Some(outbound) = outbound.upgrade() {
		hub.unregister(Connection { identity, outbound }).await;
	}
	let _ = writer.await;
	read_result
}

async fn read_loop<R: AsyncBufRead + Unpin>(
	reader: &mut R,
	buf: &mut Vec<u8>,
	hub: &HubHandle,
	identity: &ParticipantId,
	max_frame_size: usize,
) -> anyhow::Result<()> {
	while let Some(line) = read_line_bounded(reader, buf, max_frame_size).await? {
		if line.trim().is_empty() {
			continue;
		}
		match decode_inbound(&line, max_frame_size) {
			Ok(frame) => {
				hub.submit(MessageRequest {
					sender: identity.clone(),
					frame,
				})
				.await;
			}
			Err(e) => {
				// A malformed frame is the client's problem, not the
				// connection's. Log and keep reading.
				warn!(participant = %identity, error = %e, "discarding malformed frame");
				metrics::counter!("brandwire_transport_malformed_frames_total").increment(1);
			}
		}
	}
	Ok(())
}
