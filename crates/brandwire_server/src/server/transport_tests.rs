#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use brandwire_domain::BrandId;
use brandwire_protocol::ServerFrame;
use brandwire_store::MemoryHubStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;

use crate::server::dispatch::{BroadcastEnvelope, BroadcastTarget};
use crate::server::hub::{Hub, HubHandle, HubSettings};
use crate::server::transport::{self, TransportSettings};

async fn start_server(settings: TransportSettings) -> (SocketAddr, HubHandle) {
	let store = Arc::new(MemoryHubStore::new());
	let (hub, handle) = Hub::new(store, HubSettings::default());
	tokio::spawn(hub.run());

	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
	let addr = listener.local_addr().expect("local addr");
	tokio::spawn(transport::serve(listener, handle.clone(), settings));
	(addr, handle)
}

/// Open a socket, send the hello line, and consume the welcome frame.
async fn connect_as(addr: SocketAddr, role: &str, id: &str) -> (BufReader<OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
	let socket = TcpStream::connect(addr).await.expect("connect");
	let (read_half, mut write_half) = socket.into_split();
	let mut reader = BufReader::new(read_half);

	let hello = format!(r#"{{"type":"hello","role":"{role}","participant_id":"{id}"}}"#);
	write_half.write_all(hello.as_bytes()).await.expect("send hello");
	write_half.write_all(b"\n").await.expect("send newline");

	let line = read_frame(&mut reader).await;
	assert!(line.contains("welcome"), "expected welcome, got: {line}");
	(reader, write_half)
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> String {
	let mut line = String::new();
	let n = timeout(Duration::from_millis(500), reader.read_line(&mut line))
		.await
		.expect("expected a frame within timeout")
		.expect("socket readable");
	assert!(n > 0, "socket closed while a frame was expected");
	line
}

async fn expect_eof(reader: &mut BufReader<OwnedReadHalf>) {
	let mut line = String::new();
	let n = timeout(Duration::from_millis(500), reader.read_line(&mut line))
		.await
		.expect("expected the server to close within timeout")
		.expect("socket readable");
	assert_eq!(n, 0, "expected end-of-stream, got: {line}");
}

#[tokio::test]
async fn rejected_duplicate_disconnect_leaves_the_original_serving() {
	let (addr, handle) = start_server(TransportSettings::default()).await;

	let (mut original, _original_writer) = connect_as(addr, "user", "alice").await;

	// A second socket claims the same identity: no welcome, just a close.
	let dup = TcpStream::connect(addr).await.expect("connect duplicate");
	let (dup_read, mut dup_write) = dup.into_split();
	let mut dup_reader = BufReader::new(dup_read);
	dup_write
		.write_all(b"{\"type\":\"hello\",\"role\":\"user\",\"participant_id\":\"alice\"}\n")
		.await
		.expect("send duplicate hello");
	expect_eof(&mut dup_reader).await;
	drop(dup_write);
	drop(dup_reader);

	// Give the duplicate's unregister time to reach the hub before probing
	// whether the original registration survived it.
	tokio::time::sleep(Duration::from_millis(100)).await;

	handle
		.broadcast(BroadcastEnvelope {
			target: BroadcastTarget::Direct("alice".to_string()),
			frame: ServerFrame::Announcement {
				brand_id: BrandId::new("nike").expect("valid brand id"),
				body: "still yours".to_string(),
			},
		})
		.await;

	let line = read_frame(&mut original).await;
	assert!(line.contains("still yours"), "original connection no longer receives frames: {line}");
}

#[tokio::test]
async fn oversized_unterminated_line_closes_the_socket() {
	let settings = TransportSettings {
		max_frame_size: 1024,
		..TransportSettings::default()
	};
	let (addr, _handle) = start_server(settings).await;

	let (mut reader, mut writer) = connect_as(addr, "user", "alice").await;

	// Stream well past the cap without ever sending a newline; the server
	// must cut the connection off instead of buffering indefinitely.
	writer.write_all(&vec![b'x'; 4096]).await.expect("send oversized line");
	expect_eof(&mut reader).await;

	// The oversized client was unregistered, so the identity is free again.
	let _reconnected = connect_as(addr, "user", "alice").await;
}

#[tokio::test]
async fn oversized_hello_never_reaches_the_hub() {
	let settings = TransportSettings {
		max_frame_size: 256,
		..TransportSettings::default()
	};
	let (addr, _handle) = start_server(settings).await;

	let socket = TcpStream::connect(addr).await.expect("connect");
	let (read_half, mut write_half) = socket.into_split();
	let mut reader = BufReader::new(read_half);

	write_half.write_all(&vec![b'{'; 2048]).await.expect("send oversized hello");
	expect_eof(&mut reader).await;
}
