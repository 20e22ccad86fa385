//! End-to-end tests against a loopback Phoenix-protocol stand-in, the same
//! `TcpListener` + `accept_async` shape used to front a local websocket
//! service elsewhere in the example pack.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use supabase_rs::realtime::channel::Binding;
use supabase_rs::realtime::RealtimeClient;

async fn local_ws_url() -> (String, TcpListener) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	(format!("ws://{addr}/realtime/v1/websocket?vsn=2.0.0&apikey=anon-key"), listener)
}

#[tokio::test]
async fn join_then_broadcast_reaches_bound_callback() {
	let (url, listener) = local_ws_url().await;

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let (mut sink, mut stream) = ws.split();

		let Some(Ok(Message::Text(join_frame))) = stream.next().await else {
			panic!("expected a join frame");
		};
		let tuple: Value = serde_json::from_str(&join_frame).unwrap();
		assert_eq!(tuple[3], "phx_join");
		let join_ref = tuple[0].clone();
		let reply = json!([join_ref, tuple[1], tuple[2], "phx_reply", {"status": "ok", "response": {}}]);
		sink.send(Message::Text(serde_json::to_string(&reply).unwrap())).await.unwrap();

		tokio::time::sleep(Duration::from_millis(30)).await;
		let broadcast = json!([join_ref, null, tuple[2], "broadcast", {"event": "chat", "payload": {"text": "hi"}}]);
		sink.send(Message::Text(serde_json::to_string(&broadcast).unwrap())).await.unwrap();

		tokio::time::sleep(Duration::from_millis(200)).await;
	});

	let client = RealtimeClient::new(url::Url::parse(&url).unwrap());
	client.connect();

	let received = Arc::new(AtomicUsize::new(0));
	let received_clone = received.clone();
	client
		.join_channel(
			"room",
			json!({}),
			vec![Binding::Broadcast {
				event: "chat".to_string(),
				callback: Arc::new(move |payload: Value| {
					assert_eq!(payload["text"], "hi");
					received_clone.fetch_add(1, Ordering::SeqCst);
				}),
			}],
		)
		.await
		.unwrap();

	tokio::time::sleep(Duration::from_millis(150)).await;
	assert_eq!(received.load(Ordering::SeqCst), 1);

	server.await.unwrap();
}

#[tokio::test]
async fn unacknowledged_heartbeat_forces_a_reconnect() {
	let (url, listener) = local_ws_url().await;
	let accepted = Arc::new(AtomicUsize::new(0));
	let accepted_clone = accepted.clone();

	let server = tokio::spawn(async move {
		for _ in 0..2 {
			let (stream, _) = listener.accept().await.unwrap();
			accepted_clone.fetch_add(1, Ordering::SeqCst);
			let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
			let (_sink, mut stream) = ws.split();
			// Never replies to the heartbeat; just drains frames until the
			// client gives up and closes on it.
			while stream.next().await.is_some() {}
		}
	});

	let client = RealtimeClient::with_timing(url::Url::parse(&url).unwrap(), 80, 10_000);
	client.connect();

	// Two heartbeat ticks (80ms each) to detect the missed ack, plus the
	// first reconnect backoff entry (1000ms), with slack for scheduling.
	tokio::time::sleep(Duration::from_millis(1_700)).await;
	assert_eq!(accepted.load(Ordering::SeqCst), 2, "client should have reconnected after a missed heartbeat ack");

	server.abort();
}
