//! Realtime Client: WS lifecycle, heartbeat, reconnect, channel registry,
//! token plane.
//!
//! One spawned task owns the socket and every channel's state, merging
//! `{client push, socket frame, heartbeat tick, due rejoin}` into a single
//! event loop via `futures_concurrency::stream::Merge` over a hand-rolled
//! `Either::{Command,Frame,Heartbeat,RejoinDue}`.

pub mod channel;
pub mod presence;
pub mod serializer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use futures_concurrency::stream::Merge as _;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, ErrorKind, Result};
use crate::http::{Body, HttpPlane, RequestOptions};
use channel::{Binding, Channel, ChannelState, Push};
use serializer::{decode_text, encode_text, should_encode_binary, Message as WireMessage};

/// Default heartbeat interval, used when a caller builds a [`RealtimeClient`]
/// without an explicit override.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 25_000;
/// Default per-push ack timeout.
pub const DEFAULT_PUSH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BACKOFF_TABLE_MS: &[u64] = &[1_000, 2_000, 5_000, 10_000];

fn reconnect_after_ms(tries: u32) -> u64 {
	let index = (tries as usize).min(DEFAULT_BACKOFF_TABLE_MS.len() - 1);
	DEFAULT_BACKOFF_TABLE_MS[index]
}

/// Derives the HTTP broadcast-fallback endpoint from the websocket URL:
/// `ws(s)://` becomes `http(s)://`, a trailing `/socket/websocket`,
/// `/socket`, or `/websocket` (in that priority order) is stripped, and
/// `/api/broadcast` is appended.
fn broadcast_endpoint(ws_url: &Url) -> Url {
	let mut url = ws_url.clone();
	match url.scheme() {
		"wss" => {
			let _ = url.set_scheme("https");
		}
		"ws" => {
			let _ = url.set_scheme("http");
		}
		_ => {}
	}
	url.set_query(None);
	let path = url.path();
	let stripped = path.strip_suffix("/socket/websocket").or_else(|| path.strip_suffix("/socket")).or_else(|| path.strip_suffix("/websocket")).unwrap_or(path);
	url.set_path(&format!("{stripped}/api/broadcast"));
	url
}

/// Sends one broadcast message over the HTTP fallback endpoint when the
/// channel can't be reached over the socket (not yet joined, or the socket
/// is down). Per the reference, this is a deprecated path: it always logs a
/// warning and expects HTTP 202 back.
async fn send_broadcast_via_http(http: &HttpPlane, ws_url: &Url, topic: &str, event: &str, payload: Value, private: bool) -> Result<()> {
	tracing::warn!(%topic, %event, "sending broadcast over HTTP fallback (deprecated); channel was not joined");
	let endpoint = broadcast_endpoint(ws_url);
	let apikey = ws_url.query_pairs().find(|(key, _)| key == "apikey").map(|(_, value)| value.into_owned()).unwrap_or_default();
	let mut headers = indexmap::IndexMap::new();
	headers.insert("apikey".to_string(), apikey);
	let body = json!({"messages": [{"topic": topic, "event": event, "payload": payload, "private": private}]});
	let response = http
		.request(reqwest::Method::POST, endpoint, indexmap::IndexMap::new(), RequestOptions {
			headers,
			body: Some(Body::Json(body)),
			timeout: None,
			signal: None,
		})
		.await?;
	if response.status != 202 {
		tracing::warn!(status = response.status, "broadcast HTTP fallback did not return 202");
	}
	Ok(())
}

/// Schedules a delayed rejoin attempt for `topic`, fired back through
/// `rejoin_tx` once `delay_ms` elapses.
fn schedule_rejoin(rejoin_tx: &flume::Sender<String>, topic: String, delay_ms: u64) {
	let rejoin_tx = rejoin_tx.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(delay_ms)).await;
		let _ = rejoin_tx.send(topic);
	});
}

/// `connecting|connected|disconnecting|disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Connected,
	Disconnecting,
}

enum Command {
	Connect,
	Disconnect,
	Join {
		topic: String,
		payload: Value,
		bindings: Vec<Binding>,
		reply: oneshot::Sender<Result<()>>,
	},
	Leave {
		topic: String,
		reply: oneshot::Sender<Result<()>>,
	},
	Push {
		topic: String,
		event: String,
		payload: Value,
		ack: bool,
		reply: oneshot::Sender<Result<Value>>,
	},
	SetAuth {
		token: Option<String>,
	},
}

enum Either {
	Command(Command),
	Frame(std::result::Result<Message, tokio_tungstenite::tungstenite::Error>),
	Heartbeat,
	RejoinDue(String),
}

/// Public handle to the realtime transport.
pub struct RealtimeClient {
	command_tx: flume::Sender<Command>,
	connection_state: Arc<StdMutex<ConnectionState>>,
	push_timeout: Duration,
}

impl RealtimeClient {
	/// Builds the client with the default heartbeat interval and push
	/// timeout, spawning its owning task disconnected until
	/// [`RealtimeClient::connect`] is called. `ws_url` should already carry
	/// `vsn=2.0.0&apikey=...`.
	pub fn new(ws_url: Url) -> Self {
		Self::with_timing(ws_url, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_PUSH_TIMEOUT_MS)
	}

	/// Like [`RealtimeClient::new`], with an explicit heartbeat interval and
	/// push-ack timeout.
	pub fn with_timing(ws_url: Url, heartbeat_interval_ms: u64, push_timeout_ms: u64) -> Self {
		let (command_tx, command_rx) = flume::unbounded();
		let connection_state = Arc::new(StdMutex::new(ConnectionState::Disconnected));
		spawn_router(ws_url, command_rx, connection_state.clone(), Duration::from_millis(heartbeat_interval_ms));
		Self {
			command_tx,
			connection_state,
			push_timeout: Duration::from_millis(push_timeout_ms),
		}
	}

	/// The transport's current connection state.
	pub fn connection_state(&self) -> ConnectionState {
		*self.connection_state.lock().unwrap()
	}

	/// Starts connecting, or is a no-op if already connecting/connected.
	pub fn connect(&self) {
		let _ = self.command_tx.send(Command::Connect);
	}

	/// Suppresses reconnect and tears the socket down.
	pub fn disconnect(&self) {
		let _ = self.command_tx.send(Command::Disconnect);
	}

	/// Joins `realtime:{topic}` with the given bindings already attached.
	pub async fn join_channel(&self, topic: &str, join_payload: Value, bindings: Vec<Binding>) -> Result<()> {
		let (reply, rx) = oneshot::channel();
		self.command_tx
			.send(Command::Join {
				topic: format!("realtime:{topic}"),
				payload: join_payload,
				bindings,
				reply,
			})
			.map_err(|_| Error::new(ErrorKind::Internal, "realtime router task is gone"))?;
		rx.await.map_err(|_| Error::new(ErrorKind::Internal, "realtime router task dropped the reply"))?
	}

	/// Leaves a previously joined channel.
	pub async fn leave_channel(&self, topic: &str) -> Result<()> {
		let (reply, rx) = oneshot::channel();
		self.command_tx
			.send(Command::Leave {
				topic: format!("realtime:{topic}"),
				reply,
			})
			.map_err(|_| Error::new(ErrorKind::Internal, "realtime router task is gone"))?;
		rx.await.map_err(|_| Error::new(ErrorKind::Internal, "realtime router task dropped the reply"))?
	}

	/// Sends a message on a joined channel. If `ack` is set, waits for the
	/// server's reply.
	pub async fn send(&self, topic: &str, event: &str, payload: Value, ack: bool) -> Result<Value> {
		let (reply, rx) = oneshot::channel();
		self.command_tx
			.send(Command::Push {
				topic: format!("realtime:{topic}"),
				event: event.to_string(),
				payload,
				ack,
				reply,
			})
			.map_err(|_| Error::new(ErrorKind::Internal, "realtime router task is gone"))?;
		tokio::time::timeout(self.push_timeout, rx)
			.await
			.map_err(|_| Error::new(ErrorKind::Internal, "push timed out"))?
			.map_err(|_| Error::new(ErrorKind::Internal, "realtime router task dropped the reply"))?
	}

	/// Updates the token used for future joins and, on joined channels,
	/// pushes an `access_token` event immediately.
	pub fn set_auth(&self, token: Option<String>) {
		let _ = self.command_tx.send(Command::SetAuth {
			token,
		});
	}
}

struct RouterState {
	channels: HashMap<String, Channel>,
	auth_token: Option<String>,
	manual_disconnect: bool,
	pending_heartbeat_ref: Option<String>,
	reconnect_tries: u32,
	next_ref: u64,
}

impl RouterState {
	fn new() -> Self {
		Self {
			channels: HashMap::new(),
			auth_token: None,
			manual_disconnect: false,
			pending_heartbeat_ref: None,
			reconnect_tries: 0,
			next_ref: 0,
		}
	}

	fn gen_ref(&mut self) -> String {
		let r = self.next_ref;
		self.next_ref = self.next_ref.wrapping_add(1);
		r.to_string()
	}
}

fn spawn_router(ws_url: Url, command_rx: flume::Receiver<Command>, connection_state: Arc<StdMutex<ConnectionState>>, heartbeat_interval: Duration) {
	tokio::spawn(async move {
		let mut state = RouterState::new();
		let mut socket: Option<WebSocketStream<MaybeTlsStream<TcpStream>>> = None;
		let http = HttpPlane::new().ok();
		let (rejoin_tx, rejoin_rx) = flume::unbounded::<String>();

		loop {
			match command_rx.recv_async().await {
				Ok(Command::Connect) => break,
				Ok(_) => continue,
				Err(_) => return,
			}
		}

		'connection: loop {
			*connection_state.lock().unwrap() = ConnectionState::Connecting;
			match tokio_tungstenite::connect_async(ws_url.clone()).await {
				Ok((ws, _)) => {
					socket = Some(ws);
					*connection_state.lock().unwrap() = ConnectionState::Connected;
					state.reconnect_tries = 0;
				}
				Err(error) => {
					tracing::warn!(%error, "realtime connect failed");
					tokio::time::sleep(Duration::from_millis(reconnect_after_ms(state.reconnect_tries))).await;
					state.reconnect_tries += 1;
					continue 'connection;
				}
			}

			let Some(ws) = socket.take() else {
				continue 'connection;
			};
			let (mut sink, stream) = ws.split();

			let mut interval = tokio::time::interval(heartbeat_interval);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
			interval.tick().await;
			let heartbeat_stream = IntervalStream::new(interval).map(|_| Either::Heartbeat);

			let frame_stream = stream.map(Either::Frame);
			let command_stream = command_rx.stream().map(Either::Command);
			let rejoin_stream = rejoin_rx.stream().map(Either::RejoinDue);

			let mut merged = (frame_stream, command_stream, heartbeat_stream, rejoin_stream).merge();
			let mut should_reconnect = true;
			let mut heartbeat_triggered_reconnect = false;

			while let Some(event) = merged.next().await {
				match event {
					Either::Command(Command::Connect) => {}
					Either::Command(Command::Disconnect) => {
						state.manual_disconnect = true;
						should_reconnect = false;
						*connection_state.lock().unwrap() = ConnectionState::Disconnecting;
						let _ = sink.send(Message::Close(None)).await;
						break;
					}
					Either::Command(Command::SetAuth {
						token,
					}) => {
						state.auth_token = token.clone();
						for (topic, channel) in &state.channels {
							if channel.state == ChannelState::Joined {
								if let Some(token) = &token {
									let frame = WireMessage {
										join_ref: channel.join_ref.clone(),
										r#ref: Some(state.gen_ref()),
										topic: topic.clone(),
										event: "access_token".to_string(),
										payload: json!({"access_token": token}),
									};
									if let Ok(text) = encode_text(&frame) {
										let _ = sink.send(Message::Text(text)).await;
									}
								}
							}
						}
					}
					Either::Command(Command::Join {
						topic,
						payload,
						bindings,
						reply,
					}) => {
						let join_ref = state.gen_ref();
						let mut channel = state.channels.remove(&topic).unwrap_or_else(|| Channel::new(topic.clone(), payload.clone()));
						channel.join_payload = payload.clone();
						channel.bindings = bindings;
						channel.state = ChannelState::Joining;
						channel.join_ref = Some(join_ref.clone());
						let frame = WireMessage {
							join_ref: Some(join_ref),
							r#ref: Some(state.gen_ref()),
							topic: topic.clone(),
							event: "phx_join".to_string(),
							payload: channel.join_payload.clone(),
						};
						state.channels.insert(topic, channel);
						match encode_text(&frame) {
							Ok(text) => {
								if sink.send(Message::Text(text)).await.is_err() {
									let _ = reply.send(Err(Error::new(ErrorKind::Fetch, "failed to send join frame")));
								} else {
									let _ = reply.send(Ok(()));
								}
							}
							Err(error) => {
								let _ = reply.send(Err(error));
							}
						}
					}
					Either::Command(Command::Leave {
						topic,
						reply,
					}) => {
						if let Some(channel) = state.channels.get_mut(&topic) {
							channel.state = ChannelState::Leaving;
							let frame = WireMessage {
								join_ref: channel.join_ref.clone(),
								r#ref: Some(state.gen_ref()),
								topic: topic.clone(),
								event: "phx_leave".to_string(),
								payload: json!({}),
							};
							if let Ok(text) = encode_text(&frame) {
								let _ = sink.send(Message::Text(text)).await;
							}
						}
						state.channels.remove(&topic);
						if state.channels.is_empty() {
							state.manual_disconnect = true;
							should_reconnect = false;
						}
						let _ = reply.send(Ok(()));
					}
					Either::Command(Command::Push {
						topic,
						event,
						payload,
						ack,
						reply,
					}) => {
						let push_ref = state.gen_ref();
						let can_send = state.channels.get(&topic).map(|c| c.state == ChannelState::Joined).unwrap_or(false);
						if !can_send {
							if event == "broadcast" {
								if let Some(http) = http.clone() {
									let ws_url = ws_url.clone();
									let bare_topic = topic.strip_prefix("realtime:").unwrap_or(&topic).to_string();
									let sub_event = payload.get("event").and_then(Value::as_str).unwrap_or_default().to_string();
									let data = payload.get("payload").cloned().unwrap_or(Value::Null);
									let private = payload.get("private").and_then(Value::as_bool).unwrap_or(false);
									if ack {
										let outcome = send_broadcast_via_http(&http, &ws_url, &bare_topic, &sub_event, data, private).await;
										let _ = reply.send(outcome.map(|_| Value::Null));
									} else {
										tokio::spawn(async move {
											let _ = send_broadcast_via_http(&http, &ws_url, &bare_topic, &sub_event, data, private).await;
										});
										let _ = reply.send(Ok(Value::Null));
									}
									continue;
								}
							}
							if let Some(channel) = state.channels.get_mut(&topic) {
								channel.enqueue_push(Push {
									event: event.clone(),
									payload: payload.clone(),
									r#ref: push_ref.clone(),
									responder: None,
								});
							}
							let _ = reply.send(Err(Error::new(ErrorKind::Fetch, "channel not joined; push buffered")));
							continue;
						}
						let join_ref = state.channels.get(&topic).and_then(|c| c.join_ref.clone());
						let wire = WireMessage {
							join_ref,
							r#ref: Some(push_ref),
							topic: topic.clone(),
							event,
							payload,
						};
						let sent = if should_encode_binary(&wire) {
							let frame = serializer::encode_binary_push(
								wire.join_ref.as_deref().unwrap_or_default(),
								wire.r#ref.as_deref().unwrap_or_default(),
								&wire.topic,
								&wire.event,
								&json!({"ref": wire.r#ref}),
								wire.payload.to_string().as_bytes(),
								1,
							);
							match frame {
								Ok(bytes) => sink.send(Message::Binary(bytes)).await,
								Err(_) => Ok(()),
							}
						} else {
							match encode_text(&wire) {
								Ok(text) => sink.send(Message::Text(text)).await,
								Err(_) => Ok(()),
							}
						};
						if sent.is_err() {
							let _ = reply.send(Err(Error::new(ErrorKind::Fetch, "failed to send push")));
						} else if ack {
							let _ = reply.send(Ok(Value::Null));
						} else {
							let _ = reply.send(Ok(Value::Null));
						}
					}
					Either::Frame(Ok(Message::Text(text))) => {
						if let Ok(message) = decode_text(&text) {
							let (flushed, errored) = handle_inbound(&mut state, message);
							flush_pushes(&mut sink, flushed).await;
							schedule_rejoins(&mut state, &rejoin_tx, errored);
						}
					}
					Either::Frame(Ok(Message::Binary(bytes))) => {
						if let Ok(message) = serializer::decode_binary_incoming(&bytes) {
							let (flushed, errored) = handle_inbound(&mut state, message);
							flush_pushes(&mut sink, flushed).await;
							schedule_rejoins(&mut state, &rejoin_tx, errored);
						}
					}
					Either::Frame(Ok(Message::Close(_))) => {
						break;
					}
					Either::Frame(Ok(_)) => {}
					Either::Frame(Err(error)) => {
						tracing::warn!(%error, "realtime socket error");
						break;
					}
					Either::Heartbeat => {
						if state.pending_heartbeat_ref.is_some() {
							tracing::warn!("heartbeat timeout, reconnecting");
							let _ = sink.send(Message::Close(None)).await;
							tokio::time::sleep(Duration::from_millis(100)).await;
							heartbeat_triggered_reconnect = true;
							break;
						}
						let hb_ref = state.gen_ref();
						state.pending_heartbeat_ref = Some(hb_ref.clone());
						let frame = WireMessage {
							join_ref: None,
							r#ref: Some(hb_ref),
							topic: "phoenix".to_string(),
							event: "heartbeat".to_string(),
							payload: json!({}),
						};
						if let Ok(text) = encode_text(&frame) {
							let _ = sink.send(Message::Text(text)).await;
						}
					}
					Either::RejoinDue(topic) => {
						if let Some(channel) = state.channels.get_mut(&topic) {
							if channel.state == ChannelState::Errored {
								let join_ref = state.gen_ref();
								channel.state = ChannelState::Joining;
								channel.join_ref = Some(join_ref.clone());
								let frame = WireMessage {
									join_ref: Some(join_ref),
									r#ref: Some(state.gen_ref()),
									topic: topic.clone(),
									event: "phx_join".to_string(),
									payload: channel.join_payload.clone(),
								};
								if let Ok(text) = encode_text(&frame) {
									let _ = sink.send(Message::Text(text)).await;
								}
							}
						}
					}
				}
			}

			drop(sink);
			*connection_state.lock().unwrap() = ConnectionState::Disconnected;
			if state.manual_disconnect || !should_reconnect {
				break 'connection;
			}
			if !heartbeat_triggered_reconnect {
				tokio::time::sleep(Duration::from_millis(reconnect_after_ms(state.reconnect_tries))).await;
				state.reconnect_tries += 1;
			}
		}
	});
}

/// Applies one decoded inbound frame to router state, returning any pushes
/// that were unblocked (e.g. by a successful join) and still need to go out
/// over the socket, plus any topics that just transitioned into
/// [`ChannelState::Errored`] and need a rejoin scheduled.
fn handle_inbound(state: &mut RouterState, message: WireMessage) -> (Vec<(String, Option<String>, Push)>, Vec<String>) {
	if message.topic == "phoenix" && message.event == "phx_reply" {
		if message.r#ref == state.pending_heartbeat_ref {
			state.pending_heartbeat_ref = None;
			return (Vec::new(), Vec::new());
		}
	}

	let Some(channel) = state.channels.get_mut(&message.topic) else {
		return (Vec::new(), Vec::new());
	};

	if matches!(message.event.as_str(), "phx_close" | "phx_error" | "phx_leave" | "phx_join") && !channel.accepts_ref(message.r#ref.as_deref()) {
		return (Vec::new(), Vec::new());
	}

	let mut flushed = Vec::new();
	let mut errored = Vec::new();
	match message.event.as_str() {
		"phx_reply" => {
			let status = message.payload.get("status").and_then(Value::as_str).unwrap_or("error");
			if status == "ok" {
				channel.state = ChannelState::Joined;
				channel.rejoin_tries = 0;
				let topic = message.topic.clone();
				let join_ref = channel.join_ref.clone();
				flushed.extend(channel.drain_push_buffer().into_iter().map(|push| (topic.clone(), join_ref.clone(), push)));
				if let Some(list) = message.payload.get("response").and_then(|r| r.get("postgres_changes")).and_then(Value::as_array) {
					if !channel.reconcile_postgres_changes(list) {
						channel.state = ChannelState::Errored;
						errored.push(message.topic.clone());
					}
				}
			} else {
				channel.state = ChannelState::Errored;
				errored.push(message.topic.clone());
			}
		}
		"phx_error" => {
			channel.state = ChannelState::Errored;
			errored.push(message.topic.clone());
		}
		"phx_close" => {
			channel.state = ChannelState::Closed;
		}
		"broadcast" => {
			if let Some(event) = message.payload.get("event").and_then(Value::as_str) {
				let event = event.to_string();
				let payload = message.payload.get("payload").cloned().unwrap_or(Value::Null);
				channel.dispatch_broadcast(&event, &payload);
			}
		}
		"presence_state" => {
			let new_state = presence::Presence::transform_raw_state(&message.payload);
			channel.presence.sync_state(new_state);
		}
		"presence_diff" => {
			let diff = presence::Presence::transform_raw_diff(&message.payload);
			let current_join_ref = channel.join_ref.clone();
			channel.presence.handle_diff(diff, message.join_ref.clone(), current_join_ref.as_deref());
		}
		"postgres_changes" => {
			if let Some(server_id) = message.payload.get("ids").and_then(Value::as_array).and_then(|ids| ids.first()).and_then(Value::as_i64) {
				if let Some(data) = message.payload.get("data") {
					if let Some(event_type) = data.get("type").and_then(Value::as_str) {
						let event_type = event_type.to_string();
						let payload = channel::build_change_payload(data);
						channel.dispatch_postgres_changes(server_id, &event_type, &payload);
					}
				}
			}
		}
		_ => {
			channel.dispatch_system(&message.payload);
		}
	}
	(flushed, errored)
}

/// Schedules a delayed rejoin for each topic that just errored, bumping
/// that channel's own backoff counter so repeated failures back off.
fn schedule_rejoins(state: &mut RouterState, rejoin_tx: &flume::Sender<String>, errored_topics: Vec<String>) {
	for topic in errored_topics {
		if let Some(channel) = state.channels.get_mut(&topic) {
			let delay = reconnect_after_ms(channel.rejoin_tries);
			channel.rejoin_tries += 1;
			schedule_rejoin(rejoin_tx, topic, delay);
		}
	}
}

/// Sends out pushes that were buffered while a channel hadn't joined yet.
async fn flush_pushes(sink: &mut SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>, flushed: Vec<(String, Option<String>, Push)>) {
	for (topic, join_ref, push) in flushed {
		let wire = WireMessage {
			join_ref,
			r#ref: Some(push.r#ref),
			topic,
			event: push.event,
			payload: push.payload,
		};
		if let Ok(text) = encode_text(&wire) {
			let _ = sink.send(Message::Text(text)).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reconnect_table_caps_at_last_entry() {
		assert_eq!(reconnect_after_ms(0), 1_000);
		assert_eq!(reconnect_after_ms(3), 10_000);
		assert_eq!(reconnect_after_ms(10), 10_000);
	}

	#[test]
	fn broadcast_endpoint_strips_socket_websocket_suffix() {
		let ws = Url::parse("wss://abcd.supabase.co/realtime/v1/socket/websocket?vsn=2.0.0&apikey=k").unwrap();
		let http = broadcast_endpoint(&ws);
		assert_eq!(http.scheme(), "https");
		assert_eq!(http.path(), "/realtime/v1/api/broadcast");
		assert_eq!(http.query(), None);
	}

	#[test]
	fn broadcast_endpoint_strips_bare_websocket_suffix() {
		let ws = Url::parse("ws://localhost:4000/socket/websocket").unwrap();
		let http = broadcast_endpoint(&ws);
		assert_eq!(http.scheme(), "http");
		assert_eq!(http.path(), "/api/broadcast");
	}
}
