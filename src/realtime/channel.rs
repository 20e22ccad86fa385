//! Channel: per-topic state machine, push buffer, binding dispatch.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::oneshot;

use super::presence::Presence;

/// Push buffer bound: the 101st enqueue drops the oldest pending push.
pub const PUSH_BUFFER_LIMIT: usize = 100;

/// Channel lifecycle, advanced only by the owning client task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
	Closed,
	Joining,
	Joined,
	Errored,
	Leaving,
}

/// A registered interest in a class of inbound messages.
pub enum Binding {
	Broadcast {
		event: String,
		callback: Arc<dyn Fn(Value) + Send + Sync>,
	},
	PostgresChanges {
		event: String,
		schema: String,
		table: String,
		filter: Option<String>,
		callback: Arc<dyn Fn(Value) + Send + Sync>,
		server_id: Option<i64>,
	},
	Presence {
		callback: Arc<dyn Fn(super::presence::PresenceEvent) + Send + Sync>,
	},
	System {
		callback: Arc<dyn Fn(Value) + Send + Sync>,
	},
}

/// A pending request/reply pair.
pub struct Push {
	pub event: String,
	pub payload: Value,
	pub r#ref: String,
	pub responder: Option<oneshot::Sender<Value>>,
}

/// A logical pub/sub subscription multiplexed on the shared socket.
pub struct Channel {
	pub topic: String,
	pub state: ChannelState,
	pub join_ref: Option<String>,
	pub join_payload: Value,
	pub bindings: Vec<Binding>,
	pub push_buffer: VecDeque<Push>,
	pub presence: Presence,
	pub rejoin_tries: u32,
}

impl Channel {
	pub fn new(topic: String, join_payload: Value) -> Self {
		Self {
			topic,
			state: ChannelState::Closed,
			join_ref: None,
			join_payload,
			bindings: Vec::new(),
			push_buffer: VecDeque::new(),
			presence: Presence::new(),
			rejoin_tries: 0,
		}
	}

	/// Registers a binding.
	pub fn bind(&mut self, binding: Binding) {
		self.bindings.push(binding);
	}

	/// Enqueues a push. If the buffer is already at [`PUSH_BUFFER_LIMIT`],
	/// the oldest pending push is dropped (its responder is simply
	/// dropped, which the waiting receiver observes as a closed channel).
	pub fn enqueue_push(&mut self, push: Push) {
		if self.push_buffer.len() >= PUSH_BUFFER_LIMIT {
			if let Some(dropped) = self.push_buffer.pop_front() {
				tracing::warn!(topic = %self.topic, event = %dropped.event, "push buffer overflow, dropping oldest push");
			}
		}
		self.push_buffer.push_back(push);
	}

	/// Drains the push buffer in FIFO order, e.g. once the channel joins.
	pub fn drain_push_buffer(&mut self) -> Vec<Push> {
		self.push_buffer.drain(..).collect()
	}

	/// Dispatches an inbound broadcast event to matching bindings
	/// (exact match or the `"*"` wildcard).
	pub fn dispatch_broadcast(&self, event: &str, payload: &Value) {
		for binding in &self.bindings {
			if let Binding::Broadcast {
				event: bound_event,
				callback,
			} = binding
			{
				if bound_event == event || bound_event == "*" {
					callback(payload.clone());
				}
			}
		}
	}

	/// Dispatches a postgres_changes event by server-assigned id and event
	/// type.
	pub fn dispatch_postgres_changes(&self, server_id: i64, event_type: &str, payload: &Value) {
		for binding in &self.bindings {
			if let Binding::PostgresChanges {
				event,
				server_id: bound_id,
				callback,
				..
			} = binding
			{
				if *bound_id == Some(server_id) && (event == event_type || event == "*") {
					callback(payload.clone());
				}
			}
		}
	}

	/// Dispatches a system event passthrough.
	pub fn dispatch_system(&self, payload: &Value) {
		for binding in &self.bindings {
			if let Binding::System {
				callback,
			} = binding
			{
				callback(payload.clone());
			}
		}
	}

	/// Validates that the server's join-reply `postgres_changes` list
	/// matches every registered filter (treating `null`/`undefined`/`""`
	/// as equivalent), assigning each binding its server id on success.
	pub fn reconcile_postgres_changes(&mut self, server_list: &[Value]) -> bool {
		let normalize = |value: Option<&str>| value.filter(|v| !v.is_empty()).map(str::to_string);
		let mut ids = Vec::new();
		for binding in &self.bindings {
			if let Binding::PostgresChanges {
				event,
				schema,
				table,
				filter,
				..
			} = binding
			{
				let matched = server_list.iter().find(|entry| {
					entry.get("event").and_then(Value::as_str) == Some(event.as_str())
						&& entry.get("schema").and_then(Value::as_str) == Some(schema.as_str())
						&& entry.get("table").and_then(Value::as_str) == Some(table.as_str())
						&& normalize(entry.get("filter").and_then(Value::as_str)) == normalize(filter.as_deref())
				});
				match matched.and_then(|entry| entry.get("id")).and_then(Value::as_i64) {
					Some(id) => ids.push(id),
					None => return false,
				}
			}
		}
		let mut index = 0;
		for binding in &mut self.bindings {
			if let Binding::PostgresChanges {
				server_id,
				..
			} = binding
			{
				*server_id = ids.get(index).copied();
				index += 1;
			}
		}
		true
	}

	/// Whether a control-event `ref` belongs to the channel's current
	/// subscription lifecycle (stale messages from a prior join are
	/// discarded).
	pub fn accepts_ref(&self, r#ref: Option<&str>) -> bool {
		match (self.join_ref.as_deref(), r#ref) {
			(Some(join_ref), Some(r#ref)) => join_ref == r#ref,
			(None, _) => false,
			(Some(_), None) => false,
		}
	}
}

/// Builds the `{schema,table,commit_timestamp,errors,eventType,new,old}`
/// shape a `postgres_changes` listener receives, coercing `record`/
/// `old_record` columns from their wire-string form per the server's
/// reported Postgres type.
pub fn build_change_payload(data: &Value) -> Value {
	let columns: HashMap<String, String> = data
		.get("columns")
		.and_then(Value::as_array)
		.map(|cols| {
			cols.iter()
				.filter_map(|c| {
					let name = c.get("name").and_then(Value::as_str)?;
					let type_name = c.get("type").and_then(Value::as_str)?;
					Some((name.to_string(), type_name.to_string()))
				})
				.collect()
		})
		.unwrap_or_default();

	let convert_record = |record: Option<&Value>| -> Value {
		let Some(Value::Object(map)) = record else {
			return Value::Null;
		};
		let mut out = serde_json::Map::new();
		for (key, value) in map {
			let converted = match columns.get(key) {
				Some(type_name) => convert_column(value, type_name),
				None => value.clone(),
			};
			out.insert(key.clone(), converted);
		}
		Value::Object(out)
	};

	json!({
		"schema": data.get("schema").cloned().unwrap_or(Value::Null),
		"table": data.get("table").cloned().unwrap_or(Value::Null),
		"commit_timestamp": data.get("commit_timestamp").cloned().unwrap_or(Value::Null),
		"errors": data.get("errors").cloned().unwrap_or(Value::Null),
		"eventType": data.get("type").cloned().unwrap_or(Value::Null),
		"new": convert_record(data.get("record")),
		"old": convert_record(data.get("old_record")),
	})
}

/// Coerces one column's wire-string value by its reported Postgres type.
/// Array types (`_`-prefixed) recurse per element; anything that fails to
/// parse is left as the original string rather than dropped.
fn convert_column(value: &Value, type_name: &str) -> Value {
	let raw = match value.as_str() {
		Some(s) => s,
		None => return value.clone(),
	};
	if let Some(elem_type) = type_name.strip_prefix('_') {
		return convert_array(raw, elem_type);
	}
	match type_name {
		"bool" => match raw {
			"t" => Value::Bool(true),
			"f" => Value::Bool(false),
			_ => value.clone(),
		},
		"int2" | "int4" | "int8" | "float4" | "float8" | "numeric" | "oid" => match raw.parse::<f64>() {
			Ok(n) => serde_json::Number::from_f64(n).map(Value::Number).unwrap_or_else(|| value.clone()),
			Err(_) => value.clone(),
		},
		"json" | "jsonb" => serde_json::from_str(raw).unwrap_or_else(|_| value.clone()),
		"timestamp" => Value::String(raw.replacen(' ', "T", 1)),
		_ => value.clone(),
	}
}

fn convert_array(raw: &str, elem_type: &str) -> Value {
	let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
		return Value::String(raw.to_string());
	};
	if inner.is_empty() {
		return Value::Array(Vec::new());
	}
	let elements = split_pg_array_literal(inner);
	Value::Array(elements.iter().map(|element| convert_column(&Value::String(element.clone()), elem_type)).collect())
}

/// Splits a Postgres array literal's inner text on top-level commas,
/// respecting nested `{}` and quoted elements.
fn split_pg_array_literal(inner: &str) -> Vec<String> {
	let mut out = Vec::new();
	let mut depth = 0i32;
	let mut current = String::new();
	let mut in_quotes = false;
	for c in inner.chars() {
		match c {
			'"' => in_quotes = !in_quotes,
			'{' if !in_quotes => {
				depth += 1;
				current.push(c);
			}
			'}' if !in_quotes => {
				depth -= 1;
				current.push(c);
			}
			',' if !in_quotes && depth == 0 => {
				out.push(current.trim_matches('"').to_string());
				current.clear();
			}
			_ => current.push(c),
		}
	}
	if !current.is_empty() {
		out.push(current.trim_matches('"').to_string());
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn push_buffer_drops_oldest_on_overflow() {
		let mut channel = Channel::new("realtime:room".to_string(), Value::Null);
		for i in 0..101 {
			channel.enqueue_push(Push {
				event: format!("e{i}"),
				payload: Value::Null,
				r#ref: i.to_string(),
				responder: None,
			});
		}
		assert_eq!(channel.push_buffer.len(), PUSH_BUFFER_LIMIT);
		assert_eq!(channel.push_buffer.front().unwrap().event, "e1");
		assert_eq!(channel.push_buffer.back().unwrap().event, "e100");
	}

	#[test]
	fn dispatches_broadcast_exact_and_wildcard() {
		let mut channel = Channel::new("realtime:room".to_string(), Value::Null);
		let calls = Arc::new(std::sync::Mutex::new(0));
		let calls_clone = calls.clone();
		channel.bind(Binding::Broadcast {
			event: "chat".to_string(),
			callback: Arc::new(move |_| {
				*calls_clone.lock().unwrap() += 1;
			}),
		});
		channel.dispatch_broadcast("chat", &Value::Null);
		channel.dispatch_broadcast("other", &Value::Null);
		assert_eq!(*calls.lock().unwrap(), 1);
	}

	#[test]
	fn converts_typed_columns_in_a_change_payload() {
		let data = json!({
			"type": "UPDATE",
			"schema": "public",
			"table": "todos",
			"commit_timestamp": "2024-01-01T00:00:00Z",
			"errors": null,
			"columns": [
				{"name": "id", "type": "int8"},
				{"name": "done", "type": "bool"},
				{"name": "tags", "type": "_text"},
				{"name": "meta", "type": "jsonb"},
				{"name": "created_at", "type": "timestamp"},
			],
			"record": {
				"id": "42",
				"done": "t",
				"tags": "{a,b,c}",
				"meta": "{\"x\":1}",
				"created_at": "2024-01-01 00:00:00",
			},
			"old_record": null,
		});

		let payload = build_change_payload(&data);
		assert_eq!(payload["eventType"], "UPDATE");
		assert_eq!(payload["new"]["id"], 42);
		assert_eq!(payload["new"]["done"], true);
		assert_eq!(payload["new"]["tags"], json!(["a", "b", "c"]));
		assert_eq!(payload["new"]["meta"], json!({"x": 1}));
		assert_eq!(payload["new"]["created_at"], "2024-01-01T00:00:00");
		assert_eq!(payload["old"], Value::Null);
	}

	#[test]
	fn leaves_unparsable_numeric_column_as_original_string() {
		let converted = convert_column(&Value::String("NaN-ish".to_string()), "float8");
		assert_eq!(converted, Value::String("NaN-ish".to_string()));
	}

	#[test]
	fn empty_array_literal_converts_to_empty_array() {
		assert_eq!(convert_array("{}", "int4"), Value::Array(Vec::new()));
	}
}
