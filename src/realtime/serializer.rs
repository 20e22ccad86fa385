//! Serializer: V1 text-array and V2 binary-broadcast encode/decode.
//!
//! No existing crate does Phoenix's bespoke framing, so this is built
//! directly against the byte-exact layout.

use serde_json::{json, Value};

use crate::error::{Error, ErrorKind, Result};

/// A decoded message in the channel's wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
	pub join_ref: Option<String>,
	pub r#ref: Option<String>,
	pub topic: String,
	pub event: String,
	pub payload: Value,
}

/// Metadata keys allowed to cross the wire with a binary broadcast frame.
const METADATA_ALLOWLIST: &[&str] = &["ref"];

/// Encodes a message as the V1/V2 JSON 5-tuple `[join_ref, ref, topic, event, payload]`.
pub fn encode_text(message: &Message) -> Result<String> {
	let tuple = json!([message.join_ref, message.r#ref, message.topic, message.event, message.payload]);
	serde_json::to_string(&tuple).map_err(Error::from)
}

/// Decodes a V1/V2 JSON 5-tuple back into a [`Message`].
pub fn decode_text(raw: &str) -> Result<Message> {
	let value: Value = serde_json::from_str(raw)?;
	let tuple = value.as_array().ok_or_else(|| Error::new(ErrorKind::Internal, "expected a 5-tuple"))?;
	if tuple.len() != 5 {
		return Err(Error::new(ErrorKind::Internal, "expected a 5-tuple"));
	}
	Ok(Message {
		join_ref: tuple[0].as_str().map(str::to_string),
		r#ref: tuple[1].as_str().map(str::to_string),
		topic: tuple[2].as_str().unwrap_or_default().to_string(),
		event: tuple[3].as_str().unwrap_or_default().to_string(),
		payload: tuple[4].clone(),
	})
}

/// Whether a message should go out as a binary broadcast frame rather than
/// the JSON 5-tuple: `event == "broadcast"`, the payload carries a string
/// `event` field, and the inner payload isn't itself a raw byte buffer.
pub fn should_encode_binary(message: &Message) -> bool {
	if message.event != "broadcast" {
		return false;
	}
	let Some(obj) = message.payload.as_object() else {
		return false;
	};
	if !matches!(obj.get("event"), Some(Value::String(_))) {
		return false;
	}
	!is_byte_buffer(obj.get("payload").unwrap_or(&Value::Null))
}

/// Structural/name-based byte-buffer detection, robust across execution
/// contexts: a JSON-decoded value is never a true byte buffer, but callers
/// that pass pre-serialized objects may tag one with `{"__bytes__": true}`.
fn is_byte_buffer(value: &Value) -> bool {
	value.as_object().map(|obj| obj.get("__bytes__") == Some(&Value::Bool(true))).unwrap_or(false)
}

/// Encodes a client→server binary push frame (`kind=3`).
///
/// `encoding` is `0` for an opaque byte payload, `1` for a UTF-8 JSON body.
pub fn encode_binary_push(
	join_ref: &str,
	r#ref: &str,
	topic: &str,
	event: &str,
	metadata: &Value,
	payload: &[u8],
	encoding: u8,
) -> Result<Vec<u8>> {
	let metadata_json = filtered_metadata_json(metadata)?;
	let lengths = [join_ref.len(), r#ref.len(), topic.len(), event.len(), metadata_json.len()];
	for len in lengths {
		if len > 255 {
			return Err(Error::new(ErrorKind::Internal, "binary frame field exceeds 255 bytes"));
		}
	}

	let mut frame = Vec::with_capacity(7 + lengths.iter().sum::<usize>() + payload.len());
	frame.push(3u8);
	frame.push(join_ref.len() as u8);
	frame.push(r#ref.len() as u8);
	frame.push(topic.len() as u8);
	frame.push(event.len() as u8);
	frame.push(metadata_json.len() as u8);
	frame.push(encoding);
	frame.extend_from_slice(join_ref.as_bytes());
	frame.extend_from_slice(r#ref.as_bytes());
	frame.extend_from_slice(topic.as_bytes());
	frame.extend_from_slice(event.as_bytes());
	frame.extend_from_slice(metadata_json.as_bytes());
	frame.extend_from_slice(payload);
	Ok(frame)
}

fn filtered_metadata_json(metadata: &Value) -> Result<String> {
	let filtered = match metadata.as_object() {
		Some(obj) => {
			let mut kept = serde_json::Map::new();
			for key in METADATA_ALLOWLIST {
				if let Some(value) = obj.get(*key) {
					kept.insert((*key).to_string(), value.clone());
				}
			}
			Value::Object(kept)
		}
		None => json!({}),
	};
	serde_json::to_string(&filtered).map_err(Error::from)
}

/// Decodes a server→client binary incoming frame (`kind=4`) into the
/// broadcast-shaped [`Message`] callers expect.
pub fn decode_binary_incoming(frame: &[u8]) -> Result<Message> {
	let malformed = || Error::new(ErrorKind::Internal, "malformed binary frame");
	if frame.is_empty() || frame[0] != 4 {
		return Err(malformed());
	}
	if frame.len() < 5 {
		return Err(malformed());
	}
	let topic_size = frame[1] as usize;
	let event_size = frame[2] as usize;
	let metadata_size = frame[3] as usize;
	let encoding = frame[4];

	let mut offset = 5;
	let take = |offset: &mut usize, len: usize| -> Result<&[u8]> {
		let end = *offset + len;
		let slice = frame.get(*offset..end).ok_or_else(malformed)?;
		*offset = end;
		Ok(slice)
	};

	let topic = std::str::from_utf8(take(&mut offset, topic_size)?).map_err(|_| malformed())?.to_string();
	let event = std::str::from_utf8(take(&mut offset, event_size)?).map_err(|_| malformed())?.to_string();
	let metadata_bytes = take(&mut offset, metadata_size)?;
	let metadata: Value = if metadata_bytes.is_empty() {
		json!({})
	} else {
		serde_json::from_slice(metadata_bytes).map_err(|_| malformed())?
	};
	let payload_bytes = &frame[offset..];

	let payload = if encoding == 1 {
		serde_json::from_slice(payload_bytes).map_err(|_| malformed())?
	} else {
		json!(payload_bytes)
	};

	let mut broadcast_payload = serde_json::Map::new();
	broadcast_payload.insert("type".to_string(), json!("broadcast"));
	broadcast_payload.insert("event".to_string(), json!(event));
	broadcast_payload.insert("payload".to_string(), payload);
	if metadata.as_object().map(|m| !m.is_empty()).unwrap_or(false) {
		broadcast_payload.insert("meta".to_string(), metadata);
	}

	Ok(Message {
		join_ref: None,
		r#ref: None,
		topic,
		event: "broadcast".to_string(),
		payload: Value::Object(broadcast_payload),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_message() -> Message {
		Message {
			join_ref: Some("1".to_string()),
			r#ref: Some("2".to_string()),
			topic: "realtime:room".to_string(),
			event: "broadcast".to_string(),
			payload: json!({"event": "chat", "payload": {"text": "hi"}}),
		}
	}

	#[test]
	fn text_round_trips() {
		let message = sample_message();
		let encoded = encode_text(&message).unwrap();
		let decoded = decode_text(&encoded).unwrap();
		assert_eq!(decoded, message);
	}

	#[test]
	fn selects_binary_for_broadcast_with_string_event() {
		assert!(should_encode_binary(&sample_message()));
	}

	#[test]
	fn does_not_select_binary_for_non_broadcast() {
		let mut message = sample_message();
		message.event = "other".to_string();
		assert!(!should_encode_binary(&message));
	}

	#[test]
	fn binary_round_trips_up_to_metadata_filtering() {
		let frame = encode_binary_push("1", "2", "realtime:room", "chat", &json!({"ref": "2"}), b"hello", 0).unwrap();
		assert_eq!(frame[0], 3);
	}

	#[test]
	fn decodes_incoming_binary_broadcast() {
		let frame = {
			let topic = "room";
			let event = "chat";
			let payload = br#"{"text":"hi"}"#;
			let mut frame = vec![4u8, topic.len() as u8, event.len() as u8, 0, 1];
			frame.extend_from_slice(topic.as_bytes());
			frame.extend_from_slice(event.as_bytes());
			frame.extend_from_slice(payload);
			frame
		};
		let message = decode_binary_incoming(&frame).unwrap();
		assert_eq!(message.topic, "room");
		assert_eq!(message.event, "broadcast");
		assert_eq!(message.payload["event"], "chat");
		assert_eq!(message.payload["payload"]["text"], "hi");
	}

	#[test]
	fn rejects_truncated_frame() {
		assert!(decode_binary_incoming(&[4, 10, 0, 0, 1]).is_err());
	}
}
