//! Presence CRDT sync with pending-diff buffering.

use std::collections::HashMap;

use serde_json::Value;

/// One presence record, after `phx_ref*` wrapper stripping.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
	pub presence_ref: String,
	pub fields: Value,
}

/// `{presence_key -> [record, ...]}`; no key maps to an empty list.
pub type PresenceState = HashMap<String, Vec<PresenceRecord>>;

/// The join/leave pair a `sync` computes and a `presence_diff` carries.
#[derive(Debug, Clone, Default)]
pub struct PresenceDiff {
	pub joins: HashMap<String, Vec<PresenceRecord>>,
	pub leaves: HashMap<String, Vec<PresenceRecord>>,
}

/// Events emitted by a sync, in order: any `join`s, any `leave`s, then one
/// `sync`.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
	Join {
		key: String,
		current: Vec<PresenceRecord>,
		new: Vec<PresenceRecord>,
	},
	Leave {
		key: String,
		current: Vec<PresenceRecord>,
		left: Vec<PresenceRecord>,
	},
	Sync,
}

/// Tracks presence state for one channel, including the pending-diff buffer
/// used while a full state hasn't arrived yet after a rejoin.
#[derive(Debug, Default)]
pub struct Presence {
	state: PresenceState,
	pending_diffs: Vec<(Option<String>, PresenceDiff)>,
}

impl Presence {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current, read-only snapshot. Callers receive a deep clone so
	/// mutation by user code can't alter internal state.
	pub fn state(&self) -> PresenceState {
		self.state.clone()
	}

	/// Converts a raw server `metas`-wrapped presence snapshot into this
	/// module's record shape, stripping `phx_ref*` wrappers.
	pub fn transform_raw_state(raw: &Value) -> PresenceState {
		let mut state = PresenceState::new();
		let Some(obj) = raw.as_object() else {
			return state;
		};
		for (key, value) in obj {
			let Some(metas) = value.get("metas").and_then(Value::as_array) else {
				continue;
			};
			let records: Vec<PresenceRecord> = metas.iter().filter_map(transform_meta).collect();
			if !records.is_empty() {
				state.insert(key.clone(), records);
			}
		}
		state
	}

	/// Converts a raw `presence_diff` payload (`{joins, leaves}`) into a
	/// [`PresenceDiff`].
	pub fn transform_raw_diff(raw: &Value) -> PresenceDiff {
		let side = |key: &str| -> HashMap<String, Vec<PresenceRecord>> {
			let mut out = HashMap::new();
			if let Some(obj) = raw.get(key).and_then(Value::as_object) {
				for (presence_key, value) in obj {
					if let Some(metas) = value.get("metas").and_then(Value::as_array) {
						let records: Vec<PresenceRecord> = metas.iter().filter_map(transform_meta).collect();
						out.insert(presence_key.clone(), records);
					}
				}
			}
			out
		};
		PresenceDiff {
			joins: side("joins"),
			leaves: side("leaves"),
		}
	}

	/// Full-state sync. Diffs the new state against the current one,
	/// applies it, replays any diffs buffered while join-refs didn't
	/// match, then emits `sync`.
	pub fn sync_state(&mut self, new_state: PresenceState) -> Vec<PresenceEvent> {
		let mut joins = HashMap::new();
		let mut leaves = HashMap::new();

		for (key, new_records) in &new_state {
			let current_refs: Vec<&str> = self.state.get(key).map(|records| records.iter().map(|r| r.presence_ref.as_str()).collect()).unwrap_or_default();
			let fresh: Vec<PresenceRecord> = new_records.iter().filter(|r| !current_refs.contains(&r.presence_ref.as_str())).cloned().collect();
			if !fresh.is_empty() {
				joins.insert(key.clone(), fresh);
			}
		}
		for (key, current_records) in &self.state {
			let new_refs: Vec<&str> = new_state.get(key).map(|records| records.iter().map(|r| r.presence_ref.as_str()).collect()).unwrap_or_default();
			let gone: Vec<PresenceRecord> = current_records.iter().filter(|r| !new_refs.contains(&r.presence_ref.as_str())).cloned().collect();
			if !gone.is_empty() {
				leaves.insert(key.clone(), gone);
			}
		}

		let mut events = self.sync_diff(PresenceDiff {
			joins,
			leaves,
		});

		let pending = std::mem::take(&mut self.pending_diffs);
		for (_, diff) in pending {
			events.extend(self.sync_diff(diff));
		}

		events.push(PresenceEvent::Sync);
		events
	}

	/// Applies a join/leave diff: merges joined records (preserving
	/// existing refs), removes left records (deleting keys that become
	/// empty), and emits the corresponding events.
	pub fn sync_diff(&mut self, diff: PresenceDiff) -> Vec<PresenceEvent> {
		let mut events = Vec::new();

		for (key, new_records) in diff.joins {
			let entry = self.state.entry(key.clone()).or_default();
			let existing_refs: Vec<String> = entry.iter().map(|r| r.presence_ref.clone()).collect();
			for record in &new_records {
				if !existing_refs.contains(&record.presence_ref) {
					entry.push(record.clone());
				}
			}
			events.push(PresenceEvent::Join {
				key,
				current: entry.clone(),
				new: new_records,
			});
		}

		for (key, leaving) in diff.leaves {
			let leaving_refs: Vec<&str> = leaving.iter().map(|r| r.presence_ref.as_str()).collect();
			let remaining = match self.state.get(&key) {
				Some(records) => records.iter().filter(|r| !leaving_refs.contains(&r.presence_ref.as_str())).cloned().collect::<Vec<_>>(),
				None => Vec::new(),
			};
			if remaining.is_empty() {
				self.state.remove(&key);
			} else {
				self.state.insert(key.clone(), remaining.clone());
			}
			events.push(PresenceEvent::Leave {
				key,
				current: remaining,
				left: leaving,
			});
		}

		events
	}

	/// Stamps an inbound diff with the channel's current join-ref and
	/// either applies it immediately (ref matches) or buffers it for
	/// replay on the next full sync.
	pub fn handle_diff(&mut self, diff: PresenceDiff, diff_join_ref: Option<String>, current_join_ref: Option<&str>) -> Vec<PresenceEvent> {
		if current_join_ref.is_none() || diff_join_ref.as_deref() != current_join_ref {
			self.pending_diffs.push((diff_join_ref, diff));
			Vec::new()
		} else {
			let mut events = self.sync_diff(diff);
			events.push(PresenceEvent::Sync);
			events
		}
	}
}

fn transform_meta(meta: &Value) -> Option<PresenceRecord> {
	let obj = meta.as_object()?;
	let presence_ref = obj.get("phx_ref")?.as_str()?.to_string();
	let mut fields = obj.clone();
	fields.remove("phx_ref");
	fields.remove("phx_ref_prev");
	Some(PresenceRecord {
		presence_ref,
		fields: Value::Object(fields),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn sync_state_joins_new_keys_and_emits_sync() {
		let mut presence = Presence::new();
		let raw = json!({"u1": {"metas": [{"phx_ref": "a", "status": "online"}]}});
		let events = presence.sync_state(Presence::transform_raw_state(&raw));
		assert!(matches!(events.last(), Some(PresenceEvent::Sync)));
		let state = presence.state();
		assert_eq!(state["u1"][0].presence_ref, "a");
	}

	#[test]
	fn diff_after_state_adds_and_keeps_existing() {
		let mut presence = Presence::new();
		presence.sync_state(Presence::transform_raw_state(&json!({
			"u1": {"metas": [{"phx_ref": "a", "status": "online"}]},
		})));
		let diff_raw = json!({"joins": {"u2": {"metas": [{"phx_ref": "b"}]}}, "leaves": {}});
		let events = presence.sync_diff(Presence::transform_raw_diff(&diff_raw));
		let state = presence.state();
		assert_eq!(state["u1"].len(), 1);
		assert_eq!(state["u2"][0].presence_ref, "b");
		assert!(events.iter().any(|e| matches!(e, PresenceEvent::Join { key, .. } if key == "u2")));
	}

	#[test]
	fn empty_list_keys_are_removed() {
		let mut presence = Presence::new();
		presence.sync_state(Presence::transform_raw_state(&json!({
			"u1": {"metas": [{"phx_ref": "a"}]},
		})));
		let leave_diff = PresenceDiff {
			joins: HashMap::new(),
			leaves: HashMap::from([(
				"u1".to_string(),
				vec![PresenceRecord {
					presence_ref: "a".to_string(),
					fields: Value::Null,
				}],
			)]),
		};
		presence.sync_diff(leave_diff);
		assert!(!presence.state().contains_key("u1"));
	}

	#[test]
	fn diffs_buffered_on_join_ref_mismatch_replay_on_next_sync() {
		let mut presence = Presence::new();
		let diff = PresenceDiff {
			joins: HashMap::from([(
				"u2".to_string(),
				vec![PresenceRecord {
					presence_ref: "b".to_string(),
					fields: Value::Null,
				}],
			)]),
			leaves: HashMap::new(),
		};
		let events = presence.handle_diff(diff, Some("join-2".to_string()), Some("join-1"));
		assert!(events.is_empty());
		assert!(!presence.state().contains_key("u2"));

		presence.sync_state(Presence::transform_raw_state(&json!({
			"u1": {"metas": [{"phx_ref": "a"}]},
		})));
		assert!(presence.state().contains_key("u2"));
	}
}
