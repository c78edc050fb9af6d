//! Change event model and wire message shapes

use serde::{Deserialize, Serialize};

use crate::metadata::types::now_millis;

/// Kind of namespace change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	Create,
	Modify,
	Delete,
	Rename,
}

impl ChangeKind {
	/// Back-pressure priority: deletes outrank renames outrank creates
	/// outrank modifies.
	pub fn priority(&self) -> u8 {
		match self {
			ChangeKind::Delete => 3,
			ChangeKind::Rename => 2,
			ChangeKind::Create => 1,
			ChangeKind::Modify => 0,
		}
	}
}

/// A single change event delivered to watchers and subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
	#[serde(rename = "type")]
	pub kind: ChangeKind,

	pub path: String,

	/// Previous path, only for renames.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub old_path: Option<String>,

	/// Milliseconds since epoch.
	pub timestamp: i64,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub size: Option<u64>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub mtime: Option<i64>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_directory: Option<bool>,
}

impl WatchEvent {
	pub fn new(kind: ChangeKind, path: impl Into<String>) -> Self {
		Self {
			kind,
			path: path.into(),
			old_path: None,
			timestamp: now_millis(),
			size: None,
			mtime: None,
			is_directory: None,
		}
	}

	pub fn create(path: impl Into<String>) -> Self {
		Self::new(ChangeKind::Create, path)
	}

	pub fn modify(path: impl Into<String>) -> Self {
		Self::new(ChangeKind::Modify, path)
	}

	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(ChangeKind::Delete, path)
	}

	pub fn rename(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
		let mut event = Self::new(ChangeKind::Rename, new_path);
		event.old_path = Some(old_path.into());
		event
	}

	pub fn with_size(mut self, size: u64) -> Self {
		self.size = Some(size);
		self
	}

	pub fn with_mtime(mut self, mtime: i64) -> Self {
		self.mtime = Some(mtime);
		self
	}

	pub fn with_directory(mut self, is_directory: bool) -> Self {
		self.is_directory = Some(is_directory);
		self
	}
}

/// Transport-agnostic wire messages exchanged with external consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
	Subscribe {
		id: String,
		path: String,
		#[serde(default)]
		recursive: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		filter: Option<String>,
	},
	Unsubscribe {
		id: String,
	},
	Batch {
		events: Vec<WatchEvent>,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_priority_ordering() {
		assert!(ChangeKind::Delete.priority() > ChangeKind::Rename.priority());
		assert!(ChangeKind::Rename.priority() > ChangeKind::Create.priority());
		assert!(ChangeKind::Create.priority() > ChangeKind::Modify.priority());
	}

	#[test]
	fn test_event_wire_shape() {
		let event = WatchEvent::rename("/old", "/new").with_size(10).with_directory(false);
		let json: serde_json::Value = serde_json::to_value(&event).unwrap();
		assert_eq!(json["type"], "rename");
		assert_eq!(json["path"], "/new");
		assert_eq!(json["oldPath"], "/old");
		assert_eq!(json["isDirectory"], false);
		// absent optionals are omitted entirely
		assert!(json.get("mtime").is_none());
	}

	#[test]
	fn test_subscribe_message_parses() {
		let text = r#"{"type":"subscribe","id":"s1","path":"/d","recursive":true}"#;
		let message: WireMessage = serde_json::from_str(text).unwrap();
		match message {
			WireMessage::Subscribe { id, path, recursive, filter } => {
				assert_eq!(id, "s1");
				assert_eq!(path, "/d");
				assert!(recursive);
				assert!(filter.is_none());
			}
			other => panic!("expected subscribe, got {other:?}"),
		}
	}

	#[test]
	fn test_batch_roundtrip() {
		let batch = WireMessage::Batch {
			events: vec![WatchEvent::create("/a"), WatchEvent::delete("/b")],
		};
		let text = serde_json::to_string(&batch).unwrap();
		let parsed: WireMessage = serde_json::from_str(&text).unwrap();
		match parsed {
			WireMessage::Batch { events } => assert_eq!(events.len(), 2),
			other => panic!("expected batch, got {other:?}"),
		}
	}
}
