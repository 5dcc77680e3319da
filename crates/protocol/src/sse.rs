//! The event type delivered by `text/event-stream` responses.

use serde::{Deserialize, Serialize};

/// Event type reported when a frame carries no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// A single dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
	/// Event type (`event:` field), `"message"` when absent.
	pub event: String,
	/// Payload with multiple `data:` lines joined by `\n`.
	pub data: String,
	/// Last event id in effect when the event was dispatched.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	/// Reconnection delay in milliseconds announced alongside this event.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retry: Option<u64>,
}

impl SseEvent {
	/// Creates a default-typed event carrying `data`.
	pub fn new(data: impl Into<String>) -> Self {
		Self {
			event: DEFAULT_EVENT_TYPE.to_string(),
			data: data.into(),
			id: None,
			retry: None,
		}
	}

	/// Sets the event type.
	pub fn with_event(mut self, event: impl Into<String>) -> Self {
		self.event = event.into();
		self
	}

	/// Sets the event id.
	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_event_has_default_type() {
		let event = SseEvent::new("hello");
		assert_eq!(event.event, DEFAULT_EVENT_TYPE);
		assert_eq!(event.id, None);
	}

	#[test]
	fn serialized_event_omits_unset_fields() {
		let json = serde_json::to_value(SseEvent::new("hi").with_event("Notifier")).unwrap();
		assert_eq!(json, serde_json::json!({ "event": "Notifier", "data": "hi" }));
	}

	#[test]
	fn deserialized_event_fills_optional_fields() {
		let event: SseEvent = serde_json::from_str(r#"{"event":"tick","data":"1","id":"7","retry":250}"#).unwrap();
		assert_eq!(event.id.as_deref(), Some("7"));
		assert_eq!(event.retry, Some(250));
	}
}
