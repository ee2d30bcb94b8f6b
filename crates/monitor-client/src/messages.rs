#[cfg(feature = "grpc")]
pub mod wire;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Transport metadata (headers or trailers), ASCII values only
pub type Metadata = BTreeMap<String, String>;

/// A command for the monitored service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
	pub message: String,
	/// Routing identifier; `None` addresses the service itself
	pub target: Option<String>,
}

impl CommandRequest {
	#[must_use]
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			target: None,
		}
	}

	/// Set the routing target. An empty target is the same as none.
	#[must_use]
	pub fn with_target(mut self, target: impl Into<String>) -> Self {
		let target = target.into();
		self.target = if target.is_empty() { None } else { Some(target) };
		self
	}

	#[must_use]
	pub fn target_or_empty(&self) -> &str {
		self.target.as_deref().unwrap_or_default()
	}
}

/// Server acknowledgment of a [`CommandRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
	pub success: bool,
	pub message: String,
}

/// One payload pushed on the status subscription.
///
/// The core never looks inside; its shape is defined by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusEvent {
	payload: JsonValue,
}

impl StatusEvent {
	#[must_use]
	pub const fn new(payload: JsonValue) -> Self {
		Self { payload }
	}

	#[must_use]
	pub const fn payload(&self) -> &JsonValue {
		&self.payload
	}

	#[must_use]
	pub fn into_payload(self) -> JsonValue {
		self.payload
	}

	/// Decode the payload into a caller-side schema type
	pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
		T::deserialize(&self.payload)
	}
}

impl From<JsonValue> for StatusEvent {
	fn from(payload: JsonValue) -> Self {
		Self::new(payload)
	}
}

/// Transport-level status of a stream, reported apart from its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "metadata", rename_all = "camelCase")]
pub enum StatusInfo {
	/// The server accepted the call and sent its response headers
	Headers(Metadata),
	/// Trailing metadata sent with graceful completion
	Trailers(Metadata),
}

impl StatusInfo {
	#[must_use]
	pub const fn metadata(&self) -> &Metadata {
		match self {
			Self::Headers(metadata) | Self::Trailers(metadata) => metadata,
		}
	}
}
