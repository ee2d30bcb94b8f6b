//! Protobuf messages of the monitor's `clientapi.ClientService`.

use super::{CommandRequest, CommandResponse, StatusEvent};
use crate::error::RpcError;
use prost::Message;
use serde::{Deserialize, Serialize};

/// Request of `SendTextMessage`
#[derive(Clone, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct TextMessage {
	#[prost(string, tag = "1")]
	pub message: String,

	#[prost(string, tag = "2")]
	#[serde(rename = "for")]
	pub r#for: String,
}

/// Response of `SendTextMessage`
#[derive(Clone, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct TextMessageResponse {
	#[prost(bool, tag = "1")]
	pub success: bool,

	#[prost(string, tag = "2")]
	pub message: String,
}

/// One item of the `Status` stream
#[derive(Clone, PartialEq, Eq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDetails {
	#[prost(int32, tag = "1")]
	pub id: i32,

	#[prost(string, tag = "2")]
	pub name: String,

	#[prost(message, repeated, tag = "3")]
	pub worker_subscription: Vec<Subscription>,
}

#[derive(Clone, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct Subscription {
	#[prost(int32, tag = "1")]
	pub id: i32,

	#[prost(string, tag = "2")]
	#[serde(rename = "type")]
	pub r#type: String,

	#[prost(string, tag = "3")]
	pub label: String,
}

impl From<CommandRequest> for TextMessage {
	fn from(request: CommandRequest) -> Self {
		Self {
			r#for: request.target.unwrap_or_default(),
			message: request.message,
		}
	}
}

impl From<TextMessageResponse> for CommandResponse {
	fn from(response: TextMessageResponse) -> Self {
		Self {
			success: response.success,
			message: response.message,
		}
	}
}

impl TryFrom<WorkerDetails> for StatusEvent {
	type Error = RpcError;

	fn try_from(details: WorkerDetails) -> Result<Self, Self::Error> {
		serde_json::to_value(&details)
			.map(Self::new)
			.map_err(|e| RpcError::internal(format!("failed to convert worker details: {e}")))
	}
}
