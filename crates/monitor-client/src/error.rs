use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the client core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
	/// The endpoint could not be resolved or the transport could not be initialized
	#[error("Connection error: {0}")]
	Connection(String),

	#[error("RPC error: {0}")]
	Rpc(#[from] RpcError),

	/// Operation attempted after `close()`
	#[error("Connection closed")]
	ConnectionClosed,

	#[error("Invalid configuration: {0}")]
	Config(String),
}

/// Status codes carried by an [`RpcError`], numbered as on the gRPC wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
	Ok,
	Cancelled,
	Unknown,
	InvalidArgument,
	DeadlineExceeded,
	NotFound,
	AlreadyExists,
	PermissionDenied,
	ResourceExhausted,
	FailedPrecondition,
	Aborted,
	OutOfRange,
	Unimplemented,
	Internal,
	Unavailable,
	DataLoss,
	Unauthenticated,
}

impl Code {
	/// Map a wire status number; anything out of range is `Unknown`.
	#[must_use]
	pub const fn from_i32(value: i32) -> Self {
		match value {
			0 => Self::Ok,
			1 => Self::Cancelled,
			3 => Self::InvalidArgument,
			4 => Self::DeadlineExceeded,
			5 => Self::NotFound,
			6 => Self::AlreadyExists,
			7 => Self::PermissionDenied,
			8 => Self::ResourceExhausted,
			9 => Self::FailedPrecondition,
			10 => Self::Aborted,
			11 => Self::OutOfRange,
			12 => Self::Unimplemented,
			13 => Self::Internal,
			14 => Self::Unavailable,
			15 => Self::DataLoss,
			16 => Self::Unauthenticated,
			_ => Self::Unknown,
		}
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Ok => "OK",
			Self::Cancelled => "CANCELLED",
			Self::Unknown => "UNKNOWN",
			Self::InvalidArgument => "INVALID_ARGUMENT",
			Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
			Self::NotFound => "NOT_FOUND",
			Self::AlreadyExists => "ALREADY_EXISTS",
			Self::PermissionDenied => "PERMISSION_DENIED",
			Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
			Self::FailedPrecondition => "FAILED_PRECONDITION",
			Self::Aborted => "ABORTED",
			Self::OutOfRange => "OUT_OF_RANGE",
			Self::Unimplemented => "UNIMPLEMENTED",
			Self::Internal => "INTERNAL",
			Self::Unavailable => "UNAVAILABLE",
			Self::DataLoss => "DATA_LOSS",
			Self::Unauthenticated => "UNAUTHENTICATED",
		}
	}
}

impl From<i32> for Code {
	fn from(value: i32) -> Self {
		Self::from_i32(value)
	}
}

impl fmt::Display for Code {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Per-call failure: transport failure, deadline, or a server-reported error.
///
/// On a subscription the same type is delivered through the `error` event and
/// is terminal for that handle.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
	pub code: Code,
	pub message: String,
}

impl RpcError {
	#[must_use]
	pub fn new(code: Code, message: impl Into<String>) -> Self {
		Self { code, message: message.into() }
	}

	#[must_use]
	pub fn deadline_exceeded(deadline: Duration) -> Self {
		Self::new(Code::DeadlineExceeded, format!("deadline of {}ms exceeded", deadline.as_millis()))
	}

	#[must_use]
	pub fn unavailable(message: impl Into<String>) -> Self {
		Self::new(Code::Unavailable, message)
	}

	#[must_use]
	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(Code::Internal, message)
	}
}

#[cfg(feature = "grpc")]
impl From<tonic::Status> for RpcError {
	fn from(status: tonic::Status) -> Self {
		Self::new(Code::from_i32(i32::from(status.code())), status.message())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_code_maps_wire_numbers() {
		assert_eq!(Code::from_i32(0), Code::Ok);
		assert_eq!(Code::from_i32(4), Code::DeadlineExceeded);
		assert_eq!(Code::from_i32(14), Code::Unavailable);
		assert_eq!(Code::from_i32(16), Code::Unauthenticated);
	}

	#[test]
	fn test_code_out_of_range_is_unknown() {
		assert_eq!(Code::from_i32(2), Code::Unknown);
		assert_eq!(Code::from_i32(-1), Code::Unknown);
		assert_eq!(Code::from_i32(99), Code::Unknown);
	}

	#[test]
	fn test_rpc_error_display() {
		let err = RpcError::deadline_exceeded(Duration::from_millis(250));
		assert_eq!(err.code, Code::DeadlineExceeded);
		assert_eq!(err.to_string(), "DEADLINE_EXCEEDED: deadline of 250ms exceeded");
	}

	#[test]
	fn test_rpc_error_converts_into_client_error() {
		let err: ClientError = RpcError::unavailable("connection refused").into();
		assert_eq!(err, ClientError::Rpc(RpcError::new(Code::Unavailable, "connection refused")));
		assert_eq!(err.to_string(), "RPC error: UNAVAILABLE: connection refused");
	}

	#[cfg(feature = "grpc")]
	#[test]
	fn test_rpc_error_from_tonic_status() {
		let err = RpcError::from(tonic::Status::not_found("no such worker"));
		assert_eq!(err.code, Code::NotFound);
		assert_eq!(err.message, "no such worker");
	}
}
