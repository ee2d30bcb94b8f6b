//! Transport seam between the client core and the wire.
//!
//! The core only talks to a [`Transport`]: one unary exchange per command and
//! one server-streaming call per subscription. Implementations own the channel
//! and its credentials; the core owns lifecycle, deadlines and delivery order.
//!
//! # Features
//!
//! - `grpc` - [`GrpcTransport`] over a tonic channel
//!
//! [`InMemTransport`] is always available for tests and in-process embedding.

#[cfg(feature = "grpc")]
pub mod grpc;
pub mod inmem;

#[cfg(feature = "grpc")]
pub use grpc::GrpcTransport;
pub use inmem::{InMemTransport, StreamFeed};

use crate::error::RpcError;
use crate::messages::{CommandRequest, CommandResponse, StatusEvent, StatusInfo};
use futures::stream::BoxStream;
use std::time::Duration;

/// One item produced by a server-streaming call
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
	Message(StatusEvent),
	Status(StatusInfo),
}

/// Frames of one call. `None` after the last frame is graceful completion,
/// an `Err` item is a failure and nothing follows it.
pub type FrameStream = BoxStream<'static, Result<StreamFrame, RpcError>>;

/// Core transport interface that all implementations must satisfy.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
	/// Issue one request-response exchange.
	///
	/// `deadline` is advisory here; the core enforces it regardless.
	async fn unary(&self, request: CommandRequest, deadline: Option<Duration>) -> Result<CommandResponse, RpcError>;

	/// Open one server-streaming status call.
	async fn server_stream(&self) -> Result<FrameStream, RpcError>;

	/// Release the underlying connection. Called once by the core.
	fn close(&self) {}
}
