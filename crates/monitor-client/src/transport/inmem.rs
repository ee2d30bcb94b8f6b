//! In-process transport.
//!
//! Plays the monitored service inside the same process: unary commands go to a
//! pluggable handler (by default an acknowledgment like the service's own), and
//! every `server_stream` call hands a [`StreamFeed`] to whoever waits in
//! [`InMemTransport::next_stream`], so the other side can push frames, finish or
//! fail the stream, and observe cancellation.
//!
//! # Example
//!
//! ```rust,no_run
//! use monitor_client::transport::InMemTransport;
//! use monitor_client::{ClientConfig, MonitorClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = InMemTransport::new();
//!     let client = MonitorClient::with_transport(transport.clone(), ClientConfig::default()).unwrap();
//!
//!     let mut handle = client.subscribe().unwrap();
//!     let feed = transport.next_stream().await.unwrap();
//!     feed.data(json!({ "id": 1, "name": "Networker" })).await;
//!
//!     println!("{:?}", handle.next_event().await);
//! }
//! ```

use super::{FrameStream, StreamFrame, Transport};
use crate::error::RpcError;
use crate::messages::{CommandRequest, CommandResponse, StatusEvent, StatusInfo};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

const FEED_BUFFER: usize = 16;

type UnaryHandler = Arc<dyn Fn(CommandRequest) -> BoxFuture<'static, Result<CommandResponse, RpcError>> + Send + Sync>;

/// In-memory transport. Clones share the same state.
#[derive(Clone)]
pub struct InMemTransport {
	inner: Arc<Inner>,
}

struct Inner {
	handler: UnaryHandler,
	feeds_tx: mpsc::UnboundedSender<StreamFeed>,
	feeds_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamFeed>>,
	open_failures: Mutex<Vec<RpcError>>,
	unary_calls: AtomicUsize,
	stream_calls: AtomicUsize,
	closed: AtomicBool,
}

impl InMemTransport {
	/// Transport whose commands are acknowledged the way the monitor does.
	#[must_use]
	pub fn new() -> Self {
		Self::with_unary_handler(|request: CommandRequest| async move { Ok(acknowledge(&request)) })
	}

	/// Transport whose commands are answered by `handler`.
	#[must_use]
	pub fn with_unary_handler<F, Fut>(handler: F) -> Self
	where
		F: Fn(CommandRequest) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<CommandResponse, RpcError>> + Send + 'static,
	{
		let (feeds_tx, feeds_rx) = mpsc::unbounded_channel();
		let handler: UnaryHandler = Arc::new(move |request| handler(request).boxed());

		Self {
			inner: Arc::new(Inner {
				handler,
				feeds_tx,
				feeds_rx: tokio::sync::Mutex::new(feeds_rx),
				open_failures: Mutex::new(Vec::new()),
				unary_calls: AtomicUsize::new(0),
				stream_calls: AtomicUsize::new(0),
				closed: AtomicBool::new(false),
			}),
		}
	}

	/// Wait for the next subscription opened against this transport.
	pub async fn next_stream(&self) -> Option<StreamFeed> {
		self.inner.feeds_rx.lock().await.recv().await
	}

	/// Make the next `server_stream` call fail before any frame.
	pub fn fail_next_stream(&self, error: RpcError) {
		self.inner.open_failures.lock().unwrap_or_else(PoisonError::into_inner).push(error);
	}

	#[must_use]
	pub fn unary_calls(&self) -> usize {
		self.inner.unary_calls.load(Ordering::SeqCst)
	}

	#[must_use]
	pub fn stream_calls(&self) -> usize {
		self.inner.stream_calls.load(Ordering::SeqCst)
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}
}

impl Default for InMemTransport {
	fn default() -> Self {
		Self::new()
	}
}

/// The monitor's reply to a text message
#[must_use]
pub fn acknowledge(request: &CommandRequest) -> CommandResponse {
	CommandResponse {
		success: true,
		message: format!("Text message for '{}' received: {}", request.target_or_empty(), request.message),
	}
}

#[async_trait::async_trait]
impl Transport for InMemTransport {
	async fn unary(&self, request: CommandRequest, _deadline: Option<Duration>) -> Result<CommandResponse, RpcError> {
		if self.is_closed() {
			return Err(RpcError::unavailable("transport closed"));
		}
		self.inner.unary_calls.fetch_add(1, Ordering::SeqCst);
		(self.inner.handler)(request).await
	}

	async fn server_stream(&self) -> Result<FrameStream, RpcError> {
		if self.is_closed() {
			return Err(RpcError::unavailable("transport closed"));
		}
		self.inner.stream_calls.fetch_add(1, Ordering::SeqCst);

		let failure = {
			let mut failures = self.inner.open_failures.lock().unwrap_or_else(PoisonError::into_inner);
			(!failures.is_empty()).then(|| failures.remove(0))
		};
		if let Some(error) = failure {
			return Err(error);
		}

		let (tx, rx) = mpsc::channel(FEED_BUFFER);
		self
			.inner
			.feeds_tx
			.send(StreamFeed { tx })
			.map_err(|_| RpcError::unavailable("no stream listener"))?;

		Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed())
	}

	fn close(&self) {
		self.inner.closed.store(true, Ordering::SeqCst);
	}
}

/// Server side of one in-memory stream.
///
/// Dropping the feed (or calling [`StreamFeed::end`]) completes the stream gracefully.
pub struct StreamFeed {
	tx: mpsc::Sender<Result<StreamFrame, RpcError>>,
}

impl StreamFeed {
	/// Push a frame; `false` once the client side has gone away.
	pub async fn push(&self, frame: StreamFrame) -> bool {
		self.tx.send(Ok(frame)).await.is_ok()
	}

	pub async fn data(&self, payload: impl Into<StatusEvent>) -> bool {
		self.push(StreamFrame::Message(payload.into())).await
	}

	pub async fn status(&self, info: StatusInfo) -> bool {
		self.push(StreamFrame::Status(info)).await
	}

	/// Complete the stream gracefully
	pub fn end(self) {}

	/// Terminate the stream with `error`
	pub async fn fail(self, error: RpcError) -> bool {
		self.tx.send(Err(error)).await.is_ok()
	}

	/// Resolves once the client stopped consuming this stream
	pub async fn closed(&self) {
		self.tx.closed().await;
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}
