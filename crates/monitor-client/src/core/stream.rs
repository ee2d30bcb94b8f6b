use super::registry::{SubscriptionId, SubscriptionRegistry};
use super::state::{SharedState, StreamState};
use crate::error::{ClientError, Result, RpcError};
use crate::messages::{StatusEvent, StatusInfo};
use crate::transport::{FrameStream, StreamFrame, Transport};
use futures::future::{self, BoxFuture};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// What a subscription delivers, in transport order.
///
/// Any number of `Data` and `StatusChange`, then at most one of `End` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
	Data(StatusEvent),
	/// Transport-level status, independent of data
	StatusChange(StatusInfo),
	/// Graceful completion by the server
	End,
	Error(RpcError),
}

impl StreamEvent {
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::End | Self::Error(_))
	}
}

/// State of one subscription shared by its handle, pump task and the client
#[derive(Debug)]
pub struct StreamShared {
	id: SubscriptionId,
	state: SharedState,
	aborted: AtomicBool,
	token: CancellationToken,
}

impl StreamShared {
	#[must_use]
	pub const fn new(id: SubscriptionId, token: CancellationToken) -> Self {
		Self {
			id,
			state: SharedState::new(),
			aborted: AtomicBool::new(false),
			token,
		}
	}

	#[must_use]
	pub const fn id(&self) -> SubscriptionId {
		self.id
	}

	#[must_use]
	pub const fn state(&self) -> &SharedState {
		&self.state
	}

	#[must_use]
	pub const fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Stop delivery and the underlying call. Returns `true` if this moved the
	/// stream from `Open` to `Closed`.
	pub fn abort(&self) -> bool {
		self.aborted.store(true, Ordering::Release);
		let closed = self.state.transition(StreamState::Closed).is_ok();
		self.token.cancel();
		closed
	}

	fn is_aborted(&self) -> bool {
		self.aborted.load(Ordering::Acquire)
	}
}

/// Caller side of one subscription.
///
/// Events are read with [`StreamHandle::next_event`], as a [`Stream`], or
/// through [`StreamHandle::for_each_event`]. Dropping the handle cancels it.
pub struct StreamHandle {
	shared: Arc<StreamShared>,
	events: mpsc::Receiver<StreamEvent>,
	registry: SubscriptionRegistry,
	finished: bool,
}

impl StreamHandle {
	#[must_use]
	pub const fn new(shared: Arc<StreamShared>, events: mpsc::Receiver<StreamEvent>, registry: SubscriptionRegistry) -> Self {
		Self {
			shared,
			events,
			registry,
			finished: false,
		}
	}

	#[must_use]
	pub fn id(&self) -> SubscriptionId {
		self.shared.id()
	}

	#[must_use]
	pub fn state(&self) -> StreamState {
		self.shared.state().get()
	}

	#[must_use]
	pub fn is_open(&self) -> bool {
		self.state() == StreamState::Open
	}

	/// Next event, or `None` once the stream is over or was cancelled.
	pub async fn next_event(&mut self) -> Option<StreamEvent> {
		future::poll_fn(|cx| self.poll_event(cx)).await
	}

	/// Cancel the subscription.
	///
	/// An `Open` handle becomes `Closed` without an `End` event, and nothing is
	/// delivered after this returns. The server is asked to stop, best-effort.
	/// Returns `false` when the handle was already terminal.
	pub fn cancel(&mut self) -> bool {
		let closed = self.shared.abort();
		self.registry.remove(self.id());
		self.events.close();
		self.finished = true;
		if closed {
			debug!(id = %self.id(), "subscription cancelled");
		}
		closed
	}

	/// Drive the subscription to completion, handing each event to `handler`
	pub async fn for_each_event<F>(mut self, mut handler: F)
	where
		F: FnMut(StreamEvent) -> BoxFuture<'static, ()>,
	{
		trace!(id = %self.id(), "starting event loop");
		while let Some(event) = self.next_event().await {
			handler(event).await;
		}
	}

	/// Gather every `Data` payload until the server completes the stream.
	///
	/// Fails with the stream's error, or with `ConnectionClosed` if the
	/// subscription was cut off by `close()`.
	pub async fn collect_data(mut self) -> Result<Vec<StatusEvent>> {
		let mut items = Vec::new();
		while let Some(event) = self.next_event().await {
			match event {
				StreamEvent::Data(item) => items.push(item),
				StreamEvent::StatusChange(_) => {}
				StreamEvent::End => return Ok(items),
				StreamEvent::Error(error) => return Err(error.into()),
			}
		}
		Err(ClientError::ConnectionClosed)
	}

	fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
		if self.finished || self.shared.is_aborted() {
			self.finished = true;
			return Poll::Ready(None);
		}

		match ready!(self.events.poll_recv(cx)) {
			Some(event) => {
				self.finished = event.is_terminal();
				Poll::Ready(Some(event))
			}
			None => {
				self.finished = true;
				Poll::Ready(None)
			}
		}
	}
}

impl Stream for StreamHandle {
	type Item = StreamEvent;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.get_mut().poll_event(cx)
	}
}

impl Drop for StreamHandle {
	fn drop(&mut self) {
		self.shared.abort();
		self.registry.remove(self.shared.id());
	}
}

impl std::fmt::Debug for StreamHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamHandle").field("id", &self.id()).field("state", &self.state()).finish_non_exhaustive()
	}
}

/// Task that owns one server-streaming call and forwards its frames in order
pub struct Pump {
	transport: Arc<dyn Transport>,
	shared: Arc<StreamShared>,
	events: mpsc::Sender<StreamEvent>,
	registry: SubscriptionRegistry,
}

impl Pump {
	#[must_use]
	pub fn new(transport: Arc<dyn Transport>, shared: Arc<StreamShared>, events: mpsc::Sender<StreamEvent>, registry: SubscriptionRegistry) -> Self {
		Self {
			transport,
			shared,
			events,
			registry,
		}
	}

	pub async fn run(self) {
		let token = self.shared.token().clone();
		let opened = tokio::select! {
			biased;
			() = token.cancelled() => None,
			result = self.transport.server_stream() => Some(result),
		};

		match opened {
			None => {
				self.shared.abort();
			}
			Some(Err(error)) => self.fail(error).await,
			Some(Ok(frames)) => self.forward(frames).await,
		}

		self.registry.remove(self.shared.id());
		trace!(id = %self.shared.id(), state = %self.shared.state().get(), "stream pump finished");
	}

	async fn forward(&self, mut frames: FrameStream) {
		let token = self.shared.token().clone();
		loop {
			let next = tokio::select! {
				biased;
				() = token.cancelled() => {
					self.shared.abort();
					return;
				}
				next = frames.next() => next,
			};

			let event = match next {
				Some(Ok(StreamFrame::Message(item))) => StreamEvent::Data(item),
				Some(Ok(StreamFrame::Status(info))) => StreamEvent::StatusChange(info),
				Some(Err(error)) => return self.fail(error).await,
				None => return self.finish().await,
			};

			if !self.deliver(event).await {
				return;
			}
		}
	}

	async fn finish(&self) {
		if self.shared.state().transition(StreamState::Closed).is_ok() {
			debug!(id = %self.shared.id(), "subscription completed by server");
			self.deliver(StreamEvent::End).await;
		}
	}

	async fn fail(&self, error: RpcError) {
		if self.shared.state().transition(StreamState::Failed).is_ok() {
			warn!(id = %self.shared.id(), code = %error.code, message = %error.message, "subscription failed");
			self.deliver(StreamEvent::Error(error)).await;
		}
	}

	/// `false` once the handle is gone or the subscription was cancelled
	async fn deliver(&self, event: StreamEvent) -> bool {
		let token = self.shared.token();
		tokio::select! {
			biased;
			() = token.cancelled() => {
				self.shared.abort();
				false
			}
			sent = self.events.send(event) => sent.is_ok(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn handle_with_channel(capacity: usize) -> (StreamHandle, mpsc::Sender<StreamEvent>, Arc<StreamShared>) {
		let shared = Arc::new(StreamShared::new(SubscriptionId(1), CancellationToken::new()));
		let (tx, rx) = mpsc::channel(capacity);
		let handle = StreamHandle::new(Arc::clone(&shared), rx, SubscriptionRegistry::new());
		(handle, tx, shared)
	}

	#[tokio::test]
	async fn test_nothing_after_terminal_event() {
		let (mut handle, tx, _shared) = handle_with_channel(4);
		tx.send(StreamEvent::End).await.unwrap();
		tx.send(StreamEvent::Data(json!(1).into())).await.unwrap();

		assert_eq!(handle.next_event().await, Some(StreamEvent::End));
		assert_eq!(handle.next_event().await, None);
	}

	#[tokio::test]
	async fn test_cancel_discards_buffered_events() {
		let (mut handle, tx, shared) = handle_with_channel(4);
		tx.send(StreamEvent::Data(json!(1).into())).await.unwrap();

		assert!(handle.cancel());
		assert_eq!(handle.state(), StreamState::Closed);
		assert!(shared.token().is_cancelled());
		assert_eq!(handle.next_event().await, None);
		assert!(!handle.cancel());
	}

	#[tokio::test]
	async fn test_drop_aborts_shared_state() {
		let (handle, _tx, shared) = handle_with_channel(1);
		drop(handle);

		assert_eq!(shared.state().get(), StreamState::Closed);
		assert!(shared.token().is_cancelled());
	}

	#[test]
	fn test_terminal_events() {
		assert!(StreamEvent::End.is_terminal());
		assert!(StreamEvent::Error(RpcError::unavailable("gone")).is_terminal());
		assert!(!StreamEvent::Data(json!({}).into()).is_terminal());
	}
}
