use super::registry::{SubscriptionId, SubscriptionRegistry};
use super::stream::{Pump, StreamHandle, StreamShared};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result, RpcError};
use crate::messages::{CommandRequest, CommandResponse};
use crate::transport::Transport;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Client for the monitoring service.
///
/// One transport connection backs any number of concurrent commands and
/// subscriptions. Clones share the connection; `close()` on any clone closes it
/// for all of them.
#[derive(Clone)]
pub struct MonitorClient {
	inner: Arc<ClientInner>,
}

struct ClientInner {
	config: ClientConfig,
	transport: Arc<dyn Transport>,
	shutdown: CancellationToken,
	closed: AtomicBool,
	subscriptions: SubscriptionRegistry,
	next_subscription: AtomicU64,
	pending_commands: AtomicUsize,
}

/// Snapshot of the client for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
	pub endpoint: String,
	pub secure: bool,
	pub closed: bool,
	pub active_subscriptions: usize,
	pub pending_commands: usize,
}

impl ConnectionInfo {
	#[must_use]
	pub const fn is_idle(&self) -> bool {
		self.active_subscriptions == 0 && self.pending_commands == 0
	}
}

impl MonitorClient {
	/// Resolve the endpoint and set up a lazily connecting gRPC channel.
	///
	/// Fails with [`ClientError::Connection`] when the host does not resolve or the
	/// channel cannot be built. No request reaches the server until the first call.
	#[cfg(feature = "grpc")]
	pub async fn open(config: ClientConfig) -> Result<Self> {
		config.validate()?;

		let authority = config.authority()?;
		let resolved = tokio::net::lookup_host(authority.as_str())
			.await
			.map_err(|e| ClientError::Connection(format!("failed to resolve '{authority}': {e}")))?
			.count();
		if resolved == 0 {
			return Err(ClientError::Connection(format!("'{authority}' did not resolve to any address")));
		}
		debug!(%authority, addresses = resolved, "endpoint resolved");

		let transport = crate::transport::GrpcTransport::connect_lazy(&config)?;
		let client = Self::with_transport(transport, config)?;
		info!(endpoint = %client.inner.config.endpoint, secure = client.inner.config.secure, "monitor client opened");
		Ok(client)
	}

	/// Run the client core over any transport
	pub fn with_transport<T: Transport>(transport: T, config: ClientConfig) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			inner: Arc::new(ClientInner {
				config,
				transport: Arc::new(transport),
				shutdown: CancellationToken::new(),
				closed: AtomicBool::new(false),
				subscriptions: SubscriptionRegistry::new(),
				next_subscription: AtomicU64::new(1),
				pending_commands: AtomicUsize::new(0),
			}),
		})
	}

	#[must_use]
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Send one command and wait for the reply, bounded by the configured deadline.
	///
	/// Failures are returned as they are; nothing is retried.
	pub async fn send_command(&self, request: CommandRequest) -> Result<CommandResponse> {
		self.send_command_with_deadline(request, self.inner.config.deadline()).await
	}

	/// Send a text message to `target`; an empty target addresses nobody in particular.
	pub async fn send_text(&self, message: impl Into<String>, target: impl Into<String>) -> Result<CommandResponse> {
		self.send_command(CommandRequest::new(message).with_target(target)).await
	}

	/// Send one command with an explicit deadline instead of the configured one.
	///
	/// Expiry yields `DEADLINE_EXCEEDED`. If the client is closed while the call
	/// is pending it fails with [`ClientError::ConnectionClosed`].
	pub async fn send_command_with_deadline(&self, request: CommandRequest, deadline: Option<Duration>) -> Result<CommandResponse> {
		self.ensure_open()?;
		let _pending = PendingGuard::new(&self.inner.pending_commands);

		trace!(to = request.target_or_empty(), ?deadline, "sending command");
		let call = with_deadline(self.inner.transport.unary(request, deadline), deadline);

		let response = tokio::select! {
			biased;
			() = self.inner.shutdown.cancelled() => return Err(ClientError::ConnectionClosed),
			response = call => response?,
		};

		debug!(success = response.success, "command acknowledged");
		Ok(response)
	}

	/// Open a status subscription.
	///
	/// Returns immediately; the call itself runs on a task spawned onto the
	/// current tokio runtime. Failures to open the call arrive as the handle's
	/// `Error` event. Fails here only when the client is closed or no runtime is
	/// available.
	pub fn subscribe(&self) -> Result<StreamHandle> {
		self.ensure_open()?;
		let runtime = tokio::runtime::Handle::try_current().map_err(|e| ClientError::Connection(format!("subscribe needs a tokio runtime: {e}")))?;

		let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
		let shared = Arc::new(StreamShared::new(id, self.inner.shutdown.child_token()));
		let (tx, rx) = mpsc::channel(self.inner.config.stream_buffer);

		self.register(&shared);
		let pump = Pump::new(Arc::clone(&self.inner.transport), Arc::clone(&shared), tx, self.inner.subscriptions.clone());
		runtime.spawn(pump.run());

		debug!(%id, state = %shared.state().get(), "subscription opened");
		Ok(StreamHandle::new(shared, rx, self.inner.subscriptions.clone()))
	}

	/// Close the client.
	///
	/// Open subscriptions become `Closed` without an `End` event, pending commands
	/// fail with [`ClientError::ConnectionClosed`] and the connection is released.
	/// Calling it again does nothing.
	pub fn close(&self) {
		if self.inner.closed.swap(true, Ordering::AcqRel) {
			return;
		}

		let cancelled = self.inner.subscriptions.abort_all();
		self.inner.shutdown.cancel();
		self.inner.transport.close();

		info!(
			endpoint = %self.inner.config.endpoint,
			cancelled_subscriptions = cancelled,
			"monitor client closed"
		);
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}

	#[must_use]
	pub fn connection_info(&self) -> ConnectionInfo {
		ConnectionInfo {
			endpoint: self.inner.config.endpoint.clone(),
			secure: self.inner.config.secure,
			closed: self.is_closed(),
			active_subscriptions: self.inner.subscriptions.len(),
			pending_commands: self.inner.pending_commands.load(Ordering::Acquire),
		}
	}

	/// Track `shared` so `close()` reaches it. A close that drained the registry
	/// before the insert is caught by the re-check, so no handle outlives it open.
	fn register(&self, shared: &Arc<StreamShared>) {
		self.inner.subscriptions.insert(Arc::clone(shared));
		if self.is_closed() {
			shared.abort();
			self.inner.subscriptions.remove(shared.id());
		}
	}

	fn ensure_open(&self) -> Result<()> {
		if self.is_closed() {
			Err(ClientError::ConnectionClosed)
		} else {
			Ok(())
		}
	}
}

impl std::fmt::Debug for MonitorClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MonitorClient").field("info", &self.connection_info()).finish_non_exhaustive()
	}
}

/// Bound `call` by `deadline`. Any failure that lands once the deadline has
/// passed is reported as `DEADLINE_EXCEEDED`, whatever the server called it.
async fn with_deadline<F>(call: F, deadline: Option<Duration>) -> std::result::Result<CommandResponse, RpcError>
where
	F: Future<Output = std::result::Result<CommandResponse, RpcError>>,
{
	let Some(deadline) = deadline else {
		return call.await;
	};

	let started = Instant::now();
	match tokio::time::timeout(deadline, call).await {
		Ok(Err(_)) if started.elapsed() >= deadline => Err(RpcError::deadline_exceeded(deadline)),
		Ok(result) => result,
		Err(_) => Err(RpcError::deadline_exceeded(deadline)),
	}
}

/// Counts a command as pending for as long as it lives
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
	fn new(counter: &'a AtomicUsize) -> Self {
		counter.fetch_add(1, Ordering::AcqRel);
		Self(counter)
	}
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::AcqRel);
	}
}
