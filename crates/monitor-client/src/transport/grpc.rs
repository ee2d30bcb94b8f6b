use super::{FrameStream, StreamFrame, Transport};
use crate::config::ClientConfig;
use crate::error::{ClientError, RpcError};
use crate::messages::wire::{TextMessage, TextMessageResponse, WorkerDetails};
use crate::messages::{CommandRequest, CommandResponse, Metadata, StatusEvent, StatusInfo};
use futures::stream::{self, StreamExt};
use http::uri::PathAndQuery;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tonic::client::Grpc;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Streaming};
use tonic_prost::ProstCodec;
use tracing::{debug, trace};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Method paths resolved once from the configured service name
#[derive(Debug, Clone)]
struct MethodPaths {
	command: PathAndQuery,
	status: PathAndQuery,
}

impl MethodPaths {
	fn new(service: &str) -> Result<Self, ClientError> {
		let path = |method: &str| {
			PathAndQuery::try_from(format!("/{service}/{method}")).map_err(|e| ClientError::Config(format!("invalid service name '{service}': {e}")))
		};
		Ok(Self {
			command: path("SendTextMessage")?,
			status: path("Status")?,
		})
	}
}

/// gRPC transport over one lazily connected HTTP/2 channel
pub struct GrpcTransport {
	channel: Mutex<Option<Channel>>,
	paths: MethodPaths,
	authorization: Option<AsciiMetadataValue>,
}

impl GrpcTransport {
	/// Build the channel without waiting for the server.
	///
	/// Must be called inside a tokio runtime; the channel spawns its worker on it.
	pub fn connect_lazy(config: &ClientConfig) -> Result<Self, ClientError> {
		let uri = config.uri()?;
		let mut endpoint = Endpoint::from_shared(uri.clone()).map_err(|e| ClientError::Connection(format!("invalid endpoint '{uri}': {e}")))?;

		if config.secure {
			endpoint = endpoint
				.tls_config(ClientTlsConfig::new().with_native_roots())
				.map_err(|e| ClientError::Connection(format!("failed to initialize TLS: {e}")))?;
		}
		if let Some(timeout) = config.connect_timeout() {
			endpoint = endpoint.connect_timeout(timeout);
		}
		endpoint = endpoint.http2_keep_alive_interval(KEEPALIVE_INTERVAL).keep_alive_while_idle(true);

		let authorization = config
			.auth_token
			.as_ref()
			.map(|token| {
				format!("Bearer {token}")
					.parse::<AsciiMetadataValue>()
					.map_err(|_| ClientError::Config("auth token is not valid ASCII metadata".into()))
			})
			.transpose()?;

		debug!(%uri, secure = config.secure, "gRPC channel created");

		Ok(Self {
			channel: Mutex::new(Some(endpoint.connect_lazy())),
			paths: MethodPaths::new(&config.service)?,
			authorization,
		})
	}

	fn channel(&self) -> Result<Channel, RpcError> {
		self
			.channel
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
			.ok_or_else(|| RpcError::unavailable("channel closed"))
	}

	async fn ready_client(&self) -> Result<Grpc<Channel>, RpcError> {
		let mut grpc = Grpc::new(self.channel()?);
		grpc.ready().await.map_err(|e| RpcError::unavailable(format!("service was not ready: {e}")))?;
		Ok(grpc)
	}

	fn request<T>(&self, message: T, deadline: Option<Duration>) -> Request<T> {
		let mut request = Request::new(message);
		if let Some(deadline) = deadline {
			request.set_timeout(deadline);
		}
		if let Some(value) = &self.authorization {
			request.metadata_mut().insert("authorization", value.clone());
		}
		request
	}
}

#[async_trait::async_trait]
impl Transport for GrpcTransport {
	async fn unary(&self, request: CommandRequest, deadline: Option<Duration>) -> Result<CommandResponse, RpcError> {
		let mut grpc = self.ready_client().await?;
		let codec = ProstCodec::<TextMessage, TextMessageResponse>::default();
		let response = grpc.unary(self.request(TextMessage::from(request), deadline), self.paths.command.clone(), codec).await?;
		Ok(response.into_inner().into())
	}

	async fn server_stream(&self) -> Result<FrameStream, RpcError> {
		let mut grpc = self.ready_client().await?;
		let codec = ProstCodec::<(), WorkerDetails>::default();
		let response = grpc.server_streaming(self.request((), None), self.paths.status.clone(), codec).await?;

		let headers = StatusInfo::Headers(metadata_to_map(response.metadata()));
		let opened = stream::once(async move { Ok(StreamFrame::Status(headers)) });
		let frames = stream::unfold(Some(response.into_inner()), next_frame);

		Ok(opened.chain(frames).boxed())
	}

	fn close(&self) {
		// In-flight calls keep their own clone until they are dropped.
		if self.channel.lock().unwrap_or_else(PoisonError::into_inner).take().is_some() {
			debug!("gRPC channel released");
		}
	}
}

/// Pull the next frame; trailers are reported once the body is exhausted.
async fn next_frame(state: Option<Streaming<WorkerDetails>>) -> Option<(Result<StreamFrame, RpcError>, Option<Streaming<WorkerDetails>>)> {
	let mut streaming = state?;
	match streaming.message().await {
		Ok(Some(details)) => {
			trace!(worker = %details.name, "status message received");
			let frame = StatusEvent::try_from(details).map(StreamFrame::Message);
			let next = if frame.is_ok() { Some(streaming) } else { None };
			Some((frame, next))
		}
		Ok(None) => match streaming.trailers().await {
			Ok(Some(trailers)) => Some((Ok(StreamFrame::Status(StatusInfo::Trailers(metadata_to_map(&trailers)))), None)),
			Ok(None) => None,
			Err(status) => Some((Err(status.into()), None)),
		},
		Err(status) => Some((Err(status.into()), None)),
	}
}

fn metadata_to_map(metadata: &MetadataMap) -> Metadata {
	metadata
		.clone()
		.into_headers()
		.iter()
		.filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_method_paths_follow_service_name() {
		let paths = MethodPaths::new("clientapi.ClientService").unwrap();
		assert_eq!(paths.command.as_str(), "/clientapi.ClientService/SendTextMessage");
		assert_eq!(paths.status.as_str(), "/clientapi.ClientService/Status");
	}

	#[test]
	fn test_method_paths_reject_invalid_service() {
		assert!(matches!(MethodPaths::new("bad service"), Err(ClientError::Config(_))));
	}

	#[test]
	fn test_metadata_to_map_keeps_ascii_values() {
		let mut metadata = MetadataMap::new();
		metadata.insert("x-monitor-node", "edge-1".parse().unwrap());
		let map = metadata_to_map(&metadata);
		assert_eq!(map.get("x-monitor-node").map(String::as_str), Some("edge-1"));
	}

	#[tokio::test]
	async fn test_connect_lazy_does_not_contact_server() {
		// Nothing listens on this port; construction must still succeed.
		let transport = GrpcTransport::connect_lazy(&ClientConfig::new("127.0.0.1:1")).unwrap();
		assert!(transport.channel().is_ok());

		transport.close();
		assert_eq!(transport.channel().unwrap_err().code, crate::error::Code::Unavailable);
	}

	#[tokio::test]
	async fn test_calls_after_close_are_unavailable() {
		let transport = GrpcTransport::connect_lazy(&ClientConfig::new("127.0.0.1:1")).unwrap();
		transport.close();

		let err = transport.unary(CommandRequest::new("ping"), None).await.unwrap_err();
		assert_eq!(err.code, crate::error::Code::Unavailable);
		assert!(transport.server_stream().await.is_err());
	}
}
