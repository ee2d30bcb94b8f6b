// monitor-client Library
//
// Client core for the monitoring service: unary commands and a live status
// subscription over one shared connection. The wire lives behind the
// `Transport` seam; gRPC is the default transport.

pub mod config;
mod core;
pub mod error;
pub mod messages;
pub mod transport;

pub use crate::core::{ConnectionInfo, MonitorClient, StreamEvent, StreamHandle, StreamState, SubscriptionId, TransitionError};
pub use config::ClientConfig;
pub use error::{ClientError, Code, Result, RpcError};
pub use messages::{CommandRequest, CommandResponse, Metadata, StatusEvent, StatusInfo};
pub use transport::Transport;
