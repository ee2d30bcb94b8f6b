mod client;
mod registry;
mod state;
mod stream;

pub use client::{ConnectionInfo, MonitorClient};
pub use registry::SubscriptionId;
pub use state::{StreamState, TransitionError};
pub use stream::{StreamEvent, StreamHandle};
