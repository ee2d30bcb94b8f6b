use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Lifecycle of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
	Open,
	/// Graceful completion or cancellation
	Closed,
	/// Terminated by an error
	Failed,
}

impl StreamState {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		!matches!(self, Self::Open)
	}

	const fn as_u8(self) -> u8 {
		match self {
			Self::Open => 0,
			Self::Closed => 1,
			Self::Failed => 2,
		}
	}

	const fn from_u8(value: u8) -> Self {
		match value {
			0 => Self::Open,
			1 => Self::Closed,
			_ => Self::Failed,
		}
	}
}

impl fmt::Display for StreamState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Open => "OPEN",
			Self::Closed => "CLOSED",
			Self::Failed => "FAILED",
		})
	}
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct TransitionError {
	pub from: StreamState,
	pub to: StreamState,
}

/// Stream state shared between a handle, its pump task and the client.
///
/// The only valid transitions are `Open -> Closed` and `Open -> Failed`; the
/// first one to land wins and every later attempt is rejected.
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState {
	#[must_use]
	pub const fn new() -> Self {
		Self(AtomicU8::new(StreamState::Open.as_u8()))
	}

	#[must_use]
	pub fn get(&self) -> StreamState {
		StreamState::from_u8(self.0.load(Ordering::Acquire))
	}

	/// Validate and execute a state transition
	pub fn transition(&self, to: StreamState) -> Result<(), TransitionError> {
		if !to.is_terminal() {
			return Err(TransitionError { from: self.get(), to });
		}

		self
			.0
			.compare_exchange(StreamState::Open.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
			.map(|_| ())
			.map_err(|current| TransitionError {
				from: StreamState::from_u8(current),
				to,
			})
	}
}

impl Default for SharedState {
	fn default() -> Self {
		Self::new()
	}
}
