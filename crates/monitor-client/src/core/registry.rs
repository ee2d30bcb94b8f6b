use super::stream::StreamShared;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of one subscription, unique per client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sub-{}", self.0)
	}
}

/// Subscriptions that are still open, so `close()` can reach them
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
	streams: Arc<DashMap<SubscriptionId, Arc<StreamShared>>>,
}

impl SubscriptionRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, shared: Arc<StreamShared>) {
		self.streams.insert(shared.id(), shared);
	}

	pub fn remove(&self, id: SubscriptionId) {
		self.streams.remove(&id);
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.streams.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.streams.is_empty()
	}

	/// Abort every registered subscription and forget it.
	/// Returns how many were still open.
	pub fn abort_all(&self) -> usize {
		let drained: Vec<Arc<StreamShared>> = self.streams.iter().map(|entry| Arc::clone(entry.value())).collect();
		for shared in &drained {
			self.streams.remove(&shared.id());
		}
		drained.iter().filter(|shared| shared.abort()).count()
	}
}
