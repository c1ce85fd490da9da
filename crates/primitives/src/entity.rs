use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque identifier of an edited record, stable for a session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Arc<str>);

impl EntityId {
	pub fn new(id: impl AsRef<str>) -> Self {
		Self(Arc::from(id.as_ref()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for EntityId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for EntityId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl From<String> for EntityId {
	fn from(id: String) -> Self {
		Self(Arc::from(id))
	}
}

impl From<u64> for EntityId {
	fn from(id: u64) -> Self {
		Self::new(id.to_string())
	}
}

impl AsRef<str> for EntityId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
