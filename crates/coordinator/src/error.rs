//! Error types for writes, reads, configuration and API misuse.

use std::path::PathBuf;

use autosave_primitives::{EntityId, ViewKey};
use serde::Serialize;
use thiserror::Error;

/// A failed persistence write.
///
/// Stored on the session as its last error; never propagated as a panic or
/// unhandled error to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteFailure {
	/// Transport-level failure before a response arrived.
	#[error("network error: {message}")]
	Network { message: String },

	/// The server answered with an error.
	#[error("server rejected write ({code}): {message}")]
	Server { code: u16, message: String },

	/// The server holds a newer revision than the edit was based on.
	#[error("write conflicts with a newer server revision")]
	Conflict,

	/// The write task ended without reporting a result.
	#[error("write executor stopped before the write settled")]
	ExecutorStopped,
}

impl WriteFailure {
	pub fn network(message: impl Into<String>) -> Self {
		Self::Network { message: message.into() }
	}

	pub fn server(code: u16, message: impl Into<String>) -> Self {
		Self::Server {
			code,
			message: message.into(),
		}
	}
}

/// A failed read of a cached view.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
	#[error("view {0} not found")]
	NotFound(ViewKey),

	#[error("network error: {0}")]
	Network(String),
}

/// Misuse of the coordinator API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
	/// Each entity may have at most one open edit session.
	#[error("an edit session for {0} is already open")]
	SessionAlreadyOpen(EntityId),

	/// [`crate::Coordinator::open_cached`] found no cached detail view.
	#[error("detail view {0} is not cached")]
	NotCached(ViewKey),
}

/// Errors loading autosave configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("I/O error reading {path}: {error}")]
	Io {
		path: PathBuf,
		error: std::io::Error,
	},

	/// The quiet period must be non-zero.
	#[error("debounce_ms must be greater than zero ({scope})")]
	InvalidDebounce { scope: String },
}
