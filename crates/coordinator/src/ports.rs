//! Collaborator interfaces the coordinator is written against.
//!
//! Transports are opaque: a [`WriteExecutor`] may speak REST, RPC or anything
//! else, and a [`ReadCache`] may be backed by any client-side query cache.

use async_trait::async_trait;
use autosave_primitives::{EntityId, Patch, ViewKey};
use serde_json::Value;

use crate::error::{FetchError, WriteFailure};

/// Shared, process-wide store of cached view values.
///
/// Implementations must discard read responses that were cancelled through
/// [`ReadCache::cancel_outstanding`] so they cannot overwrite newer values.
pub trait ReadCache: Send + Sync {
	fn get_view(&self, key: &ViewKey) -> Option<Value>;

	fn set_view(&self, key: &ViewKey, value: Value);

	/// Cancels reads in flight for `keys`; their responses must be dropped.
	fn cancel_outstanding(&self, keys: &[ViewKey]);

	/// Marks `keys` stale and triggers a background refetch.
	fn invalidate(&self, keys: &[ViewKey]);
}

/// Sends a patch to the server and returns the confirmed entity value.
///
/// Not retried automatically; callers decide whether to resend.
#[async_trait]
pub trait WriteExecutor: Send + Sync {
	async fn send(&self, entity: &EntityId, patch: &Patch) -> Result<Value, WriteFailure>;
}

/// Server-side read used to refetch invalidated views.
#[async_trait]
pub trait ViewFetcher: Send + Sync {
	async fn fetch(&self, key: &ViewKey) -> Result<Value, FetchError>;
}
