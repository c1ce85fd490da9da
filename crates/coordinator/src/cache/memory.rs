//! In-memory [`ReadCache`] with sequence-numbered reads.
//!
//! Every read of a view takes a ticket carrying a per-view sequence number.
//! A completed read is applied only if its sequence is newer than both the
//! last applied read and the cancellation floor raised by
//! [`ReadCache::cancel_outstanding`]. A response that lost the race against
//! an optimistic write is therefore dropped instead of clobbering it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use autosave_primitives::ViewKey;
use autosave_worker::{TaskClass, spawn};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::FetchError;
use crate::ports::{ReadCache, ViewFetcher};

/// Proof that a read of `key` was started, used to complete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadTicket {
	pub key: ViewKey,
	pub seq: u64,
}

/// Whether a completed read reached the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
	Applied,
	/// Superseded by a newer read or cancelled by a write.
	Discarded,
}

#[derive(Debug, Default)]
struct ViewSlot {
	value: Option<Value>,
	/// Highest sequence handed out.
	issued: u64,
	/// Reads at or below this sequence were cancelled.
	floor: u64,
	/// Sequence of the read that produced `value`.
	applied: u64,
	stale: bool,
	refetch: Option<(u64, CancellationToken)>,
}

struct Shared {
	views: Mutex<HashMap<ViewKey, ViewSlot>>,
	fetcher: Option<Arc<dyn ViewFetcher>>,
	discarded: AtomicU64,
}

/// Cheaply clonable in-memory view cache.
#[derive(Clone)]
pub struct MemoryCache {
	shared: Arc<Shared>,
}

impl Default for MemoryCache {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for MemoryCache {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryCache")
			.field("views", &self.shared.views.lock().len())
			.field("fetcher", &self.shared.fetcher.is_some())
			.finish()
	}
}

impl MemoryCache {
	/// Creates a cache without a fetcher; invalidation only marks views stale.
	pub fn new() -> Self {
		Self::build(None)
	}

	/// Creates a cache that refetches invalidated views through `fetcher`.
	pub fn with_fetcher(fetcher: Arc<dyn ViewFetcher>) -> Self {
		Self::build(Some(fetcher))
	}

	fn build(fetcher: Option<Arc<dyn ViewFetcher>>) -> Self {
		Self {
			shared: Arc::new(Shared {
				views: Mutex::new(HashMap::new()),
				fetcher,
				discarded: AtomicU64::new(0),
			}),
		}
	}

	/// Seeds a server-confirmed value, superseding any read in flight.
	pub fn insert(&self, key: impl Into<ViewKey>, value: Value) {
		let mut views = self.shared.views.lock();
		let slot = views.entry(key.into()).or_default();
		slot.issued += 1;
		slot.applied = slot.issued;
		slot.value = Some(value);
		slot.stale = false;
	}

	/// Starts a read of `key`.
	pub fn begin_read(&self, key: &ViewKey) -> ReadTicket {
		let mut views = self.shared.views.lock();
		let slot = views.entry(key.clone()).or_default();
		slot.issued += 1;
		ReadTicket {
			key: key.clone(),
			seq: slot.issued,
		}
	}

	/// Completes a read started with [`Self::begin_read`].
	pub fn complete_read(&self, ticket: ReadTicket, value: Value) -> ReadOutcome {
		let mut views = self.shared.views.lock();
		let slot = views.entry(ticket.key.clone()).or_default();
		if ticket.seq <= slot.floor || ticket.seq <= slot.applied {
			self.shared.discarded.fetch_add(1, Ordering::Relaxed);
			debug!(
				key = %ticket.key,
				seq = ticket.seq,
				floor = slot.floor,
				applied = slot.applied,
				"autosave.cache.read_discarded"
			);
			return ReadOutcome::Discarded;
		}
		slot.applied = ticket.seq;
		slot.value = Some(value);
		slot.stale = false;
		trace!(key = %ticket.key, seq = ticket.seq, "autosave.cache.read_applied");
		ReadOutcome::Applied
	}

	/// Reads `key` through the fetcher and applies the result if still current.
	pub async fn refresh(&self, key: &ViewKey) -> Result<ReadOutcome, FetchError> {
		let Some(fetcher) = self.shared.fetcher.clone() else {
			return Err(FetchError::NotFound(key.clone()));
		};
		let ticket = self.begin_read(key);
		let value = fetcher.fetch(key).await?;
		Ok(self.complete_read(ticket, value))
	}

	pub fn is_stale(&self, key: &ViewKey) -> bool {
		self.shared.views.lock().get(key).is_some_and(|slot| slot.stale)
	}

	/// Whether a background refetch of `key` is running.
	pub fn is_refetching(&self, key: &ViewKey) -> bool {
		self.shared.views.lock().get(key).is_some_and(|slot| slot.refetch.is_some())
	}

	/// Number of read responses dropped as stale so far.
	pub fn discarded_reads(&self) -> u64 {
		self.shared.discarded.load(Ordering::Relaxed)
	}

	fn spawn_refetch(&self, key: ViewKey, fetcher: Arc<dyn ViewFetcher>) {
		let cancel = CancellationToken::new();
		let ticket = {
			let mut views = self.shared.views.lock();
			let slot = views.entry(key.clone()).or_default();
			slot.issued += 1;
			if let Some((_, previous)) = slot.refetch.replace((slot.issued, cancel.clone())) {
				previous.cancel();
			}
			ReadTicket {
				key: key.clone(),
				seq: slot.issued,
			}
		};

		let cache = self.clone();
		spawn(TaskClass::Refetch, async move {
			let result = tokio::select! {
				_ = cancel.cancelled() => None,
				result = fetcher.fetch(&key) => Some(result),
			};

			match result {
				Some(Ok(value)) => {
					cache.complete_read(ticket.clone(), value);
				}
				Some(Err(err)) => warn!(key = %key, error = %err, "autosave.cache.refetch_failed"),
				None => trace!(key = %key, seq = ticket.seq, "autosave.cache.refetch_cancelled"),
			}

			let mut views = cache.shared.views.lock();
			if let Some(slot) = views.get_mut(&key)
				&& slot.refetch.as_ref().is_some_and(|(seq, _)| *seq == ticket.seq)
			{
				slot.refetch = None;
			}
		});
	}
}

impl ReadCache for MemoryCache {
	fn get_view(&self, key: &ViewKey) -> Option<Value> {
		self.shared.views.lock().get(key).and_then(|slot| slot.value.clone())
	}

	fn set_view(&self, key: &ViewKey, value: Value) {
		self.shared.views.lock().entry(key.clone()).or_default().value = Some(value);
	}

	fn cancel_outstanding(&self, keys: &[ViewKey]) {
		let mut views = self.shared.views.lock();
		for key in keys {
			let Some(slot) = views.get_mut(key) else {
				continue;
			};
			slot.floor = slot.issued;
			if let Some((seq, token)) = slot.refetch.take() {
				token.cancel();
				debug!(key = %key, seq, "autosave.cache.refetch_cancelled");
			}
		}
	}

	fn invalidate(&self, keys: &[ViewKey]) {
		{
			let mut views = self.shared.views.lock();
			for key in keys {
				views.entry(key.clone()).or_default().stale = true;
			}
		}
		debug!(count = keys.len(), "autosave.cache.invalidate");

		if let Some(fetcher) = &self.shared.fetcher {
			for key in keys {
				self.spawn_refetch(key.clone(), Arc::clone(fetcher));
			}
		}
	}
}
