//! Runtime counters for write coordination.
//!
//! All counters use relaxed ordering; they feed debug displays and traces,
//! not control flow.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
	/// Writes dispatched to the executor.
	pub writes_started: AtomicU64,
	/// Writes confirmed by the server.
	pub writes_succeeded: AtomicU64,
	/// Writes that failed and were rolled back.
	pub writes_failed: AtomicU64,
	/// Cache entries restored by rollbacks.
	pub entries_rolled_back: AtomicU64,
	/// Follow-up writes dispatched right after a settle.
	pub trailing_flushes: AtomicU64,
	/// Field edits that overwrote a still-pending value.
	pub coalesced_edits: AtomicU64,
	/// Sessions closed with unsaved edits.
	pub discarded_sessions: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
	pub writes_started: u64,
	pub writes_succeeded: u64,
	pub writes_failed: u64,
	pub entries_rolled_back: u64,
	pub trailing_flushes: u64,
	pub coalesced_edits: u64,
	pub discarded_sessions: u64,
}

impl CoordinatorMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn inc_write_started(&self) {
		self.writes_started.fetch_add(1, Ordering::Relaxed);
	}

	pub fn inc_write_succeeded(&self) {
		self.writes_succeeded.fetch_add(1, Ordering::Relaxed);
	}

	pub fn inc_write_failed(&self) {
		self.writes_failed.fetch_add(1, Ordering::Relaxed);
	}

	pub fn add_rolled_back(&self, entries: u64) {
		self.entries_rolled_back.fetch_add(entries, Ordering::Relaxed);
	}

	pub fn inc_trailing_flush(&self) {
		self.trailing_flushes.fetch_add(1, Ordering::Relaxed);
	}

	pub fn add_coalesced(&self, count: u64) {
		self.coalesced_edits.fetch_add(count, Ordering::Relaxed);
	}

	pub fn inc_discarded_session(&self) {
		self.discarded_sessions.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			writes_started: self.writes_started.load(Ordering::Relaxed),
			writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
			writes_failed: self.writes_failed.load(Ordering::Relaxed),
			entries_rolled_back: self.entries_rolled_back.load(Ordering::Relaxed),
			trailing_flushes: self.trailing_flushes.load(Ordering::Relaxed),
			coalesced_edits: self.coalesced_edits.load(Ordering::Relaxed),
			discarded_sessions: self.discarded_sessions.load(Ordering::Relaxed),
		}
	}
}
