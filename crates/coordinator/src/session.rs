//! Edit sessions: per-entity pending state and the handle a detail view holds.

use std::fmt;

use autosave_primitives::{EntityId, Patch, SaveStatus, SaveStatusMachine, StatusEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::coordinator::{CommitResult, Coordinator};
use crate::error::WriteFailure;
use crate::kind::EntityKind;

/// Read-only picture of a session for UI consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
	pub entity_id: EntityId,
	pub status: SaveStatus,
	/// Present only while `status` is [`SaveStatus::Error`].
	pub last_error: Option<WriteFailure>,
	pub pending_field_count: usize,
	pub last_saved_at: Option<DateTime<Utc>>,
	/// Last server-confirmed value.
	pub canonical: Value,
	pub pending: Patch,
}

impl SessionView {
	/// The canonical value with pending edits laid over it.
	pub fn draft(&self) -> Value {
		let mut draft = self.canonical.clone();
		self.pending.apply_to(&mut draft);
		draft
	}
}

/// Mutable state of one open session, owned by the coordinator registry.
pub(crate) struct SessionState {
	pub(crate) entity_id: EntityId,
	pub(crate) generation: u64,
	pub(crate) canonical: Value,
	pub(crate) pending: Patch,
	pub(crate) status: SaveStatusMachine,
	pub(crate) last_error: Option<WriteFailure>,
	pub(crate) last_saved_at: Option<DateTime<Utc>>,
	publisher: watch::Sender<SessionView>,
}

impl SessionState {
	pub(crate) fn new(entity_id: EntityId, generation: u64, canonical: Value) -> (Self, watch::Receiver<SessionView>) {
		let initial = SessionView {
			entity_id: entity_id.clone(),
			status: SaveStatus::Pristine,
			last_error: None,
			pending_field_count: 0,
			last_saved_at: None,
			canonical: canonical.clone(),
			pending: Patch::new(),
		};
		let (publisher, view) = watch::channel(initial);
		let state = Self {
			entity_id,
			generation,
			canonical,
			pending: Patch::new(),
			status: SaveStatusMachine::new(),
			last_error: None,
			last_saved_at: None,
			publisher,
		};
		(state, view)
	}

	pub(crate) fn view(&self) -> SessionView {
		SessionView {
			entity_id: self.entity_id.clone(),
			status: self.status.state(),
			last_error: self.last_error.clone(),
			pending_field_count: self.pending.len(),
			last_saved_at: self.last_saved_at,
			canonical: self.canonical.clone(),
			pending: self.pending.clone(),
		}
	}

	pub(crate) fn publish(&self) {
		self.publisher.send_replace(self.view());
	}

	/// Feeds the status machine; the error detail never outlives the error state.
	pub(crate) fn transition(&mut self, event: StatusEvent) -> Option<SaveStatus> {
		let next = self.status.apply(event);
		if self.status.state() != SaveStatus::Error {
			self.last_error = None;
		}
		next
	}

	/// Merges field updates. Returns how many pending fields were overwritten.
	pub(crate) fn record_edit(&mut self, updates: Patch) -> usize {
		let coalesced = self.pending.merge_from(updates);
		self.transition(StatusEvent::Edit);
		coalesced
	}

	/// Applies a confirmed write.
	pub(crate) fn confirm(&mut self, dispatched: &Patch, server: Value) {
		self.pending.settle(dispatched);
		self.canonical = server;
		self.last_saved_at = Some(Utc::now());
		let patch_empty = self.pending.is_empty();
		self.transition(StatusEvent::WriteSucceeded { patch_empty });
	}

	/// Takes a value confirmed by a write this session did not dispatch.
	///
	/// Pending edits and status are untouched.
	pub(crate) fn adopt(&mut self, server: Value) {
		self.canonical = server;
	}

	/// Records a failed write; pending edits are kept for a retry.
	pub(crate) fn fail(&mut self, failure: WriteFailure) {
		self.transition(StatusEvent::WriteFailed);
		self.last_error = Some(failure);
	}
}

/// Handle held by a mounted detail view.
///
/// Dropping the handle closes the session: the debounce timer is cancelled
/// and unflushed edits are discarded. A write already in flight still runs to
/// completion and settles the shared cache.
pub struct SessionHandle<K: EntityKind> {
	coordinator: Coordinator<K>,
	entity_id: EntityId,
	generation: u64,
	view: watch::Receiver<SessionView>,
}

impl<K: EntityKind> fmt::Debug for SessionHandle<K> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionHandle")
			.field("entity_id", &self.entity_id)
			.field("generation", &self.generation)
			.field("status", &self.status())
			.finish()
	}
}

impl<K: EntityKind> SessionHandle<K> {
	pub(crate) fn new(coordinator: Coordinator<K>, entity_id: EntityId, generation: u64, view: watch::Receiver<SessionView>) -> Self {
		Self {
			coordinator,
			entity_id,
			generation,
			view,
		}
	}

	pub fn entity_id(&self) -> &EntityId {
		&self.entity_id
	}

	/// Merges field updates into the pending patch and (re)starts the
	/// debounce timer. Empty updates are ignored.
	///
	/// Callable from threads without a tokio runtime; timers and writes then
	/// run on a shared background runtime.
	pub fn edit(&self, updates: Patch) {
		self.coordinator.edit(&self.entity_id, self.generation, updates);
	}

	pub fn edit_field(&self, field: impl Into<String>, value: impl Into<Value>) {
		self.edit(Patch::new().with(field, value));
	}

	/// Writes pending edits now, bypassing the debounce timer.
	///
	/// If a write is already in flight the request is queued and resolves
	/// with the follow-up write's result.
	pub async fn save_now(&self) -> CommitResult {
		self.coordinator.save_now(&self.entity_id, self.generation).await
	}

	pub fn view(&self) -> SessionView {
		self.view.borrow().clone()
	}

	pub fn status(&self) -> SaveStatus {
		self.view.borrow().status
	}

	pub fn last_error(&self) -> Option<WriteFailure> {
		self.view.borrow().last_error.clone()
	}

	pub fn pending_field_count(&self) -> usize {
		self.view.borrow().pending_field_count
	}

	/// Receiver notified on every status or pending-patch change.
	pub fn subscribe(&self) -> watch::Receiver<SessionView> {
		self.view.clone()
	}
}

impl<K: EntityKind> Drop for SessionHandle<K> {
	fn drop(&mut self) {
		self.coordinator.close(&self.entity_id, self.generation);
	}
}
