//! Optimistic apply, rollback and reconcile over a [`ReadCache`].
//!
//! Before a write is dispatched, every cache entry showing the entity is
//! snapshotted and then patched in place. Entries are addressed by
//! [`ViewTarget`]: a detail view is snapshotted whole, a list view only at the
//! entity's row, so writes to different entities sharing a list never restore
//! each other's rows.
//!
//! Snapshots are keyed by entity and request id and live until the write
//! settles: [`CacheMirror::rollback`] restores them exactly,
//! [`CacheMirror::reconcile`] drops them after writing the server value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use autosave_primitives::{EntityId, ItemLocator, Patch, ViewKey, ViewTarget};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::ports::ReadCache;

#[derive(Debug)]
struct TouchedEntry {
	target: ViewTarget,
	before: Value,
}

#[derive(Debug)]
struct Snapshot {
	request_id: u64,
	entries: Vec<TouchedEntry>,
}

/// Process-wide optimistic layer over a shared read cache.
pub struct CacheMirror {
	cache: Arc<dyn ReadCache>,
	snapshots: Mutex<HashMap<EntityId, Snapshot>>,
}

impl fmt::Debug for CacheMirror {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CacheMirror")
			.field("snapshots", &self.snapshots.lock().len())
			.finish()
	}
}

impl CacheMirror {
	pub fn new(cache: Arc<dyn ReadCache>) -> Self {
		Self {
			cache,
			snapshots: Mutex::new(HashMap::new()),
		}
	}

	pub fn read_cache(&self) -> &Arc<dyn ReadCache> {
		&self.cache
	}

	/// Cancels outstanding reads for every view in `targets`.
	pub fn cancel_reads(&self, targets: &[ViewTarget]) {
		let mut keys: Vec<ViewKey> = targets.iter().map(|t| t.key.clone()).collect();
		keys.sort();
		keys.dedup();
		self.cache.cancel_outstanding(&keys);
	}

	/// Snapshots and patches every entry of `entity` found in `targets`.
	///
	/// Targets whose view is not cached, or that do not contain the entity,
	/// are skipped. Returns the number of entries touched.
	pub fn apply_optimistic(&self, entity: &EntityId, request_id: u64, targets: &[ViewTarget], patch: &Patch) -> usize {
		let mut entries = Vec::with_capacity(targets.len());

		for target in targets {
			let Some(mut view) = self.cache.get_view(&target.key) else {
				continue;
			};
			let Some(entry) = target.locate_mut(&mut view, entity) else {
				debug!(entity = %entity, key = %target.key, "autosave.cache.entry_missing");
				continue;
			};
			let before = entry.clone();
			// Rows are found by their id field, so it must survive the patch.
			let applied = match &target.locator {
				ItemLocator::ListItem { id_field, .. } if patch.contains(id_field) => patch.without(id_field).apply_to(entry),
				_ => patch.apply_to(entry),
			};
			if !applied {
				warn!(entity = %entity, key = %target.key, "autosave.cache.entry_not_object");
				continue;
			}
			self.cache.set_view(&target.key, view);
			entries.push(TouchedEntry {
				target: target.clone(),
				before,
			});
		}

		let touched = entries.len();
		let previous = self.snapshots.lock().insert(entity.clone(), Snapshot { request_id, entries });
		if let Some(previous) = previous {
			warn!(
				entity = %entity,
				request_id,
				previous_request_id = previous.request_id,
				"autosave.cache.snapshot_replaced"
			);
		}
		debug!(entity = %entity, request_id, touched, fields = patch.len(), "autosave.cache.optimistic_apply");
		touched
	}

	/// Restores every entry touched by `request_id` to its snapshot.
	///
	/// Returns the number of entries restored.
	pub fn rollback(&self, entity: &EntityId, request_id: u64) -> usize {
		let Some(snapshot) = self.take(entity, request_id) else {
			return 0;
		};

		let mut restored = 0;
		for TouchedEntry { target, before } in snapshot.entries.into_iter().rev() {
			let Some(mut view) = self.cache.get_view(&target.key) else {
				debug!(entity = %entity, key = %target.key, "autosave.cache.rollback_view_gone");
				continue;
			};
			let Some(entry) = target.locate_mut(&mut view, entity) else {
				debug!(entity = %entity, key = %target.key, "autosave.cache.rollback_entry_gone");
				continue;
			};
			*entry = before;
			self.cache.set_view(&target.key, view);
			restored += 1;
		}

		debug!(entity = %entity, request_id, restored, "autosave.cache.rollback");
		restored
	}

	/// Writes the server-confirmed value into every entry touched by
	/// `request_id` and drops the snapshot.
	///
	/// Detail entries are replaced; list rows take the server value only for
	/// the fields they already carry.
	pub fn reconcile(&self, entity: &EntityId, request_id: u64, server: &Value) -> usize {
		let Some(snapshot) = self.take(entity, request_id) else {
			return 0;
		};

		let projection = Patch::from_value(server.clone()).ok();
		let mut updated = 0;
		for TouchedEntry { target, .. } in snapshot.entries {
			if target.is_detail() {
				self.cache.set_view(&target.key, server.clone());
				updated += 1;
				continue;
			}
			let Some(projection) = &projection else {
				continue;
			};
			let Some(mut view) = self.cache.get_view(&target.key) else {
				continue;
			};
			if let Some(row) = target.locate_mut(&mut view, entity)
				&& projection.apply_projected(row)
			{
				self.cache.set_view(&target.key, view);
				updated += 1;
			}
		}

		debug!(entity = %entity, request_id, updated, "autosave.cache.reconcile");
		updated
	}

	/// Marks `keys` for background refetch.
	pub fn invalidate(&self, keys: &[ViewKey]) {
		if !keys.is_empty() {
			self.cache.invalidate(keys);
		}
	}

	/// Pre-apply value of `target` while a write for `entity` is unsettled.
	///
	/// `None` when no snapshot covers the target.
	pub fn confirmed_value(&self, entity: &EntityId, target: &ViewTarget) -> Option<Value> {
		let snapshots = self.snapshots.lock();
		let entry = snapshots.get(entity)?.entries.iter().find(|entry| entry.target == *target)?;
		if target.is_detail() {
			return Some(entry.before.clone());
		}
		let mut view = self.cache.get_view(&target.key)?;
		*target.locate_mut(&mut view, entity)? = entry.before.clone();
		Some(view)
	}

	/// Whether a snapshot is held for `entity`, i.e. a write has not settled.
	pub fn has_snapshot(&self, entity: &EntityId) -> bool {
		self.snapshots.lock().contains_key(entity)
	}

	fn take(&self, entity: &EntityId, request_id: u64) -> Option<Snapshot> {
		let mut snapshots = self.snapshots.lock();
		match snapshots.get(entity) {
			Some(snapshot) if snapshot.request_id == request_id => snapshots.remove(entity),
			Some(snapshot) => {
				warn!(
					entity = %entity,
					request_id,
					held_request_id = snapshot.request_id,
					"autosave.cache.snapshot_mismatch"
				);
				None
			}
			None => None,
		}
	}
}
