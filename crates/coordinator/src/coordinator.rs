//! Write coordination: debounced, single-flight, optimistic persistence.
//!
//! [`Coordinator`] owns every open [`SessionState`] for one entity kind and a
//! per-entity ledger that outlives sessions. The ledger holds the request id
//! counter and the in-flight record, so at most one write per entity is ever
//! in flight, even across a close and reopen of its session.
//!
//! # Write path
//!
//! 1. Capture a copy of the pending patch and move the session to `saving`.
//! 2. Cancel outstanding reads of every view showing the entity.
//! 3. Snapshot those entries and apply the patch to them.
//! 4. Send the patch. On success reconcile the cache with the server value,
//!    drop the dispatched fields from the pending patch and go to `saved`
//!    (or back to `pending` if edits arrived meanwhile). On failure roll the
//!    cache back, keep the pending patch and go to `error`.
//! 5. Invalidate derived views either way.
//!
//! # Queued commits
//!
//! A commit requested while a write is in flight is queued on the in-flight
//! record. When the write settles successfully and edits are still pending,
//! the follow-up write is dispatched immediately and queued callers receive
//! its result. Without a queued request, leftover edits return the session to
//! `pending` and restart the debounce timer. Failures are never retried
//! automatically.
//!
//! Writes run on spawned tasks, so neither a dropped caller nor a closed
//! session aborts a dispatched write.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use autosave_primitives::{EntityId, Patch, StatusEvent};
use autosave_worker::{DebounceScheduler, TaskClass, spawn};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::cache::CacheMirror;
use crate::config::{AutosaveConfig, KindSettings};
use crate::error::{CoordinatorError, WriteFailure};
use crate::kind::EntityKind;
use crate::metrics::{CoordinatorMetrics, MetricsSnapshot};
use crate::ports::{ReadCache, WriteExecutor};
use crate::session::{SessionHandle, SessionState, SessionView};

/// Outcome of a commit request.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitResult {
	/// The server confirmed the write and returned `value`.
	Saved { request_id: u64, value: Value },
	/// The write failed and the cache was rolled back.
	Failed(WriteFailure),
	/// The pending patch was empty; no request was sent.
	NothingToSave,
	/// The session closed before the commit could start.
	SessionClosed,
}

impl CommitResult {
	pub fn is_saved(&self) -> bool {
		matches!(self, Self::Saved { .. })
	}
}

/// A write captured at dispatch time.
#[derive(Debug, Clone)]
pub struct WriteRequest {
	pub entity_id: EntityId,
	/// Copy of the pending patch when the write was dispatched.
	pub patch: Patch,
	/// Monotonically increasing per entity.
	pub request_id: u64,
	pub started_at: Instant,
	session_generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
	Debounce,
	Manual,
	/// Follow-up dispatched right after the previous write settled.
	Trailing,
}

impl Trigger {
	const fn event(self) -> StatusEvent {
		match self {
			Self::Debounce => StatusEvent::DebounceFired,
			Self::Manual | Self::Trailing => StatusEvent::ManualSave,
		}
	}

	const fn as_str(self) -> &'static str {
		match self {
			Self::Debounce => "debounce",
			Self::Manual => "manual",
			Self::Trailing => "trailing",
		}
	}
}

type Waiter = oneshot::Sender<CommitResult>;

struct InFlight {
	request_id: u64,
	patch: Patch,
	queued: Vec<Waiter>,
	follow_up: bool,
}

#[derive(Default)]
struct EntityLedger {
	last_request_id: u64,
	in_flight: Option<InFlight>,
}

#[derive(Default)]
struct Registry {
	sessions: HashMap<EntityId, SessionState>,
	ledgers: HashMap<EntityId, EntityLedger>,
	next_generation: u64,
}

enum Begin {
	Dispatch(WriteRequest),
	Queued,
	Idle(CommitResult),
}

struct Settled {
	outcome: CommitResult,
	queued: Vec<Waiter>,
	trailing: bool,
}

struct Inner<K: EntityKind> {
	this: Weak<Inner<K>>,
	kind: K,
	settings: KindSettings,
	mirror: CacheMirror,
	executor: Arc<dyn WriteExecutor>,
	registry: Mutex<Registry>,
	debounce: DebounceScheduler<EntityId>,
	metrics: CoordinatorMetrics,
}

/// Autosave coordinator for one entity kind. Cheap to clone.
pub struct Coordinator<K: EntityKind> {
	inner: Arc<Inner<K>>,
}

impl<K: EntityKind> Clone for Coordinator<K> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<K: EntityKind> fmt::Debug for Coordinator<K> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let registry = self.inner.registry.lock();
		f.debug_struct("Coordinator")
			.field("kind", &self.inner.kind.name())
			.field("sessions", &registry.sessions.len())
			.field(
				"in_flight",
				&registry.ledgers.values().filter(|l| l.in_flight.is_some()).count(),
			)
			.finish()
	}
}

impl<K: EntityKind> Coordinator<K> {
	pub fn new(kind: K, config: &AutosaveConfig, cache: Arc<dyn ReadCache>, executor: Arc<dyn WriteExecutor>) -> Self {
		let settings = config.for_kind(kind.name());
		debug!(
			kind = kind.name(),
			debounce_ms = settings.debounce.as_millis() as u64,
			autosave = settings.autosave,
			"autosave.coordinator.new"
		);
		let inner = Arc::new_cyclic(|this| Inner {
			this: this.clone(),
			kind,
			settings,
			mirror: CacheMirror::new(cache),
			executor,
			registry: Mutex::new(Registry::default()),
			debounce: DebounceScheduler::new(),
			metrics: CoordinatorMetrics::new(),
		});
		Self { inner }
	}

	pub fn kind(&self) -> &K {
		&self.inner.kind
	}

	pub fn settings(&self) -> KindSettings {
		self.inner.settings
	}

	pub fn mirror(&self) -> &CacheMirror {
		&self.inner.mirror
	}

	pub fn metrics(&self) -> MetricsSnapshot {
		self.inner.metrics.snapshot()
	}

	/// Opens an edit session with `canonical` as the loaded value.
	pub fn open(&self, id: impl Into<EntityId>, canonical: Value) -> Result<SessionHandle<K>, CoordinatorError> {
		let id = id.into();
		let (generation, view) = {
			let mut registry = self.inner.registry.lock();
			if registry.sessions.contains_key(&id) {
				return Err(CoordinatorError::SessionAlreadyOpen(id));
			}
			registry.next_generation += 1;
			let generation = registry.next_generation;
			let (session, view) = SessionState::new(id.clone(), generation, canonical);
			registry.sessions.insert(id.clone(), session);
			(generation, view)
		};
		debug!(kind = self.inner.kind.name(), entity = %id, generation, "autosave.session.open");
		Ok(SessionHandle::new(self.clone(), id, generation, view))
	}

	/// Opens a session using the entity's cached detail view as canonical.
	pub fn open_cached(&self, id: impl Into<EntityId>) -> Result<SessionHandle<K>, CoordinatorError> {
		let id = id.into();
		let target = self.inner.kind.detail_view(&id);
		// While a write is in flight the cached view holds its optimistic patch.
		let canonical = self
			.inner
			.mirror
			.confirmed_value(&id, &target)
			.or_else(|| self.inner.mirror.read_cache().get_view(&target.key));
		let Some(canonical) = canonical else {
			return Err(CoordinatorError::NotCached(target.key));
		};
		self.open(id, canonical)
	}

	pub fn session_view(&self, id: &EntityId) -> Option<SessionView> {
		self.inner.registry.lock().sessions.get(id).map(SessionState::view)
	}

	/// Request id of the write in flight for `id`, if any.
	pub fn in_flight(&self, id: &EntityId) -> Option<u64> {
		self.inner
			.registry
			.lock()
			.ledgers
			.get(id)
			.and_then(|ledger| ledger.in_flight.as_ref())
			.map(|flight| flight.request_id)
	}

	pub fn is_debouncing(&self, id: &EntityId) -> bool {
		self.inner.debounce.is_scheduled(id)
	}

	/// Fires every armed debounce timer now, e.g. before navigating away.
	///
	/// Returns how many commits were started. Must be called within a tokio
	/// runtime.
	pub fn flush_pending(&self) -> usize {
		let fired = self.inner.debounce.fire_all_now();
		if fired > 0 {
			debug!(kind = self.inner.kind.name(), fired, "autosave.coordinator.flush_pending");
		}
		fired
	}

	pub(crate) fn edit(&self, id: &EntityId, generation: u64, updates: Patch) {
		if updates.is_empty() {
			return;
		}
		let inner = &self.inner;
		let mut registry = inner.registry.lock();
		let Some(session) = registry.sessions.get_mut(id).filter(|s| s.generation == generation) else {
			return;
		};

		let fields = updates.len();
		let coalesced = session.record_edit(updates);
		inner.metrics.add_coalesced(coalesced as u64);
		trace!(
			entity = %id,
			fields,
			coalesced,
			pending = session.pending.len(),
			status = session.status.state().as_str(),
			"autosave.session.edit"
		);

		if inner.settings.autosave && session.status.allows_timer() {
			inner.arm_timer(id);
		}
		session.publish();
	}

	pub(crate) async fn save_now(&self, id: &EntityId, generation: u64) -> CommitResult {
		let open = self
			.inner
			.registry
			.lock()
			.sessions
			.get(id)
			.is_some_and(|s| s.generation == generation);
		if !open {
			return CommitResult::SessionClosed;
		}

		self.inner.debounce.cancel(id);
		let (tx, rx) = oneshot::channel();
		let inner = Arc::clone(&self.inner);
		spawn(TaskClass::Write, inner.run_commit(id.clone(), Trigger::Manual, vec![tx]));
		rx.await.unwrap_or(CommitResult::Failed(WriteFailure::ExecutorStopped))
	}

	pub(crate) fn close(&self, id: &EntityId, generation: u64) {
		let (session, in_flight) = {
			let mut registry = self.inner.registry.lock();
			if !registry.sessions.get(id).is_some_and(|s| s.generation == generation) {
				return;
			}
			let in_flight = registry
				.ledgers
				.get(id)
				.and_then(|ledger| ledger.in_flight.as_ref())
				.map(|flight| flight.patch.clone());
			(registry.sessions.remove(id), in_flight)
		};
		let Some(session) = session else {
			return;
		};
		self.inner.debounce.cancel(id);

		let mut unsaved = session.pending.clone();
		if let Some(dispatched) = &in_flight {
			unsaved.settle(dispatched);
		}
		if !unsaved.is_empty() {
			self.inner.metrics.inc_discarded_session();
			warn!(
				entity = %id,
				fields = unsaved.len(),
				status = session.status.state().as_str(),
				"autosave.session.discarded_edits"
			);
		}
		debug!(entity = %id, generation, write_in_flight = in_flight.is_some(), "autosave.session.close");
	}
}

impl<K: EntityKind> Inner<K> {
	fn arm_timer(&self, id: &EntityId) {
		let this = self.this.clone();
		let entity = id.clone();
		self.debounce.schedule(id.clone(), self.settings.debounce, move || {
			if let Some(inner) = this.upgrade() {
				spawn(TaskClass::Write, inner.run_commit(entity, Trigger::Debounce, Vec::new()));
			}
		});
	}

	async fn run_commit(self: Arc<Self>, id: EntityId, mut trigger: Trigger, mut waiters: Vec<Waiter>) {
		loop {
			let request = match self.begin(&id, trigger, &mut waiters) {
				Begin::Dispatch(request) => request,
				Begin::Queued => return,
				Begin::Idle(result) => {
					notify(waiters, &result);
					return;
				}
			};

			let targets = self.kind.optimistic_targets(&id);
			self.mirror.cancel_reads(&targets);
			let touched = self.mirror.apply_optimistic(&id, request.request_id, &targets, &request.patch);
			self.metrics.inc_write_started();
			debug!(
				kind = self.kind.name(),
				entity = %id,
				request_id = request.request_id,
				fields = request.patch.len(),
				touched,
				trigger = trigger.as_str(),
				"autosave.coordinator.write_start"
			);

			let result = self.dispatch(&request).await;
			let settled = self.settle(&request, result);

			if self.settings.reconcile_derived {
				self.mirror.invalidate(&self.kind.derived_views(&id));
			}

			notify(std::mem::take(&mut waiters), &settled.outcome);
			if !settled.trailing {
				notify(settled.queued, &settled.outcome);
				return;
			}
			self.metrics.inc_trailing_flush();
			waiters = settled.queued;
			trigger = Trigger::Trailing;
		}
	}

	/// Claims the entity's single flight slot, or queues behind the holder.
	fn begin(&self, id: &EntityId, trigger: Trigger, waiters: &mut Vec<Waiter>) -> Begin {
		let mut registry = self.registry.lock();
		let Registry { sessions, ledgers, .. } = &mut *registry;
		let ledger = ledgers.entry(id.clone()).or_default();

		if let Some(flight) = ledger.in_flight.as_mut() {
			flight.queued.append(waiters);
			flight.follow_up = true;
			debug!(
				entity = %id,
				in_flight = flight.request_id,
				trigger = trigger.as_str(),
				"autosave.coordinator.commit_queued"
			);
			return Begin::Queued;
		}

		let Some(session) = sessions.get_mut(id) else {
			return Begin::Idle(CommitResult::SessionClosed);
		};
		if session.pending.is_empty() {
			trace!(entity = %id, trigger = trigger.as_str(), "autosave.coordinator.nothing_to_save");
			return Begin::Idle(CommitResult::NothingToSave);
		}
		if session.transition(trigger.event()).is_none() {
			debug!(
				entity = %id,
				trigger = trigger.as_str(),
				status = session.status.state().as_str(),
				"autosave.coordinator.commit_ignored"
			);
			return Begin::Idle(CommitResult::NothingToSave);
		}
		self.debounce.cancel(id);

		ledger.last_request_id += 1;
		let request = WriteRequest {
			entity_id: id.clone(),
			patch: session.pending.clone(),
			request_id: ledger.last_request_id,
			started_at: Instant::now(),
			session_generation: session.generation,
		};
		ledger.in_flight = Some(InFlight {
			request_id: request.request_id,
			patch: request.patch.clone(),
			queued: Vec::new(),
			follow_up: false,
		});
		session.publish();
		Begin::Dispatch(request)
	}

	/// Runs the executor on its own task so a panicking executor surfaces as
	/// a failure instead of leaving the flight slot claimed.
	async fn dispatch(&self, request: &WriteRequest) -> Result<Value, WriteFailure> {
		let executor = Arc::clone(&self.executor);
		let entity = request.entity_id.clone();
		let patch = request.patch.clone();
		match spawn(TaskClass::Write, async move { executor.send(&entity, &patch).await }).await {
			Ok(result) => result,
			Err(err) => {
				warn!(entity = %request.entity_id, request_id = request.request_id, error = %err, "autosave.coordinator.executor_panicked");
				Err(WriteFailure::ExecutorStopped)
			}
		}
	}

	/// Settles the cache and the session, releasing the flight slot.
	fn settle(&self, request: &WriteRequest, result: Result<Value, WriteFailure>) -> Settled {
		let id = &request.entity_id;
		let latency_ms = request.started_at.elapsed().as_millis() as u64;

		match &result {
			Ok(server) => {
				self.mirror.reconcile(id, request.request_id, server);
				self.metrics.inc_write_succeeded();
				debug!(entity = %id, request_id = request.request_id, latency_ms, "autosave.coordinator.write_done");
			}
			Err(err) => {
				let restored = self.mirror.rollback(id, request.request_id);
				self.metrics.inc_write_failed();
				self.metrics.add_rolled_back(restored as u64);
				warn!(
					entity = %id,
					request_id = request.request_id,
					latency_ms,
					restored,
					error = %err,
					"autosave.coordinator.write_failed"
				);
			}
		}

		let mut registry = self.registry.lock();
		let Registry { sessions, ledgers, .. } = &mut *registry;
		let (queued, follow_up) = ledgers
			.get_mut(id)
			.and_then(|ledger| ledger.in_flight.take())
			.map(|flight| (flight.queued, flight.follow_up))
			.unwrap_or_default();

		let outcome = match result {
			Ok(value) => CommitResult::Saved {
				request_id: request.request_id,
				value,
			},
			Err(err) => CommitResult::Failed(err),
		};

		let mut trailing = false;
		if let Some(session) = sessions.get_mut(id) {
			let owned = session.generation == request.session_generation;
			match &outcome {
				CommitResult::Saved { value, .. } if owned => session.confirm(&request.patch, value.clone()),
				CommitResult::Saved { value, .. } => session.adopt(value.clone()),
				CommitResult::Failed(err) if owned => session.fail(err.clone()),
				_ => {}
			}

			let failed_here = owned && !outcome.is_saved();
			if !failed_here && !session.pending.is_empty() && session.status.allows_timer() {
				if follow_up {
					trailing = true;
				} else if self.settings.autosave && !self.debounce.is_scheduled(id) {
					self.arm_timer(id);
				}
			}
			debug!(
				entity = %id,
				request_id = request.request_id,
				status = session.status.state().as_str(),
				pending = session.pending.len(),
				trailing,
				"autosave.coordinator.settled"
			);
			session.publish();
		}

		Settled {
			outcome,
			queued,
			trailing,
		}
	}
}

fn notify(waiters: Vec<Waiter>, result: &CommitResult) {
	for waiter in waiters {
		let _ = waiter.send(result.clone());
	}
}
