//! Keyed debounce timers with cancel-and-restart semantics.
//!
//! [`DebounceScheduler::schedule`] arms a timer for a key, replacing any timer
//! already armed for it. The fire callback runs exactly once: either when the
//! quiet period elapses uninterrupted, or when [`DebounceScheduler::fire_now`]
//! takes it early. Cancelled or replaced callbacks never run.
//!
//! Every armed timer carries a generation. A timer task that wakes up after
//! its slot was replaced or cancelled finds a different generation (or no
//! slot) and exits without firing.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{TaskClass, spawn};

type FireFn = Box<dyn FnOnce() + Send + 'static>;

struct TimerSlot {
	generation: u64,
	cancel: CancellationToken,
	fire: FireFn,
}

struct Slots<K> {
	timers: HashMap<K, TimerSlot>,
	next_generation: u64,
}

impl<K: Eq + Hash> Slots<K> {
	/// Removes the slot for `key` if it still belongs to `generation`.
	fn take_current(&mut self, key: &K, generation: u64) -> Option<TimerSlot> {
		match self.timers.get(key) {
			Some(slot) if slot.generation == generation => self.timers.remove(key),
			_ => None,
		}
	}
}

/// Per-key debounce timers.
///
/// Dropping the scheduler cancels every armed timer.
pub struct DebounceScheduler<K> {
	slots: Arc<Mutex<Slots<K>>>,
}

impl<K> Default for DebounceScheduler<K> {
	fn default() -> Self {
		Self {
			slots: Arc::new(Mutex::new(Slots {
				timers: HashMap::new(),
				next_generation: 0,
			})),
		}
	}
}

impl<K> fmt::Debug for DebounceScheduler<K> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DebounceScheduler")
			.field("scheduled", &self.slots.lock().timers.len())
			.finish()
	}
}

impl<K> DebounceScheduler<K>
where
	K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
{
	pub fn new() -> Self {
		Self::default()
	}

	/// Arms (or re-arms) the timer for `key`.
	///
	/// Returns `true` if a previously armed timer was replaced.
	pub fn schedule<F>(&self, key: K, delay: Duration, fire: F) -> bool
	where
		F: FnOnce() + Send + 'static,
	{
		let cancel = CancellationToken::new();
		let (generation, replaced) = {
			let mut slots = self.slots.lock();
			slots.next_generation += 1;
			let generation = slots.next_generation;
			let previous = slots.timers.insert(
				key.clone(),
				TimerSlot {
					generation,
					cancel: cancel.clone(),
					fire: Box::new(fire),
				},
			);
			let replaced = previous.map(|slot| slot.cancel.cancel()).is_some();
			(generation, replaced)
		};

		tracing::trace!(?key, generation, delay_ms = delay.as_millis() as u64, replaced, "autosave.debounce.schedule");

		let slots = Arc::clone(&self.slots);
		spawn(TaskClass::Timer, async move {
			tokio::select! {
				_ = cancel.cancelled() => return,
				_ = tokio::time::sleep(delay) => {}
			}

			let slot = slots.lock().take_current(&key, generation);
			if let Some(slot) = slot {
				tracing::trace!(?key, generation, "autosave.debounce.fire");
				(slot.fire)();
			}
		});

		replaced
	}

	/// Disarms the timer for `key` without firing it.
	pub fn cancel(&self, key: &K) -> bool {
		let slot = self.slots.lock().timers.remove(key);
		match slot {
			Some(slot) => {
				slot.cancel.cancel();
				tracing::trace!(?key, generation = slot.generation, "autosave.debounce.cancel");
				true
			}
			None => false,
		}
	}

	/// Disarms the timer for `key` and runs its callback immediately.
	///
	/// Returns `false` if no timer was armed.
	pub fn fire_now(&self, key: &K) -> bool {
		let slot = self.slots.lock().timers.remove(key);
		let Some(slot) = slot else {
			return false;
		};
		slot.cancel.cancel();
		tracing::trace!(?key, generation = slot.generation, "autosave.debounce.fire_now");
		(slot.fire)();
		true
	}

	/// Runs every armed callback immediately. Returns how many fired.
	pub fn fire_all_now(&self) -> usize {
		let drained: Vec<_> = self.slots.lock().timers.drain().collect();
		let count = drained.len();
		for (key, slot) in drained {
			slot.cancel.cancel();
			tracing::trace!(?key, generation = slot.generation, "autosave.debounce.fire_now");
			(slot.fire)();
		}
		count
	}

	pub fn is_scheduled(&self, key: &K) -> bool {
		self.slots.lock().timers.contains_key(key)
	}

	pub fn scheduled_count(&self) -> usize {
		self.slots.lock().timers.len()
	}
}

impl<K> DebounceScheduler<K> {
	/// Disarms every timer without firing.
	pub fn cancel_all(&self) {
		let drained: Vec<_> = self.slots.lock().timers.drain().collect();
		for (_, slot) in drained {
			slot.cancel.cancel();
		}
	}
}

impl<K> Drop for DebounceScheduler<K> {
	fn drop(&mut self) {
		self.cancel_all();
	}
}
