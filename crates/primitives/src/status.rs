//! Save status state machine driving autosave UI feedback.
//!
//! ```text
//! pristine --edit--> pending --flush--> saving --ok, clean--> saved
//!                       ^                  |  \--ok, dirty--> pending
//!                       |                  \----failed-----> error
//!      saved/error --edit--/                     error --manual save--> saving
//! ```
//!
//! The machine only derives state; it never schedules or performs work.

use serde::{Deserialize, Serialize};

/// User-visible save state of an edit session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
	/// Nothing edited since the session opened.
	#[default]
	Pristine,
	/// Unsaved edits waiting for the debounce window or a manual save.
	Pending,
	/// A write is in flight.
	Saving,
	/// The last write succeeded and nothing is pending.
	Saved,
	/// The last write failed; the edits are still pending.
	Error,
}

impl SaveStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pristine => "pristine",
			Self::Pending => "pending",
			Self::Saving => "saving",
			Self::Saved => "saved",
			Self::Error => "error",
		}
	}
}

/// Inputs to the status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusEvent {
	/// A non-empty field update was merged into the pending patch.
	Edit,
	/// The debounce timer fired.
	DebounceFired,
	/// The user asked to save immediately.
	ManualSave,
	/// The in-flight write was confirmed.
	WriteSucceeded { patch_empty: bool },
	/// The in-flight write failed.
	WriteFailed,
}

impl SaveStatus {
	/// Returns the next state, or `None` when `event` does not move the
	/// machine from this state.
	pub const fn next(self, event: StatusEvent) -> Option<SaveStatus> {
		use SaveStatus::*;
		use StatusEvent::*;

		match (self, event) {
			(Pristine | Saved | Error, Edit) => Some(Pending),
			(Pending, DebounceFired | ManualSave) => Some(Saving),
			(Error, ManualSave) => Some(Saving),
			(Saving, WriteSucceeded { patch_empty: true }) => Some(Saved),
			(Saving, WriteSucceeded { patch_empty: false }) => Some(Pending),
			(Saving, WriteFailed) => Some(Error),
			_ => None,
		}
	}
}

/// Current status plus a transition counter for change detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStatusMachine {
	state: SaveStatus,
	transitions: u64,
}

impl SaveStatusMachine {
	pub fn new() -> Self {
		Self::default()
	}

	pub const fn state(&self) -> SaveStatus {
		self.state
	}

	pub const fn transitions(&self) -> u64 {
		self.transitions
	}

	/// Feeds an event, returning the new state if it changed.
	pub fn apply(&mut self, event: StatusEvent) -> Option<SaveStatus> {
		let next = self.state.next(event)?;
		tracing::trace!(from = self.state.as_str(), to = next.as_str(), ?event, "autosave.status.transition");
		self.state = next;
		self.transitions += 1;
		Some(next)
	}

	/// Whether a debounce timer may legitimately be armed in this state.
	pub const fn allows_timer(&self) -> bool {
		matches!(self.state, SaveStatus::Pending)
	}
}
