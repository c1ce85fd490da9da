/// Execution classes attached to spawned tasks for trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// A persistence write; runs to completion once dispatched.
	Write,
	/// A background re-read of a cached view; may be cancelled.
	Refetch,
	/// A debounce timer waiting out its quiet period.
	Timer,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Write => "write",
			Self::Refetch => "refetch",
			Self::Timer => "timer",
		}
	}
}
