//! Task spawning and debounce timers for the autosave coordinator.

mod class;
pub mod debounce;
mod spawn;

pub use class::TaskClass;
pub use debounce::DebounceScheduler;
pub use spawn::spawn;
