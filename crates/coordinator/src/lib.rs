//! Optimistic edit and autosave coordination.
//!
//! A detail view opens a [`SessionHandle`] through a [`Coordinator`] and feeds
//! it field edits. The coordinator merges edits into a pending patch, waits
//! for a quiet period, and persists the patch through a [`WriteExecutor`] with
//! at most one write per entity in flight. Cached copies of the entity are
//! patched optimistically before the write resolves and restored exactly if
//! it fails.
//!
//! The coordinator is transport-agnostic: reads go through a [`ReadCache`]
//! (see [`MemoryCache`] for an in-memory implementation) and writes through a
//! [`WriteExecutor`].

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod kind;
pub mod metrics;
pub mod ports;
pub mod session;

pub use autosave_primitives::{EntityId, ItemLocator, Patch, SaveStatus, Value, ViewKey, ViewTarget};
pub use cache::{CacheMirror, MemoryCache, ReadOutcome, ReadTicket};
pub use config::{AutosaveConfig, KindOverride, KindSettings};
pub use coordinator::{CommitResult, Coordinator, WriteRequest};
pub use error::{ConfigError, CoordinatorError, FetchError, WriteFailure};
pub use kind::{EntityKind, ListBinding, ResourceKind};
pub use metrics::{CoordinatorMetrics, MetricsSnapshot};
pub use ports::{ReadCache, ViewFetcher, WriteExecutor};
pub use session::{SessionHandle, SessionView};
