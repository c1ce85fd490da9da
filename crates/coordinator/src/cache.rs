//! Cached view storage: the in-memory read cache and the optimistic mirror
//! layered over any [`crate::ReadCache`].

mod memory;
mod mirror;

pub use memory::{MemoryCache, ReadOutcome, ReadTicket};
pub use mirror::CacheMirror;
