//! Core types for optimistic editing: entity ids, field patches, cache view
//! addresses and the save status machine.

/// Entity identifiers.
pub mod entity;
/// Shallow field patches and their merge rules.
pub mod patch;
/// Save status state machine.
pub mod status;
/// Cached view keys and entity locators.
pub mod view;

pub use entity::EntityId;
pub use patch::{Patch, PatchError, merge};
pub use serde_json::Value;
pub use status::{SaveStatus, SaveStatusMachine, StatusEvent};
pub use view::{ItemLocator, ViewKey, ViewTarget};
