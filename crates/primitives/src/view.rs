//! Addresses of cached views and of an entity's copy inside them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EntityId;

/// Identifies one cached view, e.g. `order/42` or `orders?page=1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewKey(Arc<str>);

impl ViewKey {
	pub fn new(key: impl AsRef<str>) -> Self {
		Self(Arc::from(key.as_ref()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ViewKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ViewKey {
	fn from(key: &str) -> Self {
		Self::new(key)
	}
}

impl From<String> for ViewKey {
	fn from(key: String) -> Self {
		Self(Arc::from(key))
	}
}

/// Where an entity's copy lives inside a view's value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ItemLocator {
	/// The whole view value is the entity (detail views).
	Whole,
	/// An element of the array at `pointer` whose `id_field` equals the entity id.
	///
	/// `pointer` is an RFC 6901 JSON pointer; the empty string addresses the
	/// view root.
	ListItem { pointer: String, id_field: String },
}

/// A single cache entry address: a view plus the entity's position in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewTarget {
	pub key: ViewKey,
	pub locator: ItemLocator,
}

impl ViewTarget {
	pub fn detail(key: impl Into<ViewKey>) -> Self {
		Self {
			key: key.into(),
			locator: ItemLocator::Whole,
		}
	}

	pub fn list_item(key: impl Into<ViewKey>, pointer: impl Into<String>, id_field: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			locator: ItemLocator::ListItem {
				pointer: pointer.into(),
				id_field: id_field.into(),
			},
		}
	}

	pub fn is_detail(&self) -> bool {
		self.locator == ItemLocator::Whole
	}

	/// Finds the entity's copy inside `view`.
	pub fn locate<'a>(&self, view: &'a Value, id: &EntityId) -> Option<&'a Value> {
		match &self.locator {
			ItemLocator::Whole => Some(view),
			ItemLocator::ListItem { pointer, id_field } => view
				.pointer(pointer)?
				.as_array()?
				.iter()
				.find(|item| id_matches(item, id_field, id)),
		}
	}

	/// Mutable counterpart of [`Self::locate`].
	pub fn locate_mut<'a>(&self, view: &'a mut Value, id: &EntityId) -> Option<&'a mut Value> {
		match &self.locator {
			ItemLocator::Whole => Some(view),
			ItemLocator::ListItem { pointer, id_field } => view
				.pointer_mut(pointer)?
				.as_array_mut()?
				.iter_mut()
				.find(|item| id_matches(item, id_field, id)),
		}
	}
}

fn id_matches(item: &Value, id_field: &str, id: &EntityId) -> bool {
	match item.get(id_field) {
		Some(Value::String(s)) => s == id.as_str(),
		Some(Value::Number(n)) => n.to_string() == id.as_str(),
		_ => false,
	}
}
