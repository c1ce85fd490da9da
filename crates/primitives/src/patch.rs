//! Field-level patch accumulation.
//!
//! A [`Patch`] maps field names to whole replacement values. Merging is
//! shallow and last-write-wins per field: nested objects are never combined,
//! so compound fields must be passed as complete replacement values.
//!
//! Two patches matter per entity: the live pending patch that keeps absorbing
//! edits, and the copy captured when a write is dispatched. [`Patch::settle`]
//! reconciles the two once the write is confirmed.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors building a patch from untyped input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
	/// Field updates must be given as a JSON object.
	#[error("field updates must be a JSON object, got {0}")]
	NotAnObject(&'static str),
}

/// Pending field updates for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(BTreeMap<String, Value>);

/// Merges `updates` over `existing`, returning the combined patch.
///
/// Keys in `updates` overwrite the same keys in `existing`; unrelated keys are
/// kept as they are.
pub fn merge(existing: &Patch, updates: Patch) -> Patch {
	let mut merged = existing.clone();
	merged.merge_from(updates);
	merged
}

impl Patch {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a patch from a JSON object of field updates.
	pub fn from_value(value: Value) -> Result<Self, PatchError> {
		match value {
			Value::Object(map) => Ok(map.into_iter().collect()),
			other => Err(PatchError::NotAnObject(json_kind(&other))),
		}
	}

	/// Chainable single-field insert.
	pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(field.into(), value.into());
		self
	}

	pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
		self.0.insert(field.into(), value.into())
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.0.get(field)
	}

	pub fn contains(&self, field: &str) -> bool {
		self.0.contains_key(field)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn fields(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
		self.0.iter()
	}

	pub fn clear(&mut self) {
		self.0.clear();
	}

	/// Copy of the patch without `field`.
	pub fn without(&self, field: &str) -> Patch {
		let mut patch = self.clone();
		patch.0.remove(field);
		patch
	}

	/// Merges `updates` in place.
	///
	/// Returns how many fields already pending were overwritten, i.e. edits
	/// coalesced into an earlier one.
	pub fn merge_from(&mut self, updates: Patch) -> usize {
		let mut overwritten = 0;
		for (field, value) in updates.0 {
			if self.0.insert(field, value).is_some() {
				overwritten += 1;
			}
		}
		overwritten
	}

	/// Overwrites the patched fields of a JSON object.
	///
	/// Returns `false` and leaves `target` untouched when it is not an object.
	pub fn apply_to(&self, target: &mut Value) -> bool {
		let Value::Object(fields) = target else {
			return false;
		};
		for (field, value) in &self.0 {
			fields.insert(field.clone(), value.clone());
		}
		true
	}

	/// Like [`Self::apply_to`], but only overwrites fields `target` already has.
	///
	/// Used for projected copies (list rows) that carry a subset of fields.
	pub fn apply_projected(&self, target: &mut Value) -> bool {
		let Value::Object(fields) = target else {
			return false;
		};
		for (field, value) in &self.0 {
			if let Some(slot) = fields.get_mut(field) {
				*slot = value.clone();
			}
		}
		true
	}

	/// Drops the fields a confirmed write carried.
	///
	/// A field is removed only while its pending value still equals the
	/// dispatched one; fields edited again during the write stay pending.
	/// Returns the number of fields removed.
	pub fn settle(&mut self, dispatched: &Patch) -> usize {
		let before = self.0.len();
		for (field, sent) in &dispatched.0 {
			if self.0.get(field) == Some(sent) {
				self.0.remove(field);
			}
		}
		before - self.0.len()
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.0.into_iter().collect::<Map<String, Value>>())
	}
}

impl<K: Into<String>> FromIterator<(K, Value)> for Patch {
	fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
	}
}

impl IntoIterator for Patch {
	type Item = (String, Value);
	type IntoIter = btree_map::IntoIter<String, Value>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

impl<'a> IntoIterator for &'a Patch {
	type Item = (&'a String, &'a Value);
	type IntoIter = btree_map::Iter<'a, String, Value>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}
