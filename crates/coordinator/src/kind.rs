//! Entity kinds: which cached views show an entity of a given type.

use autosave_primitives::{EntityId, ViewKey, ViewTarget};

/// Describes where one entity type appears in the read cache.
///
/// A [`crate::Coordinator`] is generic over its kind, so investments, orders
/// and users each get their own coordinator with the same save semantics.
pub trait EntityKind: Send + Sync + 'static {
	/// Kind name, also used to look up per-kind configuration.
	fn name(&self) -> &str;

	/// The detail view holding the full entity.
	fn detail_view(&self, id: &EntityId) -> ViewTarget;

	/// List views embedding a copy of the entity.
	fn list_views(&self, _id: &EntityId) -> Vec<ViewTarget> {
		Vec::new()
	}

	/// Views the optimistic patch cannot keep correct (counts, totals).
	///
	/// Invalidated after every settled write.
	fn derived_views(&self, _id: &EntityId) -> Vec<ViewKey> {
		Vec::new()
	}

	/// Every entry that receives the optimistic patch.
	fn optimistic_targets(&self, id: &EntityId) -> Vec<ViewTarget> {
		let mut targets = vec![self.detail_view(id)];
		targets.extend(self.list_views(id));
		targets
	}
}

/// A list view embedding rows of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListBinding {
	pub key: ViewKey,
	pub pointer: String,
	pub id_field: String,
}

/// Table-driven [`EntityKind`] for REST-style resources.
///
/// Detail views are keyed `"{name}/{id}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKind {
	name: String,
	lists: Vec<ListBinding>,
	derived: Vec<ViewKey>,
}

impl ResourceKind {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			lists: Vec::new(),
			derived: Vec::new(),
		}
	}

	/// Adds a list view whose rows live in the array at `pointer`.
	pub fn with_list(mut self, key: impl Into<ViewKey>, pointer: impl Into<String>, id_field: impl Into<String>) -> Self {
		self.lists.push(ListBinding {
			key: key.into(),
			pointer: pointer.into(),
			id_field: id_field.into(),
		});
		self
	}

	/// Adds a view to refetch after every write.
	pub fn with_derived(mut self, key: impl Into<ViewKey>) -> Self {
		self.derived.push(key.into());
		self
	}

	pub fn detail_key(&self, id: &EntityId) -> ViewKey {
		ViewKey::from(format!("{}/{id}", self.name))
	}
}

impl EntityKind for ResourceKind {
	fn name(&self) -> &str {
		&self.name
	}

	fn detail_view(&self, id: &EntityId) -> ViewTarget {
		ViewTarget::detail(self.detail_key(id))
	}

	fn list_views(&self, _id: &EntityId) -> Vec<ViewTarget> {
		self.lists
			.iter()
			.map(|list| ViewTarget::list_item(list.key.clone(), list.pointer.clone(), list.id_field.clone()))
			.collect()
	}

	fn derived_views(&self, _id: &EntityId) -> Vec<ViewKey> {
		self.derived.clone()
	}
}
