//! Autosave configuration.
//!
//! Configuration is TOML with global defaults and optional per entity-kind
//! overrides:
//!
//! ```toml
//! debounce_ms = 500
//! autosave = true
//! reconcile_derived = true
//!
//! [kinds.order]
//! debounce_ms = 1000
//! autosave = false
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default quiet period before an automatic write.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Top-level autosave configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutosaveConfig {
	/// Quiet period in milliseconds before an automatic write fires.
	pub debounce_ms: u64,
	/// When `false`, edits accumulate until a manual save.
	pub autosave: bool,
	/// Invalidate derived views (counts, totals) after every settled write.
	pub reconcile_derived: bool,
	/// Overrides keyed by entity kind name.
	pub kinds: BTreeMap<String, KindOverride>,
}

/// Per-kind overrides; unset fields inherit the global value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KindOverride {
	pub debounce_ms: Option<u64>,
	pub autosave: Option<bool>,
	pub reconcile_derived: Option<bool>,
}

/// Effective settings for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSettings {
	pub debounce: Duration,
	pub autosave: bool,
	pub reconcile_derived: bool,
}

impl Default for AutosaveConfig {
	fn default() -> Self {
		Self {
			debounce_ms: DEFAULT_DEBOUNCE_MS,
			autosave: true,
			reconcile_derived: true,
			kinds: BTreeMap::new(),
		}
	}
}

impl Default for KindSettings {
	fn default() -> Self {
		AutosaveConfig::default().for_kind("")
	}
}

impl AutosaveConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::from_toml_str(&input)?;
		tracing::debug!(path = %path.display(), kinds = config.kinds.len(), "autosave.config.loaded");
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.debounce_ms == 0 {
			return Err(ConfigError::InvalidDebounce { scope: "global".into() });
		}
		for (kind, over) in &self.kinds {
			if over.debounce_ms == Some(0) {
				return Err(ConfigError::InvalidDebounce {
					scope: format!("kinds.{kind}"),
				});
			}
		}
		Ok(())
	}

	/// Resolves the settings for `kind`, applying its overrides if any.
	pub fn for_kind(&self, kind: &str) -> KindSettings {
		let over = self.kinds.get(kind).cloned().unwrap_or_default();
		KindSettings {
			debounce: Duration::from_millis(over.debounce_ms.unwrap_or(self.debounce_ms)),
			autosave: over.autosave.unwrap_or(self.autosave),
			reconcile_derived: over.reconcile_derived.unwrap_or(self.reconcile_derived),
		}
	}
}
