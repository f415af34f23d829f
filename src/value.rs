//! The typed configuration value tree.
//!
//! YAML is parsed once through `serde_yaml::Value` (which is itself a tagged
//! sum over null/bool/number/string/sequence/mapping/tagged) and converted
//! node-by-node into `ConfigValue`. Keeping a crate-owned tree, rather than
//! handing `serde_yaml::Value` around directly, is what lets the schema
//! layer (`schema.rs`) apply unit-aware coercions and warn-and-fall-back
//! semantics without leaking serde's representation into the planner.
use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::error::ProvisionError;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	Mapping(BTreeMap<String, ConfigValue>),
	Sequence(Vec<ConfigValue>),
}

impl ConfigValue {
	pub fn as_mapping(&self) -> Option<&BTreeMap<String, ConfigValue>> {
		match self {
			ConfigValue::Mapping(m) => Some(m),
			_ => None,
		}
	}

	pub fn as_sequence(&self) -> Option<&[ConfigValue]> {
		match self {
			ConfigValue::Sequence(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			ConfigValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			ConfigValue::Int(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			ConfigValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, ConfigValue::Null)
	}

	/// Look up a key within a mapping; `None` if `self` is not a mapping or
	/// the key is absent.
	pub fn get(&self, key: &str) -> Option<&ConfigValue> {
		self.as_mapping().and_then(|m| m.get(key))
	}
}

/// Parses a YAML document into a `ConfigValue` tree, failing unless the
/// document root is a mapping.
pub fn load_str(src: &str) -> Result<ConfigValue> {
	let raw: serde_yaml::Value =
		serde_yaml::from_str(src).map_err(|e| anyhow!(ProvisionError::ConfigParseFailed).context(e.to_string()))?;
	let value = from_serde_yaml(&raw);
	if value.as_mapping().is_none() {
		return Err(anyhow!(ProvisionError::ConfigInvalidRoot));
	}
	Ok(value)
}

fn from_serde_yaml(raw: &serde_yaml::Value) -> ConfigValue {
	match raw {
		serde_yaml::Value::Null => ConfigValue::Null,
		serde_yaml::Value::Bool(b) => ConfigValue::Bool(*b),
		serde_yaml::Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				ConfigValue::Int(i)
			} else if let Some(f) = n.as_f64() {
				ConfigValue::Float(f)
			} else {
				ConfigValue::Null
			}
		}
		serde_yaml::Value::String(s) => ConfigValue::String(s.clone()),
		serde_yaml::Value::Sequence(seq) => {
			ConfigValue::Sequence(seq.iter().map(from_serde_yaml).collect())
		}
		serde_yaml::Value::Mapping(map) => {
			let mut out = BTreeMap::new();
			for (k, v) in map.iter() {
				if let Some(key) = k.as_str() {
					out.insert(key.to_string(), from_serde_yaml(v));
				}
			}
			ConfigValue::Mapping(out)
		}
		// Custom tags are not part of the accepted schema; fold them down to
		// their untagged value rather than failing the whole document.
		serde_yaml::Value::Tagged(t) => from_serde_yaml(&t.value),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn root_must_be_a_mapping() {
		assert!(load_str("- 1\n- 2\n").is_err());
		assert!(load_str("just a string\n").is_err());
	}

	#[test]
	fn parses_nested_structure() {
		let doc = load_str("api-version: 1\npartitions:\n  - size: 32MiB\n    filesystem: fat32\n").unwrap();
		let root = doc.as_mapping().unwrap();
		assert_eq!(root.get("api-version").unwrap().as_int(), Some(1));
		let parts = root.get("partitions").unwrap().as_sequence().unwrap();
		assert_eq!(parts.len(), 1);
		assert_eq!(
			parts[0].get("filesystem").unwrap().as_str(),
			Some("fat32")
		);
	}
}
