//! Schema accessors over a [`ConfigValue`] mapping.
//!
//! These never fail on a type mismatch for optional fields - they log a
//! warning and fall back to the supplied default, matching the forward
//! compatibility requirement that unknown or oddly-typed keys don't abort a
//! whole layout. Required fields are checked by the planner, not here.
use std::collections::BTreeMap;

use log::warn;

use crate::unit::{parse_bytes, sector_of};
use crate::value::ConfigValue;

pub fn lookup_string(m: &BTreeMap<String, ConfigValue>, key: &str, default: &str) -> String {
	match m.get(key) {
		None | Some(ConfigValue::Null) => default.to_string(),
		Some(ConfigValue::String(s)) => s.clone(),
		Some(_) => {
			warn!("key '{}' expected a string, using default '{}'", key, default);
			default.to_string()
		}
	}
}

pub fn lookup_bool(m: &BTreeMap<String, ConfigValue>, key: &str, default: bool) -> bool {
	match m.get(key) {
		None | Some(ConfigValue::Null) => default,
		Some(ConfigValue::Bool(b)) => *b,
		Some(_) => {
			warn!("key '{}' expected a bool, using default '{}'", key, default);
			default
		}
	}
}

pub fn lookup_int(m: &BTreeMap<String, ConfigValue>, key: &str, default: i64) -> i64 {
	match m.get(key) {
		None | Some(ConfigValue::Null) => default,
		Some(ConfigValue::Int(n)) => *n,
		Some(ConfigValue::String(s)) => {
			let trimmed = s.trim();
			let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
				i64::from_str_radix(hex, 16).ok()
			} else {
				trimmed.parse::<i64>().ok()
			};
			parsed.unwrap_or_else(|| {
				warn!("key '{}' has a non-integer string '{}', using default {}", key, s, default);
				default
			})
		}
		Some(_) => {
			warn!("key '{}' expected an integer, using default {}", key, default);
			default
		}
	}
}

/// Resolves a byte quantity. Strings go through [`parse_bytes`]; integers
/// are taken as already being bytes.
pub fn lookup_bytes(m: &BTreeMap<String, ConfigValue>, key: &str, default: u64) -> u64 {
	match m.get(key) {
		None | Some(ConfigValue::Null) => default,
		Some(ConfigValue::Int(n)) if *n >= 0 => *n as u64,
		Some(ConfigValue::String(s)) => parse_bytes(s).unwrap_or_else(|e| {
			warn!("key '{}' has an invalid byte quantity '{}': {}, using default {}", key, s, e, default);
			default
		}),
		Some(_) => {
			warn!("key '{}' expected a byte quantity, using default {}", key, default);
			default
		}
	}
}

/// Resolves a sector quantity against `sector_size`. Strings go through
/// [`sector_of`]; integers are taken as already being sectors.
pub fn lookup_sector(
	m: &BTreeMap<String, ConfigValue>,
	key: &str,
	sector_size: u64,
	default: u64,
) -> u64 {
	match m.get(key) {
		None | Some(ConfigValue::Null) => default,
		Some(ConfigValue::Int(n)) if *n >= 0 => *n as u64,
		Some(ConfigValue::String(s)) => sector_of(s, sector_size).unwrap_or_else(|e| {
			warn!("key '{}' has an invalid sector quantity '{}': {}, using default {}", key, s, e, default);
			default
		}),
		Some(_) => {
			warn!("key '{}' expected a sector quantity, using default {}", key, default);
			default
		}
	}
}

pub fn lookup_list<'a>(
	m: &'a BTreeMap<String, ConfigValue>,
	key: &str,
	default: &'a [ConfigValue],
) -> &'a [ConfigValue] {
	match m.get(key) {
		None | Some(ConfigValue::Null) => default,
		Some(ConfigValue::Sequence(s)) => s,
		Some(_) => {
			warn!("key '{}' expected a list, using default", key);
			default
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::load_str;

	#[test]
	fn string_and_bool_defaults() {
		let doc = load_str("a: hello\nb: true\n").unwrap();
		let m = doc.as_mapping().unwrap();
		assert_eq!(lookup_string(m, "a", "x"), "hello");
		assert_eq!(lookup_string(m, "missing", "x"), "x");
		assert!(lookup_bool(m, "b", false));
		assert!(!lookup_bool(m, "missing", false));
	}

	#[test]
	fn bytes_and_sectors() {
		let doc = load_str("size: 32MiB\nraw_sectors: 2048\n").unwrap();
		let m = doc.as_mapping().unwrap();
		assert_eq!(lookup_bytes(m, "size", 0), 33_554_432);
		assert_eq!(lookup_sector(m, "raw_sectors", 512, 0), 2048);
		assert_eq!(lookup_sector(m, "size", 512, 0), 33_554_432 / 512);
	}

	#[test]
	fn hex_strings_in_lookup_int() {
		let doc = load_str("flag: \"0x10\"\n").unwrap();
		let m = doc.as_mapping().unwrap();
		assert_eq!(lookup_int(m, "flag", 0), 0x10);
	}
}
