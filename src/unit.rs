//! Byte-unit parsing: `"32MiB"` becomes `33554432`, `"1kB"` becomes `1000`.
use anyhow::{anyhow, Result};

const UNITS: &[(&str, u64)] = &[
	("TiB", 1_099_511_627_776),
	("GiB", 1_073_741_824),
	("MiB", 1_048_576),
	("kiB", 1_024),
	("TB", 1_000_000_000_000),
	("GB", 1_000_000_000),
	("MB", 1_000_000),
	("kB", 1_000),
	("B", 1),
];

/// Parses a byte quantity such as `32MiB`, `1000000` or `4kB`.
///
/// Grammar: a run of ASCII digits, optionally followed by a unit name drawn
/// from the table above (case-insensitive). An absent unit means bytes.
/// Anything else - a sign, a decimal point, stray punctuation - is rejected.
pub fn parse_bytes(s: &str) -> Result<u64> {
	let s = s.trim();
	if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
		return Err(anyhow!("'{}' is not a valid byte quantity", s));
	}
	let digit_len = s.chars().take_while(|c| c.is_ascii_digit()).count();
	if digit_len == 0 {
		return Err(anyhow!("'{}' has no leading digits", s));
	}
	let (digits, unit) = s.split_at(digit_len);
	let n: u64 = digits
		.parse()
		.map_err(|_| anyhow!("'{}' overflows a 64-bit integer", digits))?;
	let unit = if unit.is_empty() { "B" } else { unit };
	let factor = UNITS
		.iter()
		.find(|(name, _)| name.eq_ignore_ascii_case(unit))
		.map(|(_, f)| *f)
		.ok_or_else(|| anyhow!("unknown unit '{}'", unit))?;
	n.checked_mul(factor)
		.ok_or_else(|| anyhow!("'{}' overflows a 64-bit integer", s))
}

/// Parses a sector quantity, given the device's sector size.
///
/// A bare integer (no recognised unit suffix) is interpreted directly as a
/// sector count. Anything that parses as a byte quantity via
/// [`parse_bytes`] is divided by `sector_size` (rounding toward zero).
pub fn sector_of(s: &str, sector_size: u64) -> Result<u64> {
	let trimmed = s.trim();
	if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
		return trimmed
			.parse()
			.map_err(|_| anyhow!("'{}' overflows a 64-bit integer", trimmed));
	}
	let bytes = parse_bytes(s)?;
	Ok(bytes / sector_size)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_plain_bytes() {
		assert_eq!(parse_bytes("512").unwrap(), 512);
		assert_eq!(parse_bytes("512B").unwrap(), 512);
	}

	#[test]
	fn parses_decimal_and_binary_units() {
		assert_eq!(parse_bytes("1kB").unwrap(), 1_000);
		assert_eq!(parse_bytes("1kiB").unwrap(), 1_024);
		assert_eq!(parse_bytes("32MiB").unwrap(), 33_554_432);
		assert_eq!(parse_bytes("1GB").unwrap(), 1_000_000_000);
		assert_eq!(parse_bytes("1TiB").unwrap(), 1_099_511_627_776);
	}

	#[test]
	fn unit_match_is_case_insensitive() {
		assert_eq!(parse_bytes("32mib").unwrap(), 33_554_432);
		assert_eq!(parse_bytes("32MIB").unwrap(), 33_554_432);
	}

	#[test]
	fn rejects_signs_and_fractions() {
		assert!(parse_bytes("-1").is_err());
		assert!(parse_bytes("1.5MiB").is_err());
		assert!(parse_bytes("1_000").is_err());
		assert!(parse_bytes("").is_err());
	}

	#[test]
	fn rejects_unknown_units() {
		assert!(parse_bytes("32QiB").is_err());
	}

	#[test]
	fn sector_of_prefers_plain_integers_as_sectors() {
		assert_eq!(sector_of("2048", 512).unwrap(), 2048);
	}

	#[test]
	fn sector_of_converts_unit_strings() {
		assert_eq!(sector_of("1MiB", 512).unwrap(), 2048);
	}
}
