//! Raw-flash (MTD) layout planner: a linear walk with erase-block-aligned
//! offsets and sizes, and `expand` legal only on the terminal entry.
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::error::ProvisionError;
use crate::plan::{FlashPartition, FlashPlan, Input};
use crate::schema::{lookup_bool, lookup_bytes, lookup_string};
use crate::value::ConfigValue;

use super::TargetGeometry;

fn resolve_input(m: &BTreeMap<String, ConfigValue>, prefix: &Path) -> Result<Input> {
	let filename = lookup_string(m, "filename", "");
	let path = prefix.join(&filename);
	let mut checksums = Vec::new();
	let md5 = lookup_string(m, "md5sum", "");
	if !md5.is_empty() {
		checksums.push(crate::plan::Checksum { algo: crate::plan::ChecksumAlgo::Md5, hex: md5 });
	}
	let sha256 = lookup_string(m, "sha256sum", "");
	if !sha256.is_empty() {
		checksums.push(crate::plan::Checksum { algo: crate::plan::ChecksumAlgo::Sha256, hex: sha256 });
	}
	let size = std::fs::metadata(&path)
		.map(|md| md.len())
		.map_err(|_| anyhow!(ProvisionError::InputMissing(filename.clone())))?;
	Ok(Input { filename: path, checksums, size })
}

pub fn plan_raw_flash(m: &BTreeMap<String, ConfigValue>, geometry: TargetGeometry, prefix: &Path) -> Result<FlashPlan> {
	let erase = geometry.erase_block_bytes.max(1);
	let entries_cfg = m
		.get("mtd-partitions")
		.and_then(ConfigValue::as_sequence)
		.unwrap_or(&[]);

	let mut partitions = Vec::new();
	let mut offset_acc: u64 = 0;
	let n = entries_cfg.len();

	for (i, entry) in entries_cfg.iter().enumerate() {
		let pm = entry
			.as_mapping()
			.ok_or_else(|| anyhow!(ProvisionError::ConfigSchemaViolation("mtd partition entry must be a mapping".to_string())))?;
		let name = lookup_string(pm, "name", &format!("mtd{}", i));
		let declared_offset = lookup_bytes(pm, "offset", 0);
		offset_acc += declared_offset;
		if offset_acc % erase != 0 {
			return Err(anyhow!(ProvisionError::UnalignedPartition));
		}
		let offset_bytes = offset_acc;
		let expand = lookup_bool(pm, "expand", false);
		let erase_flag = lookup_bool(pm, "erase", false);

		let size_bytes = if expand {
			if i + 1 != n {
				return Err(anyhow!(ProvisionError::NonTerminalExpand));
			}
			geometry.total_sectors.saturating_sub(offset_acc)
		} else {
			lookup_bytes(pm, "size", 0)
		};
		if size_bytes % erase != 0 {
			return Err(anyhow!(ProvisionError::UnalignedPartition));
		}

		let input = pm
			.get("input")
			.and_then(ConfigValue::as_mapping)
			.map(|im| resolve_input(im, prefix))
			.transpose()?;
		if let Some(inp) = &input {
			if inp.size >= size_bytes {
				return Err(anyhow!(ProvisionError::ConfigSchemaViolation(format!(
					"input for partition '{}' does not fit",
					name
				))));
			}
		}

		offset_acc += size_bytes;
		partitions.push(FlashPartition {
			name,
			size_bytes,
			offset_bytes,
			erase: erase_flag,
			expand,
			input,
		});
	}

	if offset_acc > geometry.total_sectors {
		return Err(anyhow!(ProvisionError::ConfigSchemaViolation(
			"raw-flash layout exceeds device size".to_string()
		)));
	}

	Ok(FlashPlan { partitions })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::load_str;

	fn geom(total: u64, erase: u64) -> TargetGeometry {
		TargetGeometry { sector_size: 1, total_sectors: total, erase_block_bytes: erase }
	}

	#[test]
	fn non_terminal_expand_is_rejected() {
		let doc = load_str(
			"mtd-partitions:\n  - name: a\n    expand: true\n  - name: b\n    size: 65536\n",
		)
		.unwrap();
		assert!(plan_raw_flash(doc.as_mapping().unwrap(), geom(1 << 20, 65536), Path::new("/tmp")).is_err());
	}

	#[test]
	fn unaligned_partition_is_rejected() {
		let doc = load_str("mtd-partitions:\n  - name: a\n    size: 1000\n").unwrap();
		assert!(plan_raw_flash(doc.as_mapping().unwrap(), geom(1 << 20, 65536), Path::new("/tmp")).is_err());
	}

	#[test]
	fn terminal_expand_fills_remainder() {
		let doc = load_str(
			"mtd-partitions:\n  - name: a\n    size: 65536\n  - name: b\n    expand: true\n",
		)
		.unwrap();
		let plan = plan_raw_flash(doc.as_mapping().unwrap(), geom(1 << 20, 65536), Path::new("/tmp")).unwrap();
		assert_eq!(plan.partitions[1].size_bytes, (1 << 20) - 65536);
	}
}
