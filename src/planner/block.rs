//! Block-device layout planner (MBR/GPT), per the seven-step algorithm:
//! disklabel -> mmc -> raw -> partitions -> expand division -> clean ->
//! overlap check.
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use log::warn;

use crate::error::ProvisionError;
use crate::filesystem::FilesystemType;
use crate::parttype::PartitionType;
use crate::plan::{
	BlockPlan, BootPartitionEnable, BootPartitions, Checksum, ChecksumAlgo, Clean, DisklabelKind, Input, MmcControls,
	Partition, PartitionPlacement, RawBinary,
};
use crate::schema::{lookup_bool, lookup_bytes, lookup_int, lookup_list, lookup_sector, lookup_string};
use crate::value::ConfigValue;

use super::TargetGeometry;

const API_VERSION_MAJOR: i64 = 1;

fn table_reserve(disklabel: DisklabelKind) -> u64 {
	match disklabel {
		DisklabelKind::Mbr => 1,
		DisklabelKind::Gpt => 34,
		DisklabelKind::None => 0,
	}
}

fn gpt_tail(disklabel: DisklabelKind) -> u64 {
	match disklabel {
		DisklabelKind::Gpt => 34,
		_ => 0,
	}
}

fn resolve_input(m: &BTreeMap<String, ConfigValue>, prefix: &Path) -> Result<Input> {
	let filename = lookup_string(m, "filename", "");
	if filename.is_empty() {
		return Err(anyhow!(ProvisionError::InputMissing("(no filename given)".to_string())));
	}
	let path = prefix.join(&filename);
	let mut checksums = Vec::new();
	let md5 = lookup_string(m, "md5sum", "");
	if !md5.is_empty() {
		checksums.push(Checksum { algo: ChecksumAlgo::Md5, hex: md5 });
	}
	let sha256 = lookup_string(m, "sha256sum", "");
	if !sha256.is_empty() {
		checksums.push(Checksum { algo: ChecksumAlgo::Sha256, hex: sha256 });
	}
	let size = std::fs::metadata(&path)
		.map(|md| md.len())
		.map_err(|_| anyhow!(ProvisionError::InputMissing(filename.clone())))?;
	Ok(Input { filename: path, checksums, size })
}

fn parse_raw_binary(m: &BTreeMap<String, ConfigValue>, sector_size: u64, prefix: &Path, table_reserve: u64) -> Result<RawBinary> {
	let input_map = m
		.get("input")
		.and_then(ConfigValue::as_mapping)
		.ok_or_else(|| anyhow!(ProvisionError::ConfigSchemaViolation("raw entry missing 'input'".to_string())))?;
	let input = resolve_input(input_map, prefix)?;
	let input_offset_sectors = lookup_sector(m, "input-offset", sector_size, 0);
	let output_offset_sectors = lookup_sector(m, "output-offset", sector_size, 0);
	if output_offset_sectors < table_reserve {
		return Err(anyhow!(ProvisionError::LayoutOverlap));
	}
	Ok(RawBinary { input, input_offset_sectors, output_offset_sectors })
}

fn byte_overlap(a: (u64, u64), b: (u64, u64)) -> bool {
	a.0 < b.1 && b.0 < a.1
}

pub fn plan_block(m: &BTreeMap<String, ConfigValue>, geometry: TargetGeometry, prefix: &Path) -> Result<BlockPlan> {
	let api_version = lookup_int(m, "api-version", API_VERSION_MAJOR);
	if api_version > API_VERSION_MAJOR {
		return Err(anyhow!(ProvisionError::ConfigApiIncompatible));
	}

	let disklabel_str = lookup_string(m, "disklabel", "");
	let disklabel = match disklabel_str.as_str() {
		"" => DisklabelKind::None,
		"msdos" => DisklabelKind::Mbr,
		"gpt" => DisklabelKind::Gpt,
		other => return Err(anyhow!(ProvisionError::UnsupportedDisklabel(other.to_string()))),
	};
	let reserve = table_reserve(disklabel);
	let tail = gpt_tail(disklabel);
	let sector_size = geometry.sector_size;

	// mmc
	let mmc = m.get("mmc").and_then(ConfigValue::as_mapping).map(|mmc_map| {
		let hwreset = mmc_map.get("hwreset").and_then(ConfigValue::as_int);
		let bootbus = mmc_map.get("bootbus").and_then(ConfigValue::as_int);
		let boot_partitions = mmc_map.get("boot-partitions").and_then(ConfigValue::as_mapping).map(|bp| {
			let enable_n = lookup_int(bp, "enable", 0);
			let enable = BootPartitionEnable::from_int(enable_n).unwrap_or(BootPartitionEnable::Disabled);
			let boot_ack = lookup_bool(bp, "boot-ack", false);
			let binaries_cfg = lookup_list(bp, "binaries", &[]);
			let binaries = binaries_cfg
				.iter()
				.filter_map(|b| b.as_mapping())
				.filter_map(|bm| parse_raw_binary(bm, sector_size, prefix, reserve).ok())
				.collect();
			BootPartitions { enable, boot_ack, binaries }
		});
		MmcControls { hwreset, bootbus, boot_partitions }
	});

	// raw
	let raw_cfg = lookup_list(m, "raw", &[]);
	let mut raw = Vec::new();
	for entry in raw_cfg {
		if let Some(em) = entry.as_mapping() {
			raw.push(parse_raw_binary(em, sector_size, prefix, reserve)?);
		}
	}

	// partitions
	let parts_cfg = lookup_list(m, "partitions", &[]);
	let mut partitions = Vec::new();
	let mut num_logical = 0u32;
	let mut fixed_parts_size: u64 = 0;
	let mut expand_indices = Vec::new();
	let mut next_primary = 1u32;
	let mut next_logical = 5u32;

	for (i, entry) in parts_cfg.iter().enumerate() {
		let pm = entry
			.as_mapping()
			.ok_or_else(|| anyhow!(ProvisionError::ConfigSchemaViolation("partition entry must be a mapping".to_string())))?;

		let placement_str = lookup_string(pm, "type", "primary");
		let placement = match placement_str.as_str() {
			"primary" => PartitionPlacement::Primary,
			"logical" => PartitionPlacement::Logical,
			other => return Err(anyhow!(ProvisionError::UnknownPartitionType(other.to_string()))),
		};
		if placement == PartitionPlacement::Logical {
			if disklabel == DisklabelKind::Gpt {
				return Err(anyhow!(ProvisionError::UnknownPartitionType("logical".to_string())));
			}
			num_logical += 1;
		}

		let part_type_str = lookup_string(pm, "part-type", "");
		let part_type = PartitionType::parse(&part_type_str)?;
		let filesystem_str = lookup_string(pm, "filesystem", "");
		let filesystem = FilesystemType::parse(&filesystem_str)?;

		let expand = lookup_bool(pm, "expand", false);
		let mut size_sectors = lookup_sector(pm, "size", sector_size, 0);
		let block_size_sectors = lookup_sector(pm, "block-size", sector_size, 1).max(1);
		size_sectors -= size_sectors % block_size_sectors;

		if !expand && size_sectors == 0 {
			return Err(anyhow!(ProvisionError::ZeroSizedPartition));
		}

		let mut offset_sectors = lookup_sector(pm, "offset", sector_size, 0);
		if i == 0 {
			if offset_sectors == 0 {
				offset_sectors = reserve;
			} else if offset_sectors < reserve {
				return Err(anyhow!(ProvisionError::OffsetOverridesTable));
			}
		}

		let label = {
			let l = lookup_string(pm, "label", "");
			if l.is_empty() { None } else { Some(l) }
		};
		let partuuid = {
			let s = lookup_string(pm, "partuuid", "");
			uuid::Uuid::parse_str(&s).ok()
		};
		let mkfs_extra_args = lookup_list(pm, "mkfs-extra-args", &[])
			.iter()
			.filter_map(|v| v.as_str().map(str::to_string))
			.collect();
		let flags: Vec<String> = lookup_list(pm, "flags", &[])
			.iter()
			.filter_map(|v| v.as_str().map(str::to_string))
			.collect();

		let inputs_cfg = lookup_list(pm, "input", &[]);
		let mut inputs = Vec::new();
		for in_entry in inputs_cfg {
			if let Some(im) = in_entry.as_mapping() {
				inputs.push(resolve_input(im, prefix)?);
			}
		}

		let number = if placement == PartitionPlacement::Logical {
			let n = next_logical;
			next_logical += 1;
			n
		} else {
			let n = next_primary;
			next_primary += 1;
			n
		};

		if expand {
			expand_indices.push(partitions.len());
		} else {
			fixed_parts_size += size_sectors + offset_sectors;
		}

		partitions.push(Partition {
			number,
			label,
			partuuid,
			placement,
			part_type,
			filesystem,
			mkfs_extra_args,
			size_sectors,
			offset_sectors,
			block_size_sectors,
			expand,
			flags,
			inputs,
		});
	}

	if !expand_indices.is_empty() {
		let logical_overhead = 2 * num_logical as u64;
		let used = fixed_parts_size + logical_overhead + tail;
		let residual = geometry.total_sectors.saturating_sub(used);
		let n = expand_indices.len() as u64;
		let share = residual / n;
		let remainder = residual % n;
		for (pos, idx) in expand_indices.iter().enumerate() {
			let mut s = share;
			if pos + 1 == expand_indices.len() {
				s += remainder;
			}
			partitions[*idx].size_sectors = s;
		}
	}

	// `offset_sectors` has held the gap since the end of the previous
	// partition up to here (`reserve` for the first partition, the
	// configured `offset` for the rest). Walk the partitions in order and
	// turn each gap into an absolute starting LBA, mirroring
	// `part_start + part->offset` / `part_start += part->size + part->offset`.
	let mut cursor = 0u64;
	for part in partitions.iter_mut() {
		cursor += part.offset_sectors;
		part.offset_sectors = cursor;
		cursor += part.size_sectors;
	}

	// clean
	let clean_cfg = lookup_list(m, "clean", &[]);
	let mut clean = Vec::new();
	for entry in clean_cfg {
		if let Some(cm) = entry.as_mapping() {
			let offset_sectors = lookup_sector(cm, "offset", sector_size, 0);
			let size_sectors = lookup_sector(cm, "size", sector_size, 0);
			if size_sectors == 0 {
				warn!("clean entry at offset {} has size 0, skipping", offset_sectors);
				continue;
			}
			clean.push(Clean { offset_sectors, size_sectors });
		}
	}

	// overlap check across partitions and raw binaries
	let mut ranges: Vec<(u64, u64)> = partitions.iter().map(|p| p.byte_range(sector_size)).collect();
	ranges.extend(raw.iter().map(|r| r.byte_range(sector_size)));
	for i in 0..ranges.len() {
		for j in (i + 1)..ranges.len() {
			if byte_overlap(ranges[i], ranges[j]) {
				return Err(anyhow!(ProvisionError::LayoutOverlap));
			}
		}
	}

	Ok(BlockPlan { disklabel, partitions, raw, clean, mmc })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::load_str;

	fn geom(total_sectors: u64) -> TargetGeometry {
		TargetGeometry { sector_size: 512, total_sectors, erase_block_bytes: 0 }
	}

	#[test]
	fn default_offsets_for_first_partition() {
		let doc = load_str(
			"disklabel: msdos\npartitions:\n  - filesystem: fat32\n    size: 1MiB\n",
		)
		.unwrap();
		let plan = plan_block(doc.as_mapping().unwrap(), geom(204800), Path::new("/tmp")).unwrap();
		assert_eq!(plan.partitions[0].offset_sectors, 1);
	}

	#[test]
	fn gpt_default_offset_is_34() {
		let doc = load_str("disklabel: gpt\npartitions:\n  - filesystem: fat32\n    size: 1MiB\n").unwrap();
		let plan = plan_block(doc.as_mapping().unwrap(), geom(204800), Path::new("/tmp")).unwrap();
		assert_eq!(plan.partitions[0].offset_sectors, 34);
	}

	#[test]
	fn offset_overrides_table_is_rejected() {
		let doc = load_str("disklabel: gpt\npartitions:\n  - filesystem: fat32\n    size: 1MiB\n    offset: 5\n").unwrap();
		assert!(plan_block(doc.as_mapping().unwrap(), geom(204800), Path::new("/tmp")).is_err());
	}

	#[test]
	fn zero_sized_non_expand_partition_is_rejected() {
		let doc = load_str("disklabel: msdos\npartitions:\n  - filesystem: fat32\n    size: 0\n").unwrap();
		assert!(plan_block(doc.as_mapping().unwrap(), geom(204800), Path::new("/tmp")).is_err());
	}

	#[test]
	fn expand_consumes_exact_residual() {
		let doc = load_str(
			"disklabel: gpt\npartitions:\n  - filesystem: ext4\n    size: 16MiB\n  - filesystem: ext4\n    expand: true\n",
		)
		.unwrap();
		let total_sectors = (256u64 * 1024 * 1024) / 512;
		let plan = plan_block(doc.as_mapping().unwrap(), geom(total_sectors), Path::new("/tmp")).unwrap();
		let fixed = plan.partitions[0].size_sectors + plan.partitions[0].offset_sectors;
		let expand_size = plan.partitions[1].size_sectors;
		assert_eq!(fixed + expand_size + 34, total_sectors);
	}

	#[test]
	fn successive_partitions_are_placed_back_to_back_not_overlapping() {
		let doc = load_str(
			"disklabel: msdos\npartitions:\n  - filesystem: fat32\n    size: 16MiB\n  - filesystem: ext4\n    size: 32MiB\n",
		)
		.unwrap();
		let plan = plan_block(doc.as_mapping().unwrap(), geom(204800), Path::new("/tmp")).unwrap();
		let p0 = &plan.partitions[0];
		let p1 = &plan.partitions[1];
		assert_eq!(p0.offset_sectors, 1);
		assert_eq!(p1.offset_sectors, p0.offset_sectors + p0.size_sectors);
		assert!(p1.offset_sectors >= p0.offset_sectors + p0.size_sectors);
	}
}
