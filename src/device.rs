//! Backing-device abstraction: opening the device, reading its geometry,
//! naming its partition nodes, and writing the partition table itself.
//!
//! The GPT/MBR table-writing here drives `gptman`/`mbrman` the same way an
//! image-building tool would drive them against a loop-backed image, except
//! these functions write to whatever `device_path` resolves to - a loop
//! device during tests, a real block device in the field.
use std::collections::HashMap;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use gptman::{GPTPartitionEntry, GPT};
use mbrman::{CHS, MBR};
use rand::Rng;
use uuid::Uuid;

use crate::error::ProvisionError;
use crate::plan::{Partition, PartitionPlacement};

/// Sector size and total sector count for the device under provisioning,
/// plus enough geometry to name partition nodes and size expand partitions.
#[derive(Debug, Clone)]
pub struct BlockDevice {
	pub path: PathBuf,
	pub sector_size: u64,
	pub total_sectors: u64,
}

impl BlockDevice {
	pub fn open(path: &Path) -> Result<Self> {
		let f = File::options()
			.read(true)
			.write(true)
			.open(path)
			.map_err(|_| anyhow!(ProvisionError::DeviceOpenFailed(path.display().to_string())))?;
		let sector_size = blksszget(&f).unwrap_or(512);
		let total_sectors = blkgetsize64(&f)? / sector_size;
		Ok(Self {
			path: path.to_path_buf(),
			sector_size,
			total_sectors,
		})
	}

	/// Path to partition `num`, following the `p`-insertion convention for
	/// device names ending in a digit (`/dev/loop0` -> `/dev/loop0p1`,
	/// `/dev/mmcblk0` -> `/dev/mmcblk0p1`, but `/dev/sda` -> `/dev/sda1`).
	pub fn partition_node(&self, num: u32) -> PathBuf {
		let name = self.path.to_string_lossy();
		let needs_p = name.chars().last().map(|c| c.is_ascii_digit()).unwrap_or(false);
		if needs_p {
			PathBuf::from(format!("{}p{}", name, num))
		} else {
			PathBuf::from(format!("{}{}", name, num))
		}
	}

	pub fn boot_partition_node(&self, boot_index: u8) -> PathBuf {
		PathBuf::from(format!("{}boot{}", self.path.to_string_lossy(), boot_index))
	}
}

fn blksszget(f: &File) -> Result<u64> {
	let mut val: libc::c_int = 0;
	let ret = unsafe { libc::ioctl(f.as_raw_fd(), 0x1268 /* BLKSSZGET */, &mut val) };
	if ret != 0 {
		return Err(anyhow!("BLKSSZGET ioctl failed"));
	}
	Ok(val as u64)
}

fn blkgetsize64(f: &File) -> Result<u64> {
	let mut val: u64 = 0;
	let ret = unsafe { libc::ioctl(f.as_raw_fd(), 0x80081272u64 /* BLKGETSIZE64 */, &mut val) };
	if ret != 0 {
		return Err(anyhow!("BLKGETSIZE64 ioctl failed"));
	}
	Ok(val)
}

/// Per-partition identifiers populated by table creation, consumed later to
/// populate e.g. fstab-style references or test assertions.
#[derive(Debug, Clone, Default)]
pub struct PlacementEntry {
	pub partuuid: Option<Uuid>,
	pub fs_uuid: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PlacementMap {
	pub entries: HashMap<u32, PlacementEntry>,
}

/// Writes a GPT table. Primary entries (1-based) map directly onto GPT
/// partition indices; there is no logical/extended concept on GPT.
pub fn write_gpt(device: &BlockDevice, partitions: &[Partition]) -> Result<PlacementMap> {
	let mut f = File::options().read(true).write(true).open(&device.path)?;
	let mut gpt = GPT::new_from(&mut f, device.sector_size as u32, *Uuid::new_v4().as_bytes())
		.context("failed to initialise a GPT header")?;

	let mut placement = PlacementMap::default();
	for part in partitions {
		let partition_uuid = part.partuuid.unwrap_or_else(Uuid::new_v4);
		let type_guid = part.part_type.to_uuid()?;
		let starting_lba = part.offset_sectors;
		let ending_lba = starting_lba + part.size_sectors - 1;
		gpt[part.number] = GPTPartitionEntry {
			partition_type_guid: type_guid.to_bytes_le(),
			unique_partition_guid: partition_uuid.to_bytes_le(),
			starting_lba,
			ending_lba,
			attribute_bits: 0,
			partition_name: part.label.clone().unwrap_or_default().into(),
		};
		placement.entries.insert(
			part.number,
			PlacementEntry { partuuid: Some(partition_uuid), fs_uuid: None },
		);
	}

	gpt.write_into(&mut f).map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
	GPT::write_protective_mbr_into(&mut f, device.sector_size as u32)
		.map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
	Ok(placement)
}

/// Writes an MBR table. Partitions 1-4 are written as primary entries;
/// partitions numbered 5+ require an extended container, which the planner
/// (`planner::block`) has already allocated space for before calling here.
pub fn write_mbr(device: &BlockDevice, partitions: &[Partition], extended: Option<(u64, u64)>) -> Result<PlacementMap> {
	let mut f = File::options().read(true).write(true).open(&device.path)?;
	let disk_signature: [u8; 4] = rand::thread_rng().gen();
	let mut mbr =
		MBR::new_from(&mut f, device.sector_size as u32, disk_signature).context("failed to initialise an MBR header")?;

	let mut placement = PlacementMap::default();
	let mut has_boot = false;
	for part in partitions.iter().filter(|p| p.placement == PartitionPlacement::Primary) {
		let boot = !has_boot && part.flags.iter().any(|f| f == "boot");
		has_boot = has_boot || boot;
		mbr[part.number as usize] = mbrman::MBRPartitionEntry {
			boot: if boot { mbrman::BOOT_ACTIVE } else { mbrman::BOOT_INACTIVE },
			first_chs: CHS::empty(),
			sys: part.part_type.to_byte()?,
			last_chs: CHS::empty(),
			starting_lba: part.offset_sectors as u32,
			sectors: part.size_sectors as u32,
		};
		placement.entries.insert(part.number, PlacementEntry::default());
	}
	if let Some((start, size)) = extended {
		mbr[4] = mbrman::MBRPartitionEntry {
			boot: mbrman::BOOT_INACTIVE,
			first_chs: CHS::empty(),
			sys: 0x0f,
			last_chs: CHS::empty(),
			starting_lba: start as u32,
			sectors: size as u32,
		};
	}
	mbr.write_into(&mut f).map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
	Ok(placement)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partition_node_inserts_p_for_digit_suffixed_names() {
		let dev = BlockDevice { path: PathBuf::from("/dev/loop0"), sector_size: 512, total_sectors: 1 };
		assert_eq!(dev.partition_node(1), PathBuf::from("/dev/loop0p1"));
	}

	#[test]
	fn partition_node_plain_for_letter_suffixed_names() {
		let dev = BlockDevice { path: PathBuf::from("/dev/sda"), sector_size: 512, total_sectors: 1 };
		assert_eq!(dev.partition_node(1), PathBuf::from("/dev/sda1"));
	}
}
