//! The frozen output of planning: the types the execution engine consumes
//! and nothing else. Planner modules under `planner/` build these; nothing
//! downstream of `Plan` ever looks back at a `ConfigValue`.
use std::path::PathBuf;

use crate::filesystem::FilesystemType;
use crate::parttype::PartitionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgo {
	Md5,
	Sha256,
}

#[derive(Debug, Clone)]
pub struct Checksum {
	pub algo: ChecksumAlgo,
	pub hex: String,
}

/// A file referenced by a layout entry, resolved against the mounted
/// package (or `--prefix`).
#[derive(Debug, Clone)]
pub struct Input {
	pub filename: PathBuf,
	pub checksums: Vec<Checksum>,
	pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionPlacement {
	Primary,
	Logical,
}

#[derive(Debug, Clone)]
pub struct Partition {
	pub number: u32,
	pub label: Option<String>,
	pub partuuid: Option<uuid::Uuid>,
	pub placement: PartitionPlacement,
	pub part_type: PartitionType,
	pub filesystem: FilesystemType,
	pub mkfs_extra_args: Vec<String>,
	pub size_sectors: u64,
	pub offset_sectors: u64,
	pub block_size_sectors: u64,
	pub expand: bool,
	pub flags: Vec<String>,
	pub inputs: Vec<Input>,
}

impl Partition {
	pub fn byte_range(&self, sector_size: u64) -> (u64, u64) {
		let start = self.offset_sectors * sector_size;
		let end = start + self.size_sectors * sector_size;
		(start, end)
	}
}

#[derive(Debug, Clone)]
pub struct RawBinary {
	pub input: Input,
	pub input_offset_sectors: u64,
	pub output_offset_sectors: u64,
}

impl RawBinary {
	pub fn write_len_bytes(&self, sector_size: u64) -> u64 {
		self.input.size.saturating_sub(self.input_offset_sectors * sector_size)
	}

	pub fn byte_range(&self, sector_size: u64) -> (u64, u64) {
		let start = self.output_offset_sectors * sector_size;
		(start, start + self.write_len_bytes(sector_size))
	}
}

#[derive(Debug, Clone)]
pub struct Clean {
	pub offset_sectors: u64,
	pub size_sectors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPartitionEnable {
	Disabled,
	Boot0,
	Boot1,
}

impl BootPartitionEnable {
	pub fn from_int(n: i64) -> Option<Self> {
		match n {
			0 => Some(Self::Disabled),
			1 => Some(Self::Boot0),
			2 => Some(Self::Boot1),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct BootPartitions {
	pub enable: BootPartitionEnable,
	pub boot_ack: bool,
	pub binaries: Vec<RawBinary>,
}

#[derive(Debug, Clone, Default)]
pub struct MmcControls {
	pub hwreset: Option<i64>,
	pub bootbus: Option<i64>,
	pub boot_partitions: Option<BootPartitions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisklabelKind {
	Mbr,
	Gpt,
	None,
}

/// A raw-flash (MTD) partition; no on-table type, no filesystem UUIDs.
#[derive(Debug, Clone)]
pub struct FlashPartition {
	pub name: String,
	pub size_bytes: u64,
	pub offset_bytes: u64,
	pub erase: bool,
	pub expand: bool,
	pub input: Option<Input>,
}

#[derive(Debug, Clone)]
pub struct BlockPlan {
	pub disklabel: DisklabelKind,
	pub partitions: Vec<Partition>,
	pub raw: Vec<RawBinary>,
	pub clean: Vec<Clean>,
	pub mmc: Option<MmcControls>,
}

#[derive(Debug, Clone)]
pub struct FlashPlan {
	pub partitions: Vec<FlashPartition>,
}

#[derive(Debug, Clone)]
pub enum Plan {
	Block(BlockPlan),
	RawFlash(FlashPlan),
}
