//! Error taxonomy for the provisioner.
//!
//! Every fallible path raises one of these through `anyhow`, usually with
//! `.context(...)` attached by the caller to build the prefix chain that
//! ends up on stderr (see `main.rs`).
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
	// Input side
	#[error("failed to parse configuration")]
	ConfigParseFailed,
	#[error("configuration document root must be a mapping")]
	ConfigInvalidRoot,
	#[error("configuration api-version is not supported by this build")]
	ConfigApiIncompatible,
	#[error("configuration violates the expected schema: {0}")]
	ConfigSchemaViolation(String),

	// Planner
	#[error("disklabel '{0}' is not supported")]
	UnsupportedDisklabel(String),
	#[error("unknown partition type '{0}'")]
	UnknownPartitionType(String),
	#[error("unknown filesystem '{0}'")]
	UnknownFilesystem(String),
	#[error("partition has zero size and is not marked to expand")]
	ZeroSizedPartition,
	#[error("partition offset overrides the partition table reserve")]
	OffsetOverridesTable,
	#[error("layout contains overlapping byte ranges")]
	LayoutOverlap,
	#[error("expand is only legal on the terminal partition")]
	NonTerminalExpand,
	#[error("partition is not aligned to the erase block size")]
	UnalignedPartition,

	// Execution
	#[error("failed to open backing device {0}")]
	DeviceOpenFailed(String),
	#[error("backing device is busy (a partition is mounted)")]
	DeviceBusy,
	#[error("{0} is not a whole disk")]
	NotAWholeDisk(String),
	#[error("partition nodes did not appear before the timeout")]
	PartitionsNotReady,
	#[error("write to device failed")]
	WriteFailed,
	#[error("mount failed")]
	MountFailed,
	#[error("unmount failed")]
	UmountFailed,
	#[error("mkfs failed")]
	MkfsFailed,
	#[error("filesystem resize failed")]
	ResizeFailed,
	#[error("archive extraction failed")]
	ArchiveFailed,
	#[error("MMC ioctl failed")]
	MmcIoctlFailed,

	// Verification
	#[error("checksum mismatch for {0}")]
	ChecksumMismatch(String),
	#[error("input file is missing: {0}")]
	InputMissing(String),

	// Dispatcher
	#[error("unknown command '{0}'")]
	UnknownCommand(String),
	#[error("bad argument: {0}")]
	BadValue(String),
	#[error("this command must be run as root")]
	MustBeRoot,
}
