//! On-table partition type (the MBR byte or GPT GUID), as distinct from the
//! layout entity `Partition` in [`crate::plan`] or the `primary`/`logical`
//! placement field on it.
//!
//! The `Nested` variant some image-building type tables carry (nested
//! partition tables) has no counterpart here and is dropped, and a `Default`
//! variant is added so a partition can omit `type` entirely and still get a
//! sensible on-table type (Linux data) assigned.
use anyhow::{anyhow, Result};
use uuid::{uuid, Uuid};

use crate::error::ProvisionError;

pub const PARTTYPE_EFI_UUID: Uuid = uuid!("C12A7328-F81F-11D2-BA4B-00A0C93EC93B");
pub const PARTTYPE_LINUX_UUID: Uuid = uuid!("0FC63DAF-8483-4772-8E79-3D69D8477DE4");
pub const PARTTYPE_BASIC_UUID: Uuid = uuid!("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7");

pub const PARTTYPE_EFI_BYTE: u8 = 0xEF;
pub const PARTTYPE_LINUX_BYTE: u8 = 0x83;
pub const PARTTYPE_BASIC_BYTE: u8 = 0x07;
pub const PARTTYPE_EXTENDED_BYTE: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionType {
	/// Default on-table type for a data partition (Linux data on both
	/// schemes) when the layout does not ask for anything more specific.
	Linux,
	EFI,
	Basic,
	Uuid(Uuid),
	Byte(u8),
}

impl PartitionType {
	pub fn parse(s: &str) -> Result<Self> {
		match s {
			"" | "linux" => Ok(Self::Linux),
			"efi" | "esp" => Ok(Self::EFI),
			"basic" => Ok(Self::Basic),
			other => Err(anyhow!(ProvisionError::UnknownPartitionType(other.to_string()))),
		}
	}

	pub fn to_byte(&self) -> Result<u8> {
		match self {
			Self::Linux => Ok(PARTTYPE_LINUX_BYTE),
			Self::EFI => Ok(PARTTYPE_EFI_BYTE),
			Self::Basic => Ok(PARTTYPE_BASIC_BYTE),
			Self::Byte(0x05) | Self::Byte(0xc5) | Self::Byte(0x85) | Self::Byte(0x0f) => {
				Err(anyhow!("extended partition bytes are not allowed here"))
			}
			Self::Byte(b) => Ok(*b),
			Self::Uuid(_) => Err(anyhow!("can not convert an arbitrary UUID to an MBR byte")),
		}
	}

	pub fn to_uuid(&self) -> Result<Uuid> {
		match self {
			Self::Linux => Ok(PARTTYPE_LINUX_UUID),
			Self::EFI => Ok(PARTTYPE_EFI_UUID),
			Self::Basic => Ok(PARTTYPE_BASIC_UUID),
			Self::Uuid(u) => Ok(*u),
			Self::Byte(_) => Err(anyhow!("can not convert an MBR byte to a GUID")),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_known_names() {
		assert_eq!(PartitionType::parse("efi").unwrap(), PartitionType::EFI);
		assert_eq!(PartitionType::parse("esp").unwrap(), PartitionType::EFI);
		assert_eq!(PartitionType::parse("").unwrap(), PartitionType::Linux);
	}

	#[test]
	fn rejects_extended_bytes() {
		assert!(PartitionType::Byte(0x05).to_byte().is_err());
		assert!(PartitionType::Byte(0x0c).to_byte().is_ok());
	}
}
