//! Filesystem creation and resize.
//!
//! The command-building shape (one `mkfs.*` binary per type, `-L`/`-n` for
//! the label flag) follows an image-building tool's `get_mkfs_cmdline`/
//! `format` directly; the type set itself is narrower since the layout
//! format only ever asks for FAT32 or one of the ext family.
use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Result};

use crate::utils::cmd_run_check_status;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FilesystemType {
	Ext2,
	Ext3,
	Ext4,
	Fat32,
	#[default]
	None,
}

impl FilesystemType {
	pub fn parse(s: &str) -> Result<Self> {
		match s {
			"ext2" => Ok(Self::Ext2),
			"ext3" => Ok(Self::Ext3),
			"ext4" => Ok(Self::Ext4),
			"fat32" => Ok(Self::Fat32),
			"" | "none" => Ok(Self::None),
			other => Err(anyhow!(crate::error::ProvisionError::UnknownFilesystem(
				other.to_string()
			))),
		}
	}

	pub fn is_ext(&self) -> bool {
		matches!(self, Self::Ext2 | Self::Ext3 | Self::Ext4)
	}

	pub fn check(&self, label: Option<&str>) -> Result<()> {
		if let Some(l) = label {
			match self {
				Self::Fat32 => {
					if !l.is_ascii() {
						bail!("FAT volume label can only contain ASCII characters.");
					}
					if l.len() > 11 {
						bail!("FAT volume labels can not be longer than 11 characters.");
					}
				}
				_ => {
					if l.len() > 16 {
						bail!("ext* volume labels can not be longer than 16 characters.");
					}
				}
			}
		}
		Ok(())
	}

	/// The name `mount(8)`/`sys-mount` expect for this type, as opposed to
	/// the `mkfs.*` binary name.
	pub fn os_fstype_name(&self) -> &'static str {
		match self {
			Self::Ext2 => "ext2",
			Self::Ext3 => "ext3",
			Self::Ext4 => "ext4",
			Self::Fat32 => "vfat",
			Self::None => "auto",
		}
	}

	fn mkfs_binary(&self) -> &'static str {
		match self {
			Self::Ext2 => "mkfs.ext2",
			Self::Ext3 => "mkfs.ext3",
			Self::Ext4 => "mkfs.ext4",
			Self::Fat32 => "mkfs.vfat",
			Self::None => unreachable!("caller must skip None filesystems"),
		}
	}

	pub fn mkfs_cmdline(
		&self,
		path: &Path,
		label: Option<&str>,
		extra_args: &[String],
	) -> Result<Command> {
		if self == &Self::None {
			bail!("instructed not to format this partition");
		}
		self.check(label)?;
		let mut cmd = Command::new(self.mkfs_binary());
		if self == &Self::Fat32 {
			cmd.arg("-F").arg("32");
		}
		if let Some(l) = label {
			cmd.arg(if self.is_ext() { "-L" } else { "-n" });
			cmd.arg(l);
		}
		cmd.args(extra_args);
		cmd.arg("--");
		cmd.arg(path);
		Ok(cmd)
	}

	pub fn format(&self, path: &Path, label: Option<&str>, extra_args: &[String]) -> Result<()> {
		let mut cmd = self.mkfs_cmdline(path, label, extra_args)?;
		cmd_run_check_status(&mut cmd).map_err(|_| anyhow!(crate::error::ProvisionError::MkfsFailed))
	}

	/// Grows an ext2/3/4 filesystem to fill its containing partition.
	/// Only legal for the ext family - the layout format has no FAT resize
	/// path, matching the original's restriction to `resize2fs`.
	pub fn resize_to_fill(&self, path: &Path) -> Result<()> {
		if !self.is_ext() {
			bail!("resize is only supported for ext2/3/4 filesystems");
		}
		let mut cmd = Command::new("resize2fs");
		cmd.arg(path);
		cmd_run_check_status(&mut cmd).map_err(|_| anyhow!(crate::error::ProvisionError::ResizeFailed))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_known_names() {
		assert_eq!(FilesystemType::parse("ext4").unwrap(), FilesystemType::Ext4);
		assert_eq!(FilesystemType::parse("fat32").unwrap(), FilesystemType::Fat32);
		assert_eq!(FilesystemType::parse("").unwrap(), FilesystemType::None);
	}

	#[test]
	fn rejects_unknown_names() {
		assert!(FilesystemType::parse("btrfs").is_err());
	}

	#[test]
	fn fat_label_length_is_checked() {
		assert!(FilesystemType::Fat32.check(Some("way-too-long-label")).is_err());
		assert!(FilesystemType::Ext4.check(Some("way-too-long-label")).is_err());
	}

	#[test]
	fn resize_rejects_fat() {
		assert!(FilesystemType::Fat32.resize_to_fill(Path::new("/dev/null")).is_err());
	}
}
