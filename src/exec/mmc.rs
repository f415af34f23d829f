//! eMMC-specific configuration: HW_RESET/BOOTBUS_CONDITIONS registers and
//! the dual boot-partition write protocol. Register writes are shelled out
//! to `mmc` (mmc-utils) the same way filesystem creation shells `mkfs.*` -
//! there is no stable in-tree crate for EXT_CSD manipulation.
use std::path::Path;

use anyhow::{anyhow, Result};
use log::info;

use crate::device::BlockDevice;
use crate::error::ProvisionError;
use crate::plan::{BootPartitionEnable, MmcControls};
use crate::utils::{cmd_run_check_status, BootPartWritable};

use super::ExecutionContext;

pub fn apply(ctx: &ExecutionContext, dev: &BlockDevice, controls: &MmcControls) -> Result<()> {
	if let Some(hwreset) = controls.hwreset {
		info!("Setting HW_RESET to {} ...", hwreset);
		run_mmc(&["hwreset", if hwreset != 0 { "enable" } else { "disable" }], &ctx.device_path)?;
	}

	if let Some(bootbus) = controls.bootbus {
		info!("Setting BOOTBUS_CONDITIONS to {} ...", bootbus);
		run_mmc(&["bootbus", "set", &bootbus.to_string(), "0", "0"], &ctx.device_path)?;
	}

	if let Some(boot) = &controls.boot_partitions {
		// Both physical boot partitions get every binary regardless of which
		// one `enable` designates active; `enable` only selects the
		// ACTIVE_BOOT_PARTITION register afterward.
		write_boot_partition(ctx, dev, 0, boot)?;
		write_boot_partition(ctx, dev, 1, boot)?;
		run_mmc(
			&["bootpart", "enable", &boot_index_arg(boot.enable), &(boot.boot_ack as u8).to_string()],
			&ctx.device_path,
		)?;
	}

	Ok(())
}

fn boot_index_arg(enable: BootPartitionEnable) -> String {
	match enable {
		BootPartitionEnable::Disabled => "0".to_string(),
		BootPartitionEnable::Boot0 => "1".to_string(),
		BootPartitionEnable::Boot1 => "2".to_string(),
	}
}

fn write_boot_partition(
	ctx: &ExecutionContext,
	dev: &BlockDevice,
	boot_index: u8,
	boot: &crate::plan::BootPartitions,
) -> Result<()> {
	use std::io::{Read, Seek, SeekFrom, Write};

	let node = dev.boot_partition_node(boot_index);
	let sysfs_dir = Path::new("/sys/block").join(
		node.file_name().ok_or_else(|| anyhow!("boot partition node has no file name"))?,
	);
	let _writable = BootPartWritable::acquire(&sysfs_dir)?;

	for raw in &boot.binaries {
		if !ctx.skip_checksums && !raw.input.checksums.is_empty() {
			crate::verify::verify_file(&raw.input.filename, &raw.input.checksums)?;
		}
		let mut src = std::fs::File::open(&raw.input.filename)?;
		let mut dst = std::fs::File::options().write(true).open(&node)?;
		src.seek(SeekFrom::Start(raw.input_offset_sectors * dev.sector_size))?;
		dst.seek(SeekFrom::Start(raw.output_offset_sectors * dev.sector_size))?;
		let mut buf = vec![0u8; 1 << 20];
		loop {
			let n = src.read(&mut buf)?;
			if n == 0 {
				break;
			}
			dst.write_all(&buf[..n]).map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
		}
	}
	Ok(())
}

fn run_mmc(args: &[&str], device_path: &Path) -> Result<()> {
	let mut cmd = std::process::Command::new("mmc");
	cmd.args(args).arg(device_path);
	cmd_run_check_status(&mut cmd).map_err(|_| anyhow!(ProvisionError::MmcIoctlFailed))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn boot_index_arg_matches_mmc_utils_convention() {
		assert_eq!(boot_index_arg(BootPartitionEnable::Disabled), "0");
		assert_eq!(boot_index_arg(BootPartitionEnable::Boot0), "1");
		assert_eq!(boot_index_arg(BootPartitionEnable::Boot1), "2");
	}
}
