//! Execution phases for block-device layouts. Heavily adapted from an
//! image-building tool's `execute()` pipeline shape (init -> partition ->
//! mount+populate -> unmount), with the domain-specific OS-image steps
//! (distribution bootstrap, chroot postinst, compression) replaced by the
//! provisioner's own write actions.
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use log::{debug, info, warn};

pub use crate::device::PlacementMap;
use crate::device::{self, BlockDevice};
use crate::error::ProvisionError;
use crate::filesystem::FilesystemType;
use crate::plan::{BlockPlan, DisklabelKind, Input, Partition, PartitionPlacement, RawBinary};
use crate::utils::ScopedMount;
use crate::verify::{verify_file, verify_raw};

use super::{mmc, ExecutionContext, ExecutionPhases, ExecutionState};

const PARTITION_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

impl ExecutionPhases for BlockPlan {
	fn init_device(&self, ctx: &ExecutionContext) -> Result<()> {
		init_device(ctx, self)
	}

	fn create_partitions(&self, ctx: &ExecutionContext) -> Result<PlacementMap> {
		create_partitions(ctx, self)
	}

	fn write_data(&self, ctx: &ExecutionContext, placement: &PlacementMap) -> Result<()> {
		write_data(ctx, self, placement)
	}
}

pub fn run(ctx: &ExecutionContext, plan: &BlockPlan) -> Result<ExecutionState> {
	if is_device_busy(&ctx.device_path)? {
		return Err(anyhow!(ProvisionError::DeviceBusy));
	}

	plan.init_device(ctx)?;
	let placement = plan.create_partitions(ctx)?;

	if let Err(e) = plan.write_data(ctx, &placement) {
		warn!("write phase failed, attempting best-effort unmount of {}", ctx.device_path.display());
		let _ = crate::utils::cmd_run_check_status(
			std::process::Command::new("umount").arg("--all-targets").arg(&ctx.device_path),
		);
		return Err(e);
	}

	Ok(ExecutionState::Done)
}

fn is_device_busy(path: &Path) -> Result<bool> {
	let mounts = std::fs::read_to_string("/proc/mounts").unwrap_or_default();
	let prefix = path.to_string_lossy().to_string();
	Ok(mounts.lines().any(|line| {
		line.split_whitespace()
			.next()
			.map(|dev| dev.starts_with(&prefix))
			.unwrap_or(false)
	}))
}

fn init_device(ctx: &ExecutionContext, plan: &BlockPlan) -> Result<()> {
	if plan.disklabel == DisklabelKind::None {
		return Ok(());
	}
	info!("Initialising device {} ...", ctx.device_path.display());
	Ok(())
}

fn create_partitions(ctx: &ExecutionContext, plan: &BlockPlan) -> Result<PlacementMap> {
	if plan.disklabel == DisklabelKind::None {
		return Ok(PlacementMap::default());
	}
	let dev = BlockDevice::open(&ctx.device_path)?;
	info!("Writing {:?} partition table ...", plan.disklabel);

	let placement = match plan.disklabel {
		DisklabelKind::Gpt => device::write_gpt(&dev, &plan.partitions)?,
		DisklabelKind::Mbr => {
			let logical: Vec<&Partition> = plan
				.partitions
				.iter()
				.filter(|p| p.placement == PartitionPlacement::Logical)
				.collect();
			let extended = if logical.is_empty() {
				None
			} else {
				let start = logical.iter().map(|p| p.offset_sectors - 2).min().unwrap();
				let end = logical.iter().map(|p| p.offset_sectors + p.size_sectors).max().unwrap();
				Some((start, end - start))
			};
			device::write_mbr(&dev, &plan.partitions, extended)?
		}
		DisklabelKind::None => unreachable!(),
	};

	crate::utils::refresh_partition_table(&ctx.device_path)?;
	wait_for_partitions(&dev, &plan.partitions)?;
	Ok(placement)
}

fn wait_for_partitions(dev: &BlockDevice, partitions: &[Partition]) -> Result<()> {
	let start = Instant::now();
	loop {
		let all_present = partitions.iter().all(|p| dev.partition_node(p.number).exists());
		if all_present {
			return Ok(());
		}
		if start.elapsed() > PARTITION_WAIT_TIMEOUT {
			return Err(anyhow!(ProvisionError::PartitionsNotReady));
		}
		std::thread::sleep(Duration::from_millis(100));
	}
}

fn write_data(ctx: &ExecutionContext, plan: &BlockPlan, _placement: &PlacementMap) -> Result<()> {
	let dev = BlockDevice::open(&ctx.device_path)?;

	for part in &plan.partitions {
		if part.filesystem == FilesystemType::None {
			continue;
		}
		let node = dev.partition_node(part.number);
		debug!("Formatting {} as {:?}", node.display(), part.filesystem);
		part.filesystem.format(&node, part.label.as_deref(), &part.mkfs_extra_args)?;

		for input in &part.inputs {
			if !ctx.skip_checksums && !input.checksums.is_empty() {
				verify_file(&input.filename, &input.checksums)?;
			}
			place_input(ctx, &node, part.filesystem, input)?;
		}
	}

	for clean in &plan.clean {
		info!("Clearing {} sectors at offset {} ...", clean.size_sectors, clean.offset_sectors);
		zero_range(&ctx.device_path, clean.offset_sectors * dev.sector_size, clean.size_sectors * dev.sector_size)?;
	}

	for raw in &plan.raw {
		write_raw_binary(ctx, &dev, raw)?;
	}

	if let Some(controls) = &plan.mmc {
		mmc::apply(ctx, &dev, controls)?;
	}

	Ok(())
}

fn place_input(ctx: &ExecutionContext, node: &Path, fstype: FilesystemType, input: &Input) -> Result<()> {
	let name = input.filename.to_string_lossy();
	if name.contains(".tar") {
		let scratch = ctx.mount_scratch_root.join(format!("extract-{}", node.file_name().unwrap().to_string_lossy()));
		let mount = ScopedMount::mount(node, &scratch, fstype.os_fstype_name())?;
		let mut cmd = std::process::Command::new("tar");
		cmd.args(["-xf"])
			.arg(&input.filename)
			.args(["--xattrs", "--acls", "--same-owner", "-C"])
			.arg(mount.path());
		crate::utils::cmd_run_check_status(&mut cmd).map_err(|_| anyhow!(ProvisionError::ArchiveFailed))
	} else if name.ends_with(".ext2") || name.ends_with(".ext3") || name.ends_with(".ext4") {
		std::fs::copy(&input.filename, node).map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
		fstype.resize_to_fill(node)?;
		Ok(())
	} else {
		let scratch = ctx.mount_scratch_root.join(format!("copy-{}", node.file_name().unwrap().to_string_lossy()));
		let mount = ScopedMount::mount(node, &scratch, fstype.os_fstype_name())?;
		let dst_name = input.filename.file_name().ok_or_else(|| anyhow!("input has no file name"))?;
		std::fs::copy(&input.filename, mount.path().join(dst_name))
			.map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
		Ok(())
	}
}

fn zero_range(device_path: &Path, offset: u64, len: u64) -> Result<()> {
	use std::io::{Seek, SeekFrom, Write};
	let mut f = std::fs::File::options().write(true).open(device_path)?;
	f.seek(SeekFrom::Start(offset))?;
	let buf = vec![0u8; 1 << 20];
	let mut remaining = len;
	while remaining > 0 {
		let n = remaining.min(buf.len() as u64) as usize;
		f.write_all(&buf[..n])?;
		remaining -= n as u64;
	}
	Ok(())
}

fn write_raw_binary(ctx: &ExecutionContext, dev: &BlockDevice, raw: &RawBinary) -> Result<()> {
	use std::io::{Read, Seek, SeekFrom, Write};

	if !ctx.skip_checksums && !raw.input.checksums.is_empty() {
		crate::verify::verify_file(&raw.input.filename, &raw.input.checksums)?;
	}

	let mut src = std::fs::File::open(&raw.input.filename)?;
	let mut dst = std::fs::File::options().write(true).open(&ctx.device_path)?;

	let input_offset_bytes = raw.input_offset_sectors * dev.sector_size;
	let output_offset_bytes = raw.output_offset_sectors * dev.sector_size;
	let len = raw.write_len_bytes(dev.sector_size);

	src.seek(SeekFrom::Start(input_offset_bytes))?;
	dst.seek(SeekFrom::Start(output_offset_bytes))?;

	let mut buf = vec![0u8; 1 << 20];
	let mut remaining = len;
	while remaining > 0 {
		let to_read = remaining.min(buf.len() as u64) as usize;
		let n = src.read(&mut buf[..to_read])?;
		if n == 0 {
			break;
		}
		dst.write_all(&buf[..n]).map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
		remaining -= n as u64;
	}

	if !ctx.skip_checksums && !raw.input.checksums.is_empty() {
		verify_raw(&ctx.device_path, output_offset_bytes, len, &raw.input.checksums)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_range_writes_expected_length() {
		let dir = std::env::temp_dir().join("partup-zero-test");
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("disk.img");
		crate::utils::create_sparse_file(&path, 1 << 20).unwrap();
		zero_range(&path, 512, 4096).unwrap();
		let meta = std::fs::metadata(&path).unwrap();
		assert_eq!(meta.len(), 1 << 20);
		std::fs::remove_dir_all(&dir).ok();
	}
}
