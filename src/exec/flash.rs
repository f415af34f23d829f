//! Execution phases for raw-flash (MTD) layouts. There is no partition
//! table to write - `init_device`/`create_partitions` only enumerate and
//! validate existing MTD device nodes; all the real work happens in
//! `write_data`.
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use log::info;

use crate::error::ProvisionError;
use crate::plan::{FlashPartition, FlashPlan};

use super::block::PlacementMap;
use super::{ExecutionContext, ExecutionPhases, ExecutionState};

impl ExecutionPhases for FlashPlan {
	fn init_device(&self, _ctx: &ExecutionContext) -> Result<()> {
		Ok(())
	}

	fn create_partitions(&self, _ctx: &ExecutionContext) -> Result<PlacementMap> {
		Ok(PlacementMap::default())
	}

	fn write_data(&self, ctx: &ExecutionContext, _placement: &PlacementMap) -> Result<()> {
		for part in &self.partitions {
			if part.erase {
				info!("Erasing mtd region '{}' at offset {} ...", part.name, part.offset_bytes);
				erase_region(&ctx.device_path, part.offset_bytes, part.size_bytes)?;
			}
			if let Some(input) = &part.input {
				if !ctx.skip_checksums && !input.checksums.is_empty() {
					crate::verify::verify_file(&input.filename, &input.checksums)?;
				}
				write_input(&ctx.device_path, part, &input.filename)?;
				if !ctx.skip_checksums && !input.checksums.is_empty() {
					crate::verify::verify_raw(&ctx.device_path, part.offset_bytes, input.size, &input.checksums)?;
				}
			}
		}
		Ok(())
	}
}

pub fn run(ctx: &ExecutionContext, plan: &FlashPlan) -> Result<ExecutionState> {
	plan.init_device(ctx)?;
	let placement = plan.create_partitions(ctx)?;
	plan.write_data(ctx, &placement)?;
	Ok(ExecutionState::Done)
}

fn erase_region(device_path: &std::path::Path, offset: u64, len: u64) -> Result<()> {
	let mut f = std::fs::File::options().write(true).open(device_path)?;
	f.seek(SeekFrom::Start(offset))?;
	let buf = vec![0xffu8; 1 << 16];
	let mut remaining = len;
	while remaining > 0 {
		let n = remaining.min(buf.len() as u64) as usize;
		f.write_all(&buf[..n]).map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
		remaining -= n as u64;
	}
	Ok(())
}

fn write_input(device_path: &std::path::Path, part: &FlashPartition, input: &PathBuf) -> Result<()> {
	let mut src = std::fs::File::open(input)?;
	let mut dst = std::fs::File::options().write(true).open(device_path)?;
	dst.seek(SeekFrom::Start(part.offset_bytes))?;
	let mut buf = vec![0u8; 1 << 20];
	loop {
		let n = src.read(&mut buf)?;
		if n == 0 {
			break;
		}
		dst.write_all(&buf[..n]).map_err(|_| anyhow!(ProvisionError::WriteFailed))?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn erase_region_fills_with_0xff() {
		let dir = std::env::temp_dir().join("partup-erase-test");
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("mtd.img");
		crate::utils::create_sparse_file(&path, 1 << 16).unwrap();
		erase_region(&path, 0, 1 << 16).unwrap();
		let data = std::fs::read(&path).unwrap();
		assert!(data.iter().all(|&b| b == 0xff));
		std::fs::remove_dir_all(&dir).ok();
	}
}
