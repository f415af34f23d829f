//! The three-phase execution engine: init device, create partitions, write
//! data. Backends are a closed sum type rather than an abstract base with
//! virtual phases - see module docs on [`ExecutionPhases`] for why.
pub mod block;
pub mod flash;
pub mod mmc;

use std::path::PathBuf;

use anyhow::Result;

use crate::device::BlockDevice;
use crate::plan::{BlockPlan, FlashPlan, Plan};

#[derive(Debug, Clone)]
pub struct ExecutionContext {
	pub device_path: PathBuf,
	pub device_sector_size: u64,
	pub device_total_sectors: u64,
	pub prefix_path: PathBuf,
	pub skip_checksums: bool,
	pub mount_scratch_root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
	Start,
	Initialised,
	Partitioned,
	Filled,
	Cleaned,
	RawWritten,
	MmcConfigured,
	Done,
}

/// The three phases every backend must implement. No default method
/// bodies and no runtime downcast: a backend that forgets one is a compile
/// error, replacing an abstract-base-with-virtual-phases shape with a
/// closed sum type (see SPEC_FULL.md section 4.5a).
pub trait ExecutionPhases {
	fn init_device(&self, ctx: &ExecutionContext) -> Result<()>;
	fn create_partitions(&self, ctx: &ExecutionContext) -> Result<block::PlacementMap>;
	fn write_data(&self, ctx: &ExecutionContext, placement: &block::PlacementMap) -> Result<()>;
}

pub enum DeviceBackend<'a> {
	Block(&'a BlockPlan),
	RawFlash(&'a FlashPlan),
}

impl<'a> DeviceBackend<'a> {
	pub fn from_plan(plan: &'a Plan) -> Self {
		match plan {
			Plan::Block(p) => DeviceBackend::Block(p),
			Plan::RawFlash(p) => DeviceBackend::RawFlash(p),
		}
	}

	/// Runs all three phases in order, mirroring a single `execute()`
	/// pipeline but over the provisioner's own phase shape.
	pub fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionState> {
		match self {
			DeviceBackend::Block(plan) => block::run(ctx, plan),
			DeviceBackend::RawFlash(plan) => flash::run(ctx, plan),
		}
	}
}

pub fn open_device(ctx: &ExecutionContext) -> Result<BlockDevice> {
	BlockDevice::open(&ctx.device_path)
}
