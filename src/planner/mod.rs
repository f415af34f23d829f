//! Layout planning: turns a validated [`crate::value::ConfigValue`] tree
//! into a frozen [`crate::plan::Plan`].
pub mod block;
pub mod flash;

use anyhow::Result;

use crate::plan::Plan;
use crate::value::ConfigValue;

/// Geometry the planner needs from the target, independent of how it was
/// obtained (a real device in the field, a sparse file in tests).
#[derive(Debug, Clone, Copy)]
pub struct TargetGeometry {
	pub sector_size: u64,
	pub total_sectors: u64,
	/// Erase-block size in bytes; only meaningful for the raw-flash planner.
	pub erase_block_bytes: u64,
}

/// Root entry point: decides block vs. raw-flash from whether `disklabel`
/// (or a raw-flash-only key) is present, and dispatches accordingly. The
/// distilled root config always carries enough shape to tell the two apart:
/// raw-flash layouts use top-level `mtd-partitions`, block layouts use
/// `disklabel`/`partitions`/`raw`/`clean`/`mmc`.
pub fn build_plan(root: &ConfigValue, geometry: TargetGeometry, prefix: &std::path::Path) -> Result<Plan> {
	let map = root
		.as_mapping()
		.ok_or_else(|| anyhow::anyhow!(crate::error::ProvisionError::ConfigInvalidRoot))?;
	if map.contains_key("mtd-partitions") {
		Ok(Plan::RawFlash(flash::plan_raw_flash(map, geometry, prefix)?))
	} else {
		Ok(Plan::Block(block::plan_block(map, geometry, prefix)?))
	}
}
