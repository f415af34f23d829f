//! Package access: mounting a squashfs payload image read-only, locating
//! its layout descriptor, listing its contents, and creating new packages.
//!
//! Mount/scratch-point handling follows the same shape as partition
//! mounting elsewhere in this crate (`sys_mount::Mount::builder()` against
//! a freshly created directory); package creation shells `mksquashfs` the
//! same way filesystem creation shells `mkfs.*`.
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use walkdir::WalkDir;

use crate::utils::{cmd_run_check_status, ScopedMount};

pub struct MountedPackage {
	_mount: ScopedMount,
	root: PathBuf,
}

impl MountedPackage {
	/// Mounts `package_path` read-only at `scratch_root` and returns a
	/// handle whose `Drop` unmounts it.
	pub fn mount(package_path: &Path, scratch_root: &Path) -> Result<Self> {
		let mount = ScopedMount::mount_readonly(package_path, scratch_root, "squashfs")?;
		let root = mount.path().to_path_buf();
		Ok(Self { _mount: mount, root })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Finds the single `*.yml`/`*.yaml` file at the top level of the
	/// package - the layout descriptor.
	pub fn layout_path(&self) -> Result<PathBuf> {
		let mut candidates = Vec::new();
		for entry in std::fs::read_dir(&self.root)? {
			let entry = entry?;
			let name = entry.file_name();
			let name = name.to_string_lossy();
			if name.ends_with(".yml") || name.ends_with(".yaml") {
				candidates.push(entry.path());
			}
		}
		match candidates.len() {
			1 => Ok(candidates.remove(0)),
			0 => bail!("no layout descriptor (*.yml/*.yaml) found in package"),
			_ => bail!("multiple layout descriptors found in package; expected exactly one"),
		}
	}

	/// Lists the package's contents recursively, in filesystem-enumeration
	/// order (not sorted - matching the original's unspecified ordering,
	/// see DESIGN.md).
	pub fn list_contents(&self) -> Result<Vec<(PathBuf, u64)>> {
		let mut out = Vec::new();
		for entry in WalkDir::new(&self.root).min_depth(1) {
			let entry = entry.context("error walking package contents")?;
			if entry.file_type().is_file() {
				let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
				let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
				out.push((rel.to_path_buf(), size));
			}
		}
		Ok(out)
	}
}

/// Formats a byte count the way a human reads it: binary-prefixed,
/// one decimal place above 1 KiB.
pub fn format_size(bytes: u64) -> String {
	const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
	let mut size = bytes as f64;
	let mut unit = 0;
	while size >= 1024.0 && unit + 1 < UNITS.len() {
		size /= 1024.0;
		unit += 1;
	}
	if unit == 0 {
		format!("{}{}", bytes, UNITS[0])
	} else {
		format!("{:.1}{}", size, UNITS[unit])
	}
}

/// Builds a squashfs image at `output` containing `files`.
pub fn create_package(files: &[PathBuf], output: &Path) -> Result<()> {
	if files.is_empty() {
		bail!("no input files given to package");
	}
	let mut cmd = Command::new("mksquashfs");
	for f in files {
		cmd.arg(f);
	}
	cmd.arg(output);
	cmd.args(["-comp", "zstd", "-no-xattrs"]);
	cmd_run_check_status(&mut cmd).map_err(|e| anyhow!("failed to create package: {}", e))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn size_formatting() {
		assert_eq!(format_size(512), "512B");
		assert_eq!(format_size(2048), "2.0KiB");
		assert_eq!(format_size(1024 * 1024 * 3), "3.0MiB");
	}
}
