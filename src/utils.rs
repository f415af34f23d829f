//! Small OS-facing helpers and the scoped-resource guards used by the
//! execution engine.
use std::ffi::{c_int, c_void, CString};
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use blkid::prober::ProbeState;
use libc::{close, open, O_NONBLOCK, O_RDONLY};
use log::{debug, warn};
use loopdev::LoopDevice;
use sys_mount::{unmount, Mount, UnmountFlags};

#[link(name = "c")]
extern "C" {
	#[allow(dead_code)]
	pub fn geteuid() -> c_int;
	#[allow(dead_code)]
	pub fn sync() -> c_void;
	pub fn syncfs(fd: c_int) -> c_int;
}

/// Creates a sparse file of exactly `size` bytes, used as the backing
/// store for a loop-attached block device.
pub fn create_sparse_file<P: AsRef<Path>>(path: P, size: u64) -> Result<()> {
	let img_path = path.as_ref();
	let parent = img_path.parent().unwrap_or(Path::new("/"));
	if !parent.exists() {
		return Err(anyhow!(
			"one or more parent directories of '{}' do not exist",
			img_path.display()
		));
	}
	debug!("creating sparse file at '{}' with size {} bytes", img_path.display(), size);
	let mut f = File::create_new(img_path)
		.with_context(|| format!("creating raw image file '{}'", img_path.display()))?;
	f.seek(std::io::SeekFrom::Start(size - 1))?;
	f.write_all(&[0])
		.context("failed to punch a hole for the sparse file; does the filesystem support them?")?;
	f.sync_all()?;
	Ok(())
}

/// Tells the kernel to reread the partition table on `dev`.
pub fn refresh_partition_table<P: AsRef<Path>>(dev: P) -> Result<()> {
	debug!("refreshing partition table on {}", dev.as_ref().display());
	let mut cmd = Command::new("partprobe");
	cmd.arg("--summary").arg(dev.as_ref());
	cmd_run_check_status(&mut cmd)
}

pub fn cmd_run_check_status(cmd: &mut Command) -> Result<()> {
	let status = cmd
		.status()
		.with_context(|| format!("failed to run {:?}", cmd.get_program()))?;
	if status.success() {
		Ok(())
	} else if let Some(c) = status.code() {
		Err(anyhow!("command exited with status {}: {:?}", c, cmd))
	} else {
		Err(anyhow!("command exited abnormally: {:?}", cmd))
	}
}

/// Syncs the filesystem backing `path`, by opening it and calling
/// `syncfs(2)` directly - there is no safe-rust wrapper for this syscall.
pub fn sync_filesystem(path: &Path) -> Result<()> {
	let cpath = CString::new(path.as_os_str().as_encoded_bytes())?;
	let fd = unsafe { open(cpath.as_ptr(), O_RDONLY | O_NONBLOCK) };
	if fd < 0 {
		return Err(anyhow!("failed to open {}: {}", path.display(), errno::errno()));
	}
	let result = unsafe { syncfs(fd) };
	let close_result = unsafe { close(fd) };
	if close_result != 0 {
		warn!("failed to close fd {} after syncfs: {}", fd, errno::errno());
	}
	if result != 0 {
		return Err(anyhow!("failed to sync filesystem backing {}: {}", path.display(), errno::errno()));
	}
	Ok(())
}

/// Gets the filesystem UUID of a block device via low-level blkid probing.
///
/// libblkid's cache does not cover loop devices - asking it for a cached
/// lookup on a `/dev/loopNpM` node returns EINVAL - so this always goes
/// through a one-shot `Prober` instead of `blkid::cache::Cache`.
pub fn get_fsuuid(path: &Path) -> Result<String> {
	let probe = blkid::prober::Prober::new_from_filename(path)?;
	let result = probe.do_safe_probe()?;
	match result {
		ProbeState::Success => {
			let values = probe.get_values_map()?;
			values
				.get("UUID")
				.cloned()
				.context("no filesystem UUID found in probe results")
		}
		_ => bail!("unable to probe {}", path.display()),
	}
}

/// Checks, via blkid, that `path` names a whole disk rather than a
/// partition.
pub fn is_whole_disk(path: &Path) -> Result<bool> {
	let probe = blkid::prober::Prober::new_from_filename(path)?;
	Ok(probe.is_wholedisk())
}

/// A mount that is torn down when dropped. Failure to unmount is logged,
/// not propagated, so cleanup of sibling guards still runs.
pub struct ScopedMount {
	target: PathBuf,
}

impl ScopedMount {
	pub fn mount(source: &Path, target: &Path, fstype: &str) -> Result<Self> {
		std::fs::create_dir_all(target)?;
		Mount::builder()
			.fstype(fstype)
			.mount(source, target)
			.map_err(|_| anyhow!(crate::error::ProvisionError::MountFailed))?;
		Ok(Self { target: target.to_path_buf() })
	}

	pub fn mount_readonly(source: &Path, target: &Path, fstype: &str) -> Result<Self> {
		std::fs::create_dir_all(target)?;
		Mount::builder()
			.fstype(fstype)
			.flags(sys_mount::MountFlags::RDONLY)
			.mount(source, target)
			.map_err(|_| anyhow!(crate::error::ProvisionError::MountFailed))?;
		Ok(Self { target: target.to_path_buf() })
	}

	pub fn path(&self) -> &Path {
		&self.target
	}
}

impl Drop for ScopedMount {
	fn drop(&mut self) {
		if let Err(e) = sync_filesystem(&self.target) {
			warn!("failed to sync {} before unmount: {}", self.target.display(), e);
		}
		if let Err(e) = unmount(&self.target, UnmountFlags::empty()) {
			warn!("failed to unmount {}: {}", self.target.display(), e);
		}
	}
}

/// A loop device attachment that is detached when dropped.
pub struct ScopedLoopDevice {
	dev: Option<LoopDevice>,
	path: PathBuf,
}

impl ScopedLoopDevice {
	pub fn attach(backing_file: &Path) -> Result<Self> {
		let ctl = loopdev::LoopControl::open()?;
		let dev = ctl.next_free().context("no free loop device found")?;
		dev.attach_file(backing_file)?;
		let path = dev.path().context("unable to get path of loop device")?;
		Ok(Self { dev: Some(dev), path })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Drop for ScopedLoopDevice {
	fn drop(&mut self) {
		if let Some(dev) = self.dev.take() {
			if let Err(e) = dev.detach() {
				warn!("failed to detach loop device {}: {}", self.path.display(), e);
			}
		}
	}
}

/// Toggles an eMMC boot partition's `force_ro` sysfs attribute to writable
/// on construction and back to read-only, unconditionally, on drop - so P6
/// ("force_ro observably 1 both before and after, regardless of outcome")
/// holds on every exit path including an error unwind.
pub struct BootPartWritable {
	force_ro_path: PathBuf,
}

impl BootPartWritable {
	pub fn acquire(boot_part_sysfs: &Path) -> Result<Self> {
		let force_ro_path = boot_part_sysfs.join("force_ro");
		std::fs::write(&force_ro_path, b"0")
			.with_context(|| format!("failed to clear force_ro at {}", force_ro_path.display()))?;
		Ok(Self { force_ro_path })
	}
}

impl Drop for BootPartWritable {
	fn drop(&mut self) {
		if let Err(e) = std::fs::write(&self.force_ro_path, b"1") {
			warn!("failed to restore force_ro at {}: {}", self.force_ro_path.display(), e);
		}
	}
}
