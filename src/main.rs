// #![allow(warnings)]
// Why do you guys hate tabs?
// Look, I use tabs for indentation in my code.
// I have some sample code from the Linux kernel in my docstrings.
// Clippy warns me about the tabs, this is denial!
#![allow(clippy::tabs_in_doc_comments)]
mod cli;
mod device;
mod error;
mod exec;
mod filesystem;
mod package;
mod parttype;
mod plan;
mod planner;
mod schema;
mod unit;
mod utils;
mod value;
mod verify;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use cli::{Action, Cmdline};
use log::{debug, error, info};

use device::BlockDevice;
use error::ProvisionError;
use exec::{DeviceBackend, ExecutionContext};
use package::MountedPackage;
use planner::TargetGeometry;

fn main() -> Result<()> {
	ctrlc::set_handler(move || {
		eprintln!("\nReceived Ctrl-C, exiting.");
		std::process::exit(1);
	})
	.context("Can not register Ctrl-C (SIGTERM) handler.")?;

	let cmdline = Cmdline::try_parse()?;
	if let Action::Install { .. } = &cmdline.action {
		if unsafe { utils::geteuid() } != 0 {
			bail!(ProvisionError::MustBeRoot);
		}
	}

	let mut logger = colog::basic_builder();
	if cmdline.debug {
		logger.filter(None, log::LevelFilter::Debug);
	} else {
		logger.filter(None, log::LevelFilter::Info);
	}
	logger.init();
	if cmdline.debug {
		debug!("Debug output enabled.");
	}

	if let Err(e) = try_main(cmdline) {
		error!("Error encountered!\n{}", e);
		let mut str_buf = String::new();
		let mut ident = 0;
		e.chain().skip(1).for_each(|cause| {
			let ident_str = "\t".repeat(ident);
			ident += 1;
			str_buf += &format!("{0}- Caused by:\n{0}  {1}", ident_str, cause);
		});
		if !str_buf.is_empty() {
			error!("{}", str_buf);
		}
		error!("Exiting now.");
		std::process::exit(1);
	}
	Ok(())
}

fn try_main(cmdline: Cmdline) -> Result<()> {
	let skip_checksums = cmdline.skip_checksums;
	let prefix_override = cmdline.prefix.clone();
	match cmdline.action {
		Action::Install { package, device } => install(&package, &device, skip_checksums, prefix_override),
		Action::Package { files, output } => package::create_package(&files, &output),
		Action::Show { package } => show(&package),
	}
}

fn install(package_path: &Path, device_path: &Path, skip_checksums: bool, prefix_override: Option<PathBuf>) -> Result<()> {
	info!("Provisioning {} from {} ...", device_path.display(), package_path.display());

	if !utils::is_whole_disk(device_path).unwrap_or(true) {
		bail!(ProvisionError::NotAWholeDisk(device_path.display().to_string()));
	}

	let scratch_root = std::env::temp_dir().join(format!("partup-{}", std::process::id()));
	let mounted = MountedPackage::mount(package_path, &scratch_root.join("package"))?;
	let layout_path = mounted.layout_path()?;
	let layout_src = std::fs::read_to_string(&layout_path)
		.with_context(|| format!("failed to read layout descriptor {}", layout_path.display()))?;
	let root = value::load_str(&layout_src)?;

	let prefix = prefix_override.unwrap_or_else(|| mounted.root().to_path_buf());

	let dev = BlockDevice::open(device_path)?;
	let geometry = TargetGeometry {
		sector_size: dev.sector_size,
		total_sectors: dev.total_sectors,
		erase_block_bytes: erase_block_size(device_path),
	};

	let plan = planner::build_plan(&root, geometry, &prefix)?;
	info!("Layout parsed successfully, beginning provisioning.");

	let ctx = ExecutionContext {
		device_path: device_path.to_path_buf(),
		device_sector_size: dev.sector_size,
		device_total_sectors: dev.total_sectors,
		prefix_path: prefix,
		skip_checksums,
		mount_scratch_root: scratch_root.join("mnt"),
	};

	let backend = DeviceBackend::from_plan(&plan);
	backend.execute(&ctx)?;

	info!("Provisioning complete.");
	Ok(())
}

fn show(package_path: &Path) -> Result<()> {
	let scratch_root = std::env::temp_dir().join(format!("partup-show-{}", std::process::id()));
	let mounted = MountedPackage::mount(package_path, &scratch_root)?;
	let layout_path = mounted.layout_path()?;
	println!("Layout: {}", layout_path.strip_prefix(mounted.root()).unwrap_or(&layout_path).display());
	println!();
	for (path, size) in mounted.list_contents()? {
		println!("{:>10}  {}", package::format_size(size), path.display());
	}
	Ok(())
}

/// Reads the erase-block size of an MTD character device from sysfs; block
/// devices (which have no erase-block concept) resolve to 0, which the
/// raw-flash planner never consults since block layouts never reach it.
fn erase_block_size(device_path: &Path) -> u64 {
	let name = device_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
	if !name.starts_with("mtd") {
		return 0;
	}
	let sysfs = PathBuf::from("/sys/class/mtd").join(name).join("erasesize");
	std::fs::read_to_string(sysfs)
		.ok()
		.and_then(|s| s.trim().parse::<u64>().ok())
		.unwrap_or(0)
}
