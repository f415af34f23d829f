//! Module defining the command line usage.
//!
//! Available subcommands
//! ----------------------
//!
//! ### Provision a device from a package
//!
//! ```shell
//! # ./target/release/partup install PACKAGE DEVICE
//! ```
//!
//! ### Build a package from a layout and its inputs
//!
//! ```shell
//! $ ./target/release/partup package LAYOUT.yml [INPUT...] -o PACKAGE
//! ```
//!
//! ### Show the contents of a package
//!
//! ```shell
//! $ ./target/release/partup show PACKAGE
//! ```
//!
//! For the advanced usage, please go to [`Cmdline`].
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Command line usage
/// ===================
///
/// This tool uses the subcommand approach to specify the action to take.
///
/// ```shell
/// ./target/release/partup [GLOBAL_OPTIONS] action [OPTIONS] [--] ARG [ARG..]
/// ```
///
/// Global options
/// ==============
///
/// - `-d`, `--debug`: Enables the debug output.
/// - `-s`, `--skip-checksums`: Skips checksum verification of inputs before writing them.
/// - `--prefix` `PATH`: Resolves relative input filenames against `PATH` instead of the mounted package root.
///
/// Actions
/// =======
///
/// - `install`: Provision a device from a package.
/// - `package`: Build a package from a layout descriptor and its input files.
/// - `show`: Show the layout and contents of a package.
///
/// Notes
/// -----
///
/// - All actions have their specific options; please refer to the action's documentation for available options.
/// - `install` requires root privileges, since it opens block devices directly.
///
/// Action `install`
/// =================
///
/// Provisions `DEVICE` according to the layout descriptor found inside `PACKAGE`.
///
/// ```shell
/// ./target/release/partup [GLOBAL_OPTIONS] install [OPTIONS] [--] PACKAGE DEVICE
/// ```
///
/// Arguments for `install`
/// ------------------------
///
/// - `PACKAGE`: path to the squashfs package to provision from.
/// - `DEVICE`: path to the target block device (e.g. `/dev/mmcblk0`) or, for a
///   raw-flash layout, the MTD character device.
///
/// Action `package`
/// =================
///
/// Builds a squashfs package containing a layout descriptor and its inputs.
///
/// ```shell
/// ./target/release/partup [GLOBAL_OPTIONS] package [--] FILE [FILE...] -o OUTPUT
/// ```
///
/// Action `show`
/// ==============
///
/// Lists the files contained within `PACKAGE`, and their sizes.
///
/// ```shell
/// ./target/release/partup [GLOBAL_OPTIONS] show PACKAGE
/// ```
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cmdline {
	/// Turns on debug output.
	#[arg(short = 'd', long, action = ArgAction::SetTrue)]
	pub debug: bool,
	/// Skip checksum verification of package inputs before writing them.
	#[arg(short = 's', long, action = ArgAction::SetTrue)]
	pub skip_checksums: bool,
	/// Resolve relative input filenames against this path instead of the
	/// mounted package root.
	#[arg(long)]
	pub prefix: Option<PathBuf>,
	/// The action to take.
	#[command(subcommand)]
	pub action: Action,
}

#[derive(Subcommand)]
pub enum Action {
	/// Provision a device from a package.
	Install {
		/// Path to the squashfs package.
		package: PathBuf,
		/// Path to the target block or MTD device.
		device: PathBuf,
	},
	/// Build a package from a layout descriptor and its inputs.
	Package {
		/// Layout descriptor and input files to bundle into the package.
		#[arg(num_args = 1..)]
		files: Vec<PathBuf>,
		/// Path of the package to create.
		#[arg(short, long)]
		output: PathBuf,
	},
	/// Show the contents of a package.
	Show {
		/// Path to the squashfs package.
		package: PathBuf,
	},
}
