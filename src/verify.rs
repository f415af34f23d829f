//! Checksum verification over files and raw device byte ranges.
//!
//! Both algorithms are fed through the same streaming-read loop; only the
//! hasher differs, mirroring the single code path the original dispatches
//! between `G_CHECKSUM_MD5` and `G_CHECKSUM_SHA256`.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use md5::Md5;
use sha2::{Digest, Sha256};

use crate::error::ProvisionError;
use crate::plan::{Checksum, ChecksumAlgo};

const BUF_SIZE: usize = 1 << 20;

enum AnyHasher {
	Md5(Md5),
	Sha256(Sha256),
}

impl AnyHasher {
	fn new(algo: ChecksumAlgo) -> Self {
		match algo {
			ChecksumAlgo::Md5 => AnyHasher::Md5(Md5::new()),
			ChecksumAlgo::Sha256 => AnyHasher::Sha256(Sha256::new()),
		}
	}

	fn update(&mut self, buf: &[u8]) {
		match self {
			AnyHasher::Md5(h) => Digest::update(h, buf),
			AnyHasher::Sha256(h) => Digest::update(h, buf),
		}
	}

	fn finalize_hex(self) -> String {
		match self {
			AnyHasher::Md5(h) => hex_lower(&h.finalize()),
			AnyHasher::Sha256(h) => hex_lower(&h.finalize()),
		}
	}
}

fn hex_lower(bytes: &[u8]) -> String {
	use std::fmt::Write;
	let mut s = String::with_capacity(bytes.len() * 2);
	for b in bytes {
		write!(s, "{:02x}", b).unwrap();
	}
	s
}

fn hash_reader<R: Read>(mut reader: R, algo: ChecksumAlgo, mut remaining: Option<u64>) -> Result<String> {
	let mut hasher = AnyHasher::new(algo);
	let mut buf = vec![0u8; BUF_SIZE];
	loop {
		let to_read = match remaining {
			Some(0) => break,
			Some(r) => r.min(BUF_SIZE as u64) as usize,
			None => BUF_SIZE,
		};
		let n = reader.read(&mut buf[..to_read])?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
		if let Some(r) = remaining.as_mut() {
			*r -= n as u64;
		}
	}
	Ok(hasher.finalize_hex())
}

/// Hashes a whole file and compares against `expected`'s checksums, in the
/// order given. `fails with ChecksumMismatch` on the first mismatch.
pub fn verify_file(path: &Path, expected: &[Checksum]) -> Result<()> {
	for checksum in expected {
		let f = File::open(path)
			.with_context(|| format!("opening {} for checksum verification", path.display()))?;
		let actual = hash_reader(f, checksum.algo, None)?;
		if !actual.eq_ignore_ascii_case(&checksum.hex) {
			return Err(anyhow!(ProvisionError::ChecksumMismatch(
				path.display().to_string()
			)));
		}
	}
	Ok(())
}

/// Hashes `length_bytes` of `device_path` starting at `offset_bytes` and
/// compares against `expected`.
pub fn verify_raw(
	device_path: &Path,
	offset_bytes: u64,
	length_bytes: u64,
	expected: &[Checksum],
) -> Result<()> {
	for checksum in expected {
		let mut f = File::open(device_path)
			.with_context(|| format!("opening {} for checksum verification", device_path.display()))?;
		f.seek(SeekFrom::Start(offset_bytes))?;
		let actual = hash_reader(&mut f, checksum.algo, Some(length_bytes))?;
		if !actual.eq_ignore_ascii_case(&checksum.hex) {
			return Err(anyhow!(ProvisionError::ChecksumMismatch(
				device_path.display().to_string()
			)));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn lorem_txt_checksums_match() {
		let dir = std::env::temp_dir().join("partup-verify-test");
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("lorem.txt");
		let mut f = File::create(&path).unwrap();
		write!(f, "Lorem ipsum dolor sit amet").unwrap();
		drop(f);

		let sha = hash_reader(File::open(&path).unwrap(), ChecksumAlgo::Sha256, None).unwrap();
		let md5 = hash_reader(File::open(&path).unwrap(), ChecksumAlgo::Md5, None).unwrap();

		assert!(verify_file(
			&path,
			&[Checksum { algo: ChecksumAlgo::Sha256, hex: sha }]
		)
		.is_ok());
		assert!(verify_file(
			&path,
			&[Checksum { algo: ChecksumAlgo::Md5, hex: md5 }]
		)
		.is_ok());

		let err = verify_file(
			&path,
			&[Checksum { algo: ChecksumAlgo::Sha256, hex: "0".repeat(64) }],
		);
		assert!(err.is_err());
		std::fs::remove_dir_all(&dir).ok();
	}
}
