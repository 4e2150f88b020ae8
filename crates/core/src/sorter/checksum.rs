use anyhow::{bail, Result};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};

use crate::cnf::CHECKSUM_VERSION;
use crate::err::Error;

/// Selects what the running checksum of a spilled run covers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ChecksumVersion {
	/// The checksum covers every serialized record
	V1,
	/// The checksum covers every decompressed chunk
	#[default]
	V2,
}

impl ChecksumVersion {
	/// The version configured for this process.
	pub fn configured() -> Self {
		ChecksumVersion::try_from(*CHECKSUM_VERSION).unwrap_or_default()
	}
}

impl From<ChecksumVersion> for u8 {
	fn from(v: ChecksumVersion) -> Self {
		match v {
			ChecksumVersion::V1 => 1,
			ChecksumVersion::V2 => 2,
		}
	}
}

impl TryFrom<u8> for ChecksumVersion {
	type Error = Error;
	fn try_from(v: u8) -> Result<Self, Self::Error> {
		match v {
			1 => Ok(ChecksumVersion::V1),
			2 => Ok(ChecksumVersion::V2),
			v => Err(Error::Deserialization(format!("unknown checksum version {v}"))),
		}
	}
}

/// A running CRC-32 over the bytes of one spilled run.
#[derive(Clone, Debug)]
pub struct ChecksumCalculator {
	version: ChecksumVersion,
	crc: u32,
}

impl ChecksumCalculator {
	pub fn new(version: ChecksumVersion) -> Self {
		Self {
			version,
			crc: 0,
		}
	}

	pub fn version(&self) -> ChecksumVersion {
		self.version
	}

	pub fn add_data(&mut self, data: &[u8]) {
		let mut hasher = Crc32::new_with_initial(self.crc);
		hasher.update(data);
		self.crc = hasher.finalize();
	}

	pub fn checksum(&self) -> u32 {
		self.crc
	}

	/// Fails unless the running checksum equals the one recorded at write time.
	pub fn verify(&self, expected: u32) -> Result<()> {
		if self.crc != expected {
			bail!(Error::ChecksumMismatch {
				expected,
				actual: self.crc,
			});
		}
		Ok(())
	}
}
