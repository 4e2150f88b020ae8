use serde::{Deserialize, Serialize};

use super::checksum::ChecksumVersion;

/// The location and checksum of one sorted run within a spill file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SorterRange {
	pub start_offset: u64,
	pub end_offset: u64,
	pub checksum: u32,
	pub checksum_version: ChecksumVersion,
}

impl SorterRange {
	/// The number of bytes the run occupies on disk
	pub fn len(&self) -> u64 {
		self.end_offset - self.start_offset
	}

	pub fn is_empty(&self) -> bool {
		self.start_offset == self.end_offset
	}
}

/// Everything needed to rebuild a sorter over data kept across a shutdown.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
	/// The name of the kept spill file, relative to the temp directory
	pub file_name: String,
	pub ranges: Vec<SorterRange>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn metadata_document_shape() {
		let state = PersistedState {
			file_name: "extsort.1".to_string(),
			ranges: vec![SorterRange {
				start_offset: 0,
				end_offset: 12,
				checksum: 99,
				checksum_version: ChecksumVersion::V2,
			}],
		};
		let json = serde_json::to_value(&state).unwrap();
		assert_eq!(json["fileName"], "extsort.1");
		assert_eq!(json["ranges"][0]["endOffset"], 12);
		assert_eq!(json["ranges"][0]["checksumVersion"], 2);
		let back: PersistedState = serde_json::from_value(json).unwrap();
		assert_eq!(back, state);
	}
}
