use std::fmt;
use std::io::Error as IoError;
use std::path::PathBuf;

use revision::Error as RevisionError;
use thiserror::Error;

/// An error originating from the sorting and grouping engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The operation needed more memory than allowed and spilling to disk is disabled
	#[error(
		"Exceeded memory limit of {limit} bytes, but didn't allow external sort. Pass allowDiskUse:true to opt in"
	)]
	QueryExceededMemoryLimitNoDiskUseAllowed {
		limit: usize,
	},

	/// A spill write failed because the storage device is full
	#[error("Out of disk space while writing to '{}'", path.display())]
	OutOfDiskSpace {
		path: PathBuf,
	},

	/// A spill file could not be opened
	#[error("Error opening file '{}': {source}", path.display())]
	FileOpen {
		path: PathBuf,
		source: IoError,
	},

	/// Writing to a spill file failed
	#[error("Error writing to file '{}': {source}", path.display())]
	FileWrite {
		path: PathBuf,
		source: IoError,
	},

	/// Reading from a spill file failed
	#[error("Error reading file '{}': {source}", path.display())]
	FileRead {
		path: PathBuf,
		source: IoError,
	},

	/// Flushing buffered data to a spill file failed
	#[error("Error flushing file '{}': {source}", path.display())]
	FileFlush {
		path: PathBuf,
		source: IoError,
	},

	/// A read from a spill file returned fewer bytes than requested
	#[error("Short read from '{}': expected {expected} bytes but read {actual}", path.display())]
	ShortRead {
		path: PathBuf,
		expected: usize,
		actual: usize,
	},

	/// The checksum of a fully read run did not match the one recorded at write time
	#[error("Data read from disk does not match what was written: expected checksum {expected:#010x}, computed {actual:#010x}")]
	ChecksumMismatch {
		expected: u32,
		actual: u32,
	},

	/// A compressed chunk could not be decompressed
	#[error("Failed to decompress a spilled chunk: {0}")]
	Decompression(String),

	/// The temporary data protector failed to protect a chunk
	#[error("Failed to protect temporary data: {0}")]
	TmpDataProtect(String),

	/// The temporary data protector failed to unprotect a chunk
	#[error("Failed to unprotect temporary data: {0}")]
	TmpDataUnprotect(String),

	/// A spilled record could not be decoded
	#[error("Failed to deserialize a spilled record: {0}")]
	Deserialization(String),

	/// A bounded sorter received a key below its current bound
	#[error("Sort input is out of order: received a key below the current bound")]
	SortedInputOutOfOrder,

	/// The comparator violated antisymmetry or reflexivity
	#[error("The comparator is not sane: {0}")]
	ComparatorNotSane(String),

	/// A sorter which has already spilled to disk was asked for an in-memory snapshot
	#[error("Cannot pause a sort which has already spilled to disk")]
	SpilledSortCannotBePaused,

	/// External sorting is allowed but no directory was available to hold spill files
	#[error("Attempting to use external sort without setting a temporary directory")]
	ExternalSortTempDirMissing,

	/// A sorter was resumed from ranges but the backing file is empty
	#[error("Attempted to resume from ranges of the empty file '{}'", path.display())]
	UnexpectedEmptyFile {
		path: PathBuf,
	},

	/// An accumulator received an input of a type it cannot process
	#[error("{accumulator} requires {expected} inputs, but found {found}")]
	InvalidAccumulatorInput {
		accumulator: &'static str,
		expected: &'static str,
		found: String,
	},

	/// A chunk length does not fit in the length prefix
	#[error("Spilled chunk of {0} bytes is too large")]
	ChunkTooLarge(usize),

	/// Represents an underlying error with versioned data encoding / decoding
	#[error("Versioned error: {0}")]
	Revision(#[from] RevisionError),

	/// There was an unexpected internal error or an API misuse
	#[error("Internal error: {0}")]
	Unreachable(String),
}

impl Error {
	#[track_caller]
	pub fn unreachable<T: fmt::Display>(message: T) -> Error {
		let location = std::panic::Location::caller();
		let message = format!("{}:{}: {}", location.file(), location.line(), message);
		Error::Unreachable(message)
	}

	/// Classifies a failed write, turning a full device into `OutOfDiskSpace`.
	pub(crate) fn from_write(path: PathBuf, source: IoError) -> Error {
		match source.kind() {
			std::io::ErrorKind::StorageFull => Error::OutOfDiskSpace {
				path,
			},
			_ => Error::FileWrite {
				path,
				source,
			},
		}
	}
}
