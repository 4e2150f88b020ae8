use std::path::PathBuf;
use std::sync::LazyLock;

/// The default number of bytes a sorter may hold in memory before it spills.
pub static MAX_MEMORY_USAGE_BYTES: LazyLock<usize> =
	lazy_env_parse!("SPILLSORT_MAX_MEMORY_USAGE_BYTES", usize, 100 * 1024 * 1024);

/// The number of buffered bytes which cause the spill writer to flush a chunk.
///
/// This value is also the per-run read buffer assumed when deciding how many
/// spilled runs can be merged at once within the memory budget.
pub static SORTED_FILE_BUFFER_SIZE: LazyLock<usize> =
	lazy_env_parse!("SPILLSORT_SORTED_FILE_BUFFER_SIZE", usize, 64 * 1024);

/// The checksum version written to newly spilled runs.
pub static CHECKSUM_VERSION: LazyLock<u8> = lazy_env_parse!("SPILLSORT_CHECKSUM_VERSION", u8, 2);

/// The directory in which spill files are created when none is given explicitly.
pub static TEMP_DIR: LazyLock<Option<PathBuf>> =
	lazy_env_parse!("SPILLSORT_TEMP_DIR", Option<PathBuf>);

/// The default number of bytes the group processor may hold before it spills.
pub static GROUP_MAX_MEMORY_USAGE_BYTES: LazyLock<usize> =
	lazy_env_parse!("SPILLSORT_GROUP_MAX_MEMORY_USAGE_BYTES", usize, 100 * 1024 * 1024);

/// Compressed chunks are only kept if they are smaller than this fraction,
/// in tenths, of the original.
pub const COMPRESSION_THRESHOLD_TENTHS: usize = 9;

/// The lower bound on the number of spilled runs merged concurrently.
pub const MIN_MERGE_FAN_IN: usize = 2;
