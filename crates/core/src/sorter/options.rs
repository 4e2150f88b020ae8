use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Result};

use super::checksum::ChecksumVersion;
use super::file::{FileNameGenerator, SorterFileStats, SpillFile, UniqueFileNames};
use super::protect::TmpDataProtector;
use crate::cnf::{MAX_MEMORY_USAGE_BYTES, SORTED_FILE_BUFFER_SIZE, TEMP_DIR};
use crate::err::Error;

/// An arena which owns the memory behind sorted records.
///
/// When a sorter is given a pool, its memory usage is read from the pool
/// rather than summed from individual records, and unused blocks are
/// released after every spill.
pub trait MemPool: Debug + Send + Sync {
	fn mem_usage(&self) -> usize;
	fn free_unused(&self);
}

/// Options controlling a single sort operation.
#[derive(Clone, Debug)]
pub struct SortOptions {
	/// The maximum number of results, where 0 means unlimited
	pub limit: u64,
	/// The number of bytes held in memory before spilling
	pub max_memory_usage_bytes: usize,
	/// Whether spilling to disk is permitted at all
	pub ext_sort_allowed: bool,
	/// The directory holding spill files
	pub temp_dir: Option<PathBuf>,
	/// The number of buffered bytes which trigger writing a chunk
	pub buffer_size: usize,
	pub checksum_version: ChecksumVersion,
	pub file_stats: Option<Arc<SorterFileStats>>,
	pub protector: Option<Arc<dyn TmpDataProtector>>,
	pub file_names: Arc<dyn FileNameGenerator>,
	pub mem_pool: Option<Arc<dyn MemPool>>,
	/// Validate the comparator on every comparison
	pub strict_comparator_checks: bool,
}

impl Default for SortOptions {
	fn default() -> Self {
		Self {
			limit: 0,
			max_memory_usage_bytes: *MAX_MEMORY_USAGE_BYTES,
			ext_sort_allowed: false,
			temp_dir: TEMP_DIR.clone(),
			buffer_size: *SORTED_FILE_BUFFER_SIZE,
			checksum_version: ChecksumVersion::configured(),
			file_stats: None,
			protector: None,
			file_names: Arc::new(UniqueFileNames),
			mem_pool: None,
			strict_comparator_checks: false,
		}
	}
}

impl SortOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_limit(mut self, limit: u64) -> Self {
		self.limit = limit;
		self
	}

	pub fn with_max_memory_usage_bytes(mut self, bytes: usize) -> Self {
		self.max_memory_usage_bytes = bytes;
		self
	}

	pub fn with_ext_sort_allowed(mut self, allowed: bool) -> Self {
		self.ext_sort_allowed = allowed;
		self
	}

	/// Allows spilling into the given directory
	pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.temp_dir = Some(dir.into());
		self.ext_sort_allowed = true;
		self
	}

	pub fn with_buffer_size(mut self, bytes: usize) -> Self {
		self.buffer_size = bytes;
		self
	}

	pub fn with_checksum_version(mut self, version: ChecksumVersion) -> Self {
		self.checksum_version = version;
		self
	}

	pub fn with_file_stats(mut self, stats: Arc<SorterFileStats>) -> Self {
		self.file_stats = Some(stats);
		self
	}

	pub fn with_protector(mut self, protector: Arc<dyn TmpDataProtector>) -> Self {
		self.protector = Some(protector);
		self
	}

	pub fn with_file_names(mut self, names: Arc<dyn FileNameGenerator>) -> Self {
		self.file_names = names;
		self
	}

	pub fn with_mem_pool(mut self, pool: Arc<dyn MemPool>) -> Self {
		self.mem_pool = Some(pool);
		self
	}

	pub fn with_strict_comparator_checks(mut self, strict: bool) -> Self {
		self.strict_comparator_checks = strict;
		self
	}

	/// The temp directory, which must exist when spilling is allowed.
	pub(crate) fn temp_dir(&self) -> Result<&Path> {
		match &self.temp_dir {
			Some(dir) => Ok(dir),
			None => Err(Error::ExternalSortTempDirMissing.into()),
		}
	}

	/// Fails when the memory budget is exceeded and spilling is disabled.
	pub(crate) fn ensure_spill_allowed(&self) -> Result<()> {
		ensure!(
			self.ext_sort_allowed,
			Error::QueryExceededMemoryLimitNoDiskUseAllowed {
				limit: self.max_memory_usage_bytes,
			}
		);
		Ok(())
	}

	/// Creates a new, not yet opened, spill file with a fresh name.
	pub(crate) fn new_spill_file(&self) -> Result<Arc<SpillFile>> {
		let path = self.temp_dir()?.join(self.file_names.next_file_name());
		Ok(Arc::new(SpillFile::new(path, self.file_stats.clone())))
	}

	/// The spill file to use for the lifetime of a sorter, if spilling is allowed.
	pub(crate) fn initial_spill_file(&self) -> Result<Option<Arc<SpillFile>>> {
		if !self.ext_sort_allowed {
			return Ok(None);
		}
		self.new_spill_file().map(Some)
	}
}
