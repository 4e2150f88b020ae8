use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::{bail, Result};

use super::checksum::{ChecksumCalculator, ChecksumVersion};
use super::data::{Settings, SorterData};
use super::file::{SorterFileStats, SpillFile};
use super::iter::FileIterator;
use super::options::SortOptions;
use super::protect::TmpDataProtector;
use super::range::SorterRange;
use crate::cnf::COMPRESSION_THRESHOLD_TENTHS;
use crate::err::Error;

const TARGET: &str = "spillsort::core::sorter::writer";

/// Writes one sorted run to a spill file as a sequence of length-prefixed
/// chunks.
///
/// Each chunk is prefixed by a little-endian `i32` holding its on-disk size,
/// negated when the payload is Snappy-compressed. Records must be added in
/// sorted order.
pub struct SortedFileWriter<K: SorterData, V: SorterData> {
	settings: Settings<K, V>,
	file: Arc<SpillFile>,
	checksum: ChecksumCalculator,
	start: u64,
	buffer: Vec<u8>,
	buffer_size: usize,
	protector: Option<Arc<dyn TmpDataProtector>>,
	stats: Option<Arc<SorterFileStats>>,
	_marker: PhantomData<fn() -> (K, V)>,
}

impl<K: SorterData, V: SorterData> SortedFileWriter<K, V> {
	pub fn new(opts: &SortOptions, file: Arc<SpillFile>, settings: Settings<K, V>) -> Result<Self> {
		let start = file.current_offset()?;
		Ok(Self {
			settings,
			checksum: ChecksumCalculator::new(opts.checksum_version),
			start,
			buffer: Vec::with_capacity(opts.buffer_size),
			buffer_size: opts.buffer_size,
			protector: opts.protector.clone(),
			stats: opts.file_stats.clone(),
			file,
			_marker: PhantomData,
		})
	}

	/// Appends a record, flushing a chunk once the buffer is full.
	pub fn add_already_sorted(&mut self, key: &K, value: &V) -> Result<()> {
		let offset = self.buffer.len();
		key.serialize_for_sorter(&mut self.buffer)?;
		value.serialize_for_sorter(&mut self.buffer)?;
		if self.checksum.version() == ChecksumVersion::V1 {
			self.checksum.add_data(&self.buffer[offset..]);
		}
		if self.buffer.len() > self.buffer_size {
			self.write_chunk()?;
		}
		Ok(())
	}

	/// Writes all buffered records as one chunk. Does nothing when the buffer is empty.
	pub fn write_chunk(&mut self) -> Result<()> {
		if self.buffer.is_empty() {
			return Ok(());
		}
		if self.checksum.version() == ChecksumVersion::V2 {
			self.checksum.add_data(&self.buffer);
		}
		if let Some(stats) = &self.stats {
			stats.add_spilled_uncompressed(self.buffer.len() as u64);
		}
		let compressed = match snap::raw::Encoder::new().compress_vec(&self.buffer) {
			Ok(v) => v,
			Err(e) => bail!(Error::Unreachable(format!("Snappy compression failed: {e}"))),
		};
		// Only keep the compressed form if it saves at least 10%
		let is_compressed =
			compressed.len() < self.buffer.len() / 10 * COMPRESSION_THRESHOLD_TENTHS;
		let payload = if is_compressed {
			Cow::Owned(compressed)
		} else {
			Cow::Borrowed(self.buffer.as_slice())
		};
		let payload = match &self.protector {
			Some(protector) => {
				let mut out =
					vec![0u8; payload.len() + protector.additional_bytes_for_protected_buffer()];
				let len = match protector.protect_tmp_data(&payload, &mut out) {
					Ok(len) => len,
					Err(e) => bail!(Error::TmpDataProtect(e.to_string())),
				};
				out.truncate(len);
				Cow::Owned(out)
			}
			None => payload,
		};
		let Ok(size) = i32::try_from(payload.len()) else {
			bail!(Error::ChunkTooLarge(payload.len()));
		};
		let size = if is_compressed {
			-size
		} else {
			size
		};
		self.file.write(&size.to_le_bytes())?;
		self.file.write(&payload)?;
		trace!(
			target: TARGET,
			bytes = payload.len(),
			compressed = is_compressed,
			"Wrote spill chunk"
		);
		self.buffer.clear();
		Ok(())
	}

	/// Flushes the remaining records and returns an iterator over the run.
	pub fn done(mut self) -> Result<FileIterator<K, V>> {
		self.write_chunk()?;
		let end = self.file.current_offset()?;
		let range = SorterRange {
			start_offset: self.start,
			end_offset: end,
			checksum: self.checksum.checksum(),
			checksum_version: self.checksum.version(),
		};
		Ok(FileIterator::new(self.file, range, self.settings, self.protector))
	}
}

/// Reopens a run previously written to a kept spill file.
pub fn create_file_iterator_for_resume<K: SorterData, V: SorterData>(
	file: Arc<SpillFile>,
	range: SorterRange,
	settings: Settings<K, V>,
	opts: &SortOptions,
) -> FileIterator<K, V> {
	FileIterator::new(file, range, settings, opts.protector.clone())
}
