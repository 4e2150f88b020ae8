use std::sync::Arc;

use anyhow::{bail, Result};

use super::SortIterator;
use crate::err::Error;
use crate::sorter::checksum::{ChecksumCalculator, ChecksumVersion};
use crate::sorter::data::{Settings, SorterData};
use crate::sorter::file::SpillFile;
use crate::sorter::protect::TmpDataProtector;
use crate::sorter::range::SorterRange;

/// Reads back one sorted run from a spill file, a chunk at a time.
///
/// The checksum of the run is only verified once every record has been
/// read, when the source is closed.
pub struct FileIterator<K: SorterData, V: SorterData> {
	settings: Settings<K, V>,
	file: Arc<SpillFile>,
	protector: Option<Arc<dyn TmpDataProtector>>,
	range: SorterRange,
	/// The file offset of the next chunk
	offset: u64,
	/// The decoded chunk being read
	buffer: Vec<u8>,
	pos: usize,
	/// The buffer position of a key whose value has not been fetched yet
	pending: Option<usize>,
	checksum: ChecksumCalculator,
	done: bool,
}

impl<K: SorterData, V: SorterData> FileIterator<K, V> {
	pub(crate) fn new(
		file: Arc<SpillFile>,
		range: SorterRange,
		settings: Settings<K, V>,
		protector: Option<Arc<dyn TmpDataProtector>>,
	) -> Self {
		Self {
			settings,
			file,
			protector,
			offset: range.start_offset,
			checksum: ChecksumCalculator::new(range.checksum_version),
			range,
			buffer: Vec::new(),
			pos: 0,
			pending: None,
			done: false,
		}
	}

	/// The spill file holding this run
	pub fn file(&self) -> &Arc<SpillFile> {
		&self.file
	}

	fn at_eof(&self) -> bool {
		self.pos >= self.buffer.len()
	}

	/// Reads exactly `len` bytes of the run, or marks the run as exhausted.
	fn read(&mut self, len: usize) -> Result<Option<Vec<u8>>> {
		if self.offset == self.range.end_offset {
			self.done = true;
			return Ok(None);
		}
		if self.offset + len as u64 > self.range.end_offset {
			bail!(Error::ShortRead {
				path: self.file.path().to_path_buf(),
				expected: len,
				actual: (self.range.end_offset - self.offset) as usize,
			});
		}
		let mut buf = vec![0u8; len];
		self.file.read(self.offset, &mut buf)?;
		self.offset += len as u64;
		Ok(Some(buf))
	}

	fn fill_buffer_from_disk(&mut self) -> Result<()> {
		let Some(header) = self.read(4)? else {
			return Ok(());
		};
		let raw = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
		let compressed = raw < 0;
		let size = raw.unsigned_abs() as usize;
		let Some(payload) = self.read(size)? else {
			fail!("Spill file ended after a chunk header at offset {}", self.offset);
		};
		let payload = match &self.protector {
			Some(protector) => {
				let mut out = vec![0u8; payload.len()];
				let len = match protector.unprotect_tmp_data(&payload, &mut out) {
					Ok(len) => len,
					Err(e) => bail!(Error::TmpDataUnprotect(e.to_string())),
				};
				out.truncate(len);
				out
			}
			None => payload,
		};
		self.buffer = if compressed {
			match snap::raw::Decoder::new().decompress_vec(&payload) {
				Ok(v) => v,
				Err(e) => bail!(Error::Decompression(e.to_string())),
			}
		} else {
			payload
		};
		self.pos = 0;
		Ok(())
	}

	fn fill_buffer_if_needed(&mut self) -> Result<()> {
		if self.at_eof() {
			self.fill_buffer_from_disk()?;
			if self.checksum.version() == ChecksumVersion::V2 && !self.done {
				self.checksum.add_data(&self.buffer);
			}
		}
		Ok(())
	}

	fn decode<T: SorterData>(&mut self, settings: &T::Settings) -> Result<T> {
		let mut reader = &self.buffer[self.pos..];
		let value = T::deserialize_for_sorter(&mut reader, settings)?;
		self.pos = self.buffer.len() - reader.len();
		Ok(value)
	}
}

impl<K: SorterData, V: SorterData> SortIterator<K, V> for FileIterator<K, V> {
	fn more(&mut self) -> Result<bool> {
		if self.pending.is_some() {
			fail!("Cannot advance a file iterator with a pending deferred value");
		}
		if !self.done {
			self.fill_buffer_if_needed()?;
		}
		Ok(!self.done)
	}

	fn next(&mut self) -> Result<(K, V)> {
		let key = self.next_with_deferred_value()?;
		let value = self.get_deferred_value()?;
		Ok((key, value))
	}

	fn next_with_deferred_value(&mut self) -> Result<K> {
		if self.pending.is_some() {
			fail!("A deferred value must be fetched before reading the next key");
		}
		self.fill_buffer_if_needed()?;
		if self.done {
			fail!("Reading past the end of a spilled run");
		}
		self.pending = Some(self.pos);
		let settings = self.settings.0.clone();
		self.decode::<K>(&settings)
	}

	fn get_deferred_value(&mut self) -> Result<V> {
		let Some(start) = self.pending.take() else {
			fail!("No deferred value is pending");
		};
		let settings = self.settings.1.clone();
		let value = self.decode::<V>(&settings)?;
		if self.checksum.version() == ChecksumVersion::V1 {
			self.checksum.add_data(&self.buffer[start..self.pos]);
		}
		Ok(value)
	}

	fn current(&mut self) -> Result<&K> {
		fail!("Peeking is not supported by the file iterator")
	}

	fn close_source(&mut self) -> Result<()> {
		if self.done && self.at_eof() {
			self.checksum.verify(self.range.checksum)?;
		}
		Ok(())
	}

	fn range(&self) -> Option<SorterRange> {
		Some(self.range)
	}
}
