use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use rand::Rng as _;

use crate::err::Error;

const TARGET: &str = "spillsort::core::sorter::file";

/// Counters shared by every spill file created for one operation.
#[derive(Debug, Default)]
pub struct SorterFileStats {
	opened: AtomicU64,
	closed: AtomicU64,
	bytes_spilled: AtomicU64,
	bytes_spilled_uncompressed: AtomicU64,
}

impl SorterFileStats {
	pub fn opened(&self) -> u64 {
		self.opened.load(Ordering::Relaxed)
	}

	pub fn closed(&self) -> u64 {
		self.closed.load(Ordering::Relaxed)
	}

	/// The number of bytes written to disk
	pub fn bytes_spilled(&self) -> u64 {
		self.bytes_spilled.load(Ordering::Relaxed)
	}

	/// The number of serialized bytes before compression
	pub fn bytes_spilled_uncompressed(&self) -> u64 {
		self.bytes_spilled_uncompressed.load(Ordering::Relaxed)
	}

	pub(crate) fn add_spilled_uncompressed(&self, bytes: u64) {
		self.bytes_spilled_uncompressed.fetch_add(bytes, Ordering::Relaxed);
	}
}

/// Produces names for new spill files within the temp directory.
pub trait FileNameGenerator: Debug + Send + Sync {
	fn next_file_name(&self) -> String;
}

/// Names files from a process-wide counter and a random suffix, so that
/// concurrent operations never collide.
#[derive(Debug, Default)]
pub struct UniqueFileNames;

static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileNameGenerator for UniqueFileNames {
	fn next_file_name(&self) -> String {
		let count = FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
		let suffix: u32 = rand::thread_rng().gen_range(0..u32::MAX);
		format!("extsort.{count}-{suffix:08x}")
	}
}

#[derive(Debug, Default)]
struct Handle {
	file: Option<BufWriter<File>>,
	/// The end of the written data, or `None` after switching to reading
	offset: Option<u64>,
}

/// An append-only spill file which is read back at random offsets.
///
/// The file is shared by the writer producing each run and every iterator
/// reading one back. It is created lazily on first use and deleted when the
/// last reference is dropped, unless [`SpillFile::keep`] was called.
#[derive(Debug)]
pub struct SpillFile {
	path: PathBuf,
	stats: Option<Arc<SorterFileStats>>,
	keep: AtomicBool,
	handle: Mutex<Handle>,
}

impl SpillFile {
	pub fn new(path: PathBuf, stats: Option<Arc<SorterFileStats>>) -> Self {
		Self {
			path,
			stats,
			keep: AtomicBool::new(false),
			handle: Mutex::new(Handle::default()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// The file name relative to its directory
	pub fn file_name(&self) -> String {
		self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
	}

	/// Prevents the file from being deleted when dropped.
	pub fn keep(&self) {
		self.keep.store(true, Ordering::Relaxed);
	}

	/// Appends bytes at the end of the file.
	pub fn write(&self, data: &[u8]) -> Result<()> {
		let mut handle = self.handle.lock();
		let offset = self.ensure_open_for_writing(&mut handle)?;
		let Some(file) = handle.file.as_mut() else {
			fail!("Spill file '{}' is not open", self.path.display());
		};
		if let Err(e) = file.write_all(data) {
			bail!(Error::from_write(self.path.clone(), e));
		}
		handle.offset = Some(offset + data.len() as u64);
		if let Some(stats) = &self.stats {
			stats.bytes_spilled.fetch_add(data.len() as u64, Ordering::Relaxed);
		}
		Ok(())
	}

	/// Reads exactly `buf.len()` bytes starting at `offset`.
	pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
		let mut handle = self.handle.lock();
		self.ensure_open_for_reading(&mut handle)?;
		let Some(file) = handle.file.as_mut() else {
			fail!("Spill file '{}' is not open", self.path.display());
		};
		let file = file.get_mut();
		if let Err(source) = file.seek(SeekFrom::Start(offset)) {
			bail!(Error::FileRead {
				path: self.path.clone(),
				source,
			});
		}
		let mut read = 0;
		while read < buf.len() {
			match file.read(&mut buf[read..]) {
				Ok(0) => break,
				Ok(n) => read += n,
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(source) => bail!(Error::FileRead {
					path: self.path.clone(),
					source,
				}),
			}
		}
		if read < buf.len() {
			bail!(Error::ShortRead {
				path: self.path.clone(),
				expected: buf.len(),
				actual: read,
			});
		}
		Ok(())
	}

	/// The offset at which the next write lands.
	pub fn current_offset(&self) -> Result<u64> {
		let mut handle = self.handle.lock();
		self.ensure_open_for_writing(&mut handle)
	}

	fn open(&self, handle: &mut Handle) -> Result<()> {
		if handle.file.is_some() {
			return Ok(());
		}
		if let Some(parent) = self.path.parent() {
			if let Err(source) = fs::create_dir_all(parent) {
				bail!(Error::FileOpen {
					path: self.path.clone(),
					source,
				});
			}
		}
		let file = match OpenOptions::new().read(true).append(true).create(true).open(&self.path) {
			Ok(file) => file,
			Err(source) => bail!(Error::FileOpen {
				path: self.path.clone(),
				source,
			}),
		};
		trace!(target: TARGET, path = %self.path.display(), "Opened spill file");
		if let Some(stats) = &self.stats {
			stats.opened.fetch_add(1, Ordering::Relaxed);
		}
		handle.file = Some(BufWriter::new(file));
		handle.offset = None;
		Ok(())
	}

	fn ensure_open_for_writing(&self, handle: &mut Handle) -> Result<u64> {
		self.open(handle)?;
		if let Some(offset) = handle.offset {
			return Ok(offset);
		}
		let Some(file) = handle.file.as_mut() else {
			fail!("Spill file '{}' is not open", self.path.display());
		};
		// Appends always land at the end, whatever was read last
		let offset = match file.get_ref().metadata() {
			Ok(meta) => meta.len(),
			Err(source) => bail!(Error::FileRead {
				path: self.path.clone(),
				source,
			}),
		};
		handle.offset = Some(offset);
		Ok(offset)
	}

	fn ensure_open_for_reading(&self, handle: &mut Handle) -> Result<()> {
		self.open(handle)?;
		if handle.offset.take().is_some() {
			if let Some(file) = handle.file.as_mut() {
				if let Err(source) = file.flush() {
					bail!(Error::FileFlush {
						path: self.path.clone(),
						source,
					});
				}
			}
		}
		Ok(())
	}
}

impl Drop for SpillFile {
	fn drop(&mut self) {
		let handle = self.handle.get_mut();
		if let Some(mut file) = handle.file.take() {
			if let Err(e) = file.flush() {
				warn!(
					target: TARGET,
					path = %self.path.display(),
					"Failed to flush spill file: {e}"
				);
			}
			if let Some(stats) = &self.stats {
				stats.closed.fetch_add(1, Ordering::Relaxed);
			}
		} else if !self.path.exists() {
			return;
		}
		if self.keep.load(Ordering::Relaxed) {
			debug!(target: TARGET, path = %self.path.display(), "Keeping spill file");
			return;
		}
		if let Err(e) = fs::remove_file(&self.path) {
			warn!(target: TARGET, path = %self.path.display(), "Failed to remove spill file: {e}");
		}
	}
}
