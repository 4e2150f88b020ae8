use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};

use super::data::{Comparator, Settings, SorterData};
use super::file::SpillFile;
use super::iter::{BoxedIterator, FileIterator, MergeIterator, SortIterator};
use super::options::SortOptions;
use super::range::{PersistedState, SorterRange};
use super::stats::SorterStats;
use super::writer::{create_file_iterator_for_resume, SortedFileWriter};
use crate::cnf::MIN_MERGE_FAN_IN;
use crate::err::Error;

const TARGET: &str = "spillsort::core::sorter::spill";

/// The sorted runs a sorter has spilled so far, and the file holding them.
pub(crate) struct Spills<K: SorterData, V: SorterData> {
	opts: SortOptions,
	settings: Settings<K, V>,
	file: Option<Arc<SpillFile>>,
	iters: Vec<FileIterator<K, V>>,
}

impl<K, V> Spills<K, V>
where
	K: SorterData + Clone + 'static,
	V: SorterData + 'static,
{
	pub(crate) fn new(opts: &SortOptions, settings: Settings<K, V>) -> Result<Self> {
		Ok(Self {
			file: opts.initial_spill_file()?,
			opts: opts.clone(),
			settings,
			iters: Vec::new(),
		})
	}

	/// Reopens runs kept in an existing spill file.
	pub(crate) fn from_ranges(
		opts: &SortOptions,
		settings: Settings<K, V>,
		file_name: &str,
		ranges: &[SorterRange],
	) -> Result<Self> {
		opts.ensure_spill_allowed()?;
		let path: PathBuf = opts.temp_dir()?.join(file_name);
		if !ranges.is_empty() {
			let len = match path.metadata() {
				Ok(meta) => meta.len(),
				Err(source) => bail!(Error::FileOpen {
					path,
					source,
				}),
			};
			if len == 0 {
				bail!(Error::UnexpectedEmptyFile {
					path,
				});
			}
		}
		let file = Arc::new(SpillFile::new(path, opts.file_stats.clone()));
		let iters = ranges
			.iter()
			.map(|range| {
				create_file_iterator_for_resume(file.clone(), *range, settings.clone(), opts)
			})
			.collect();
		Ok(Self {
			file: Some(file),
			opts: opts.clone(),
			settings,
			iters,
		})
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.iters.is_empty()
	}

	pub(crate) fn len(&self) -> usize {
		self.iters.len()
	}

	/// Writes already sorted records as a new run.
	pub(crate) fn spill(
		&mut self,
		data: impl IntoIterator<Item = (K, V)>,
		stats: &mut SorterStats,
	) -> Result<()> {
		self.spill_chunked(data, stats, |_, _| false)
	}

	/// Writes already sorted records as a new run, starting a fresh chunk
	/// before every record for which `new_chunk(previous, next)` holds.
	pub(crate) fn spill_chunked(
		&mut self,
		data: impl IntoIterator<Item = (K, V)>,
		stats: &mut SorterStats,
		mut new_chunk: impl FnMut(&K, &K) -> bool,
	) -> Result<()> {
		self.opts.ensure_spill_allowed()?;
		let Some(file) = &self.file else {
			fail!("Spilling is allowed but no spill file was created");
		};
		let mut writer =
			SortedFileWriter::<K, V>::new(&self.opts, file.clone(), self.settings.clone())?;
		let mut count = 0u64;
		let mut previous: Option<K> = None;
		for (key, value) in data {
			if let Some(previous) = &previous {
				if new_chunk(previous, &key) {
					writer.write_chunk()?;
				}
			}
			writer.add_already_sorted(&key, &value)?;
			previous = Some(key);
			count += 1;
		}
		let iter = writer.done()?;
		debug!(
			target: TARGET,
			records = count,
			range = ?iter.range(),
			"Spilled sorted run"
		);
		self.iters.push(iter);
		stats.spilled_ranges += 1;
		stats.spilled_key_values += count;
		Ok(())
	}

	/// Re-merges runs until few enough remain to merge within the memory budget.
	pub(crate) fn merge_to_respect_memory_limits<C: Comparator<K>>(
		&mut self,
		comp: &C,
	) -> Result<()> {
		let target = (self.opts.max_memory_usage_bytes / self.opts.buffer_size.max(1))
			.max(MIN_MERGE_FAN_IN);
		if self.iters.len() > target {
			self.merge(target, comp)?;
		}
		Ok(())
	}

	/// Merges runs in batches of `target` into a new file until at most `target` remain.
	fn merge<C: Comparator<K>>(&mut self, target: usize, comp: &C) -> Result<()> {
		info!(
			target: TARGET,
			runs = self.iters.len(),
			max_runs = target,
			"Number of spilled runs exceeds the merge limit, merging them to reduce the number"
		);
		let mut iters = mem::take(&mut self.iters);
		while iters.len() > target {
			let file = self.opts.new_spill_file()?;
			debug!(
				target: TARGET,
				path = %file.path().display(),
				"Created intermediate spill file"
			);
			let mut merged = Vec::with_capacity(iters.len().div_ceil(target));
			let mut pending = iters.into_iter().peekable();
			while pending.peek().is_some() {
				let batch: Vec<BoxedIterator<K, V>> = pending
					.by_ref()
					.take(target)
					.map(|it| Box::new(it) as BoxedIterator<K, V>)
					.collect();
				let mut merge = MergeIterator::with_strict_checks(
					batch,
					self.opts.limit,
					comp.clone(),
					self.opts.strict_comparator_checks,
				)?;
				let mut writer =
					SortedFileWriter::<K, V>::new(&self.opts, file.clone(), self.settings.clone())?;
				while merge.more()? {
					let (key, value) = merge.next()?;
					writer.add_already_sorted(&key, &value)?;
				}
				merged.push(writer.done()?);
			}
			iters = merged;
			self.file = Some(file);
		}
		self.iters = iters;
		Ok(())
	}

	/// Merges every run into one stream, leaving no runs behind.
	pub(crate) fn merged<C: Comparator<K> + 'static>(
		&mut self,
		comp: C,
	) -> Result<MergeIterator<K, V, C>> {
		let sources =
			self.iters.drain(..).map(|it| Box::new(it) as BoxedIterator<K, V>).collect();
		MergeIterator::with_strict_checks(
			sources,
			self.opts.limit,
			comp,
			self.opts.strict_comparator_checks,
		)
	}

	pub(crate) fn ranges(&self) -> Vec<SorterRange> {
		self.iters.iter().filter_map(|it| it.range()).collect()
	}

	/// Keeps the spill file on disk and describes where every run lives.
	pub(crate) fn persist(&self) -> Result<PersistedState> {
		let Some(file) = &self.file else {
			fail!("Cannot persist a sorter which does not allow spilling");
		};
		file.keep();
		Ok(PersistedState {
			file_name: file.file_name(),
			ranges: self.ranges(),
		})
	}
}
