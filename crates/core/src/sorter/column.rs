use std::mem;

use anyhow::Result;

use super::data::{Ascending, SorterData};
use super::iter::{BoxedIterator, InMemIterator};
use super::options::SortOptions;
use super::spill::Spills;
use super::stats::SorterStats;

const TARGET: &str = "spillsort::core::sorter::column";

/// Identifies one cell of a column store: a field path within a record.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ColumnKey {
	pub path: String,
	pub record_id: u64,
}

impl SorterData for ColumnKey {
	type Settings = ();
	fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()> {
		self.path.serialize_for_sorter(buf)?;
		self.record_id.serialize_for_sorter(buf)
	}
	fn deserialize_for_sorter(reader: &mut &[u8], _: &()) -> Result<Self> {
		Ok(Self {
			path: String::deserialize_for_sorter(reader, &())?,
			record_id: u64::deserialize_for_sorter(reader, &())?,
		})
	}
	fn mem_usage_for_sorter(&self) -> usize {
		self.path.mem_usage_for_sorter() + mem::size_of::<u64>()
	}
}

/// The encoded contents of a single cell, stored with a little-endian `u32` length.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CellValue(pub Vec<u8>);

impl SorterData for CellValue {
	type Settings = ();
	fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()> {
		self.0.serialize_for_sorter(buf)
	}
	fn deserialize_for_sorter(reader: &mut &[u8], _: &()) -> Result<Self> {
		Vec::deserialize_for_sorter(reader, &()).map(CellValue)
	}
	fn mem_usage_for_sorter(&self) -> usize {
		self.0.mem_usage_for_sorter()
	}
}

/// Sorts column store cells by path, then by record id.
///
/// Spilled runs start a new chunk whenever the path changes, so merging a
/// single path only keeps that path's cells in memory.
pub struct ColumnStoreSorter {
	opts: SortOptions,
	data: Vec<(ColumnKey, CellValue)>,
	spills: Spills<ColumnKey, CellValue>,
	stats: SorterStats,
	done: bool,
}

impl ColumnStoreSorter {
	pub fn new(opts: SortOptions) -> Result<Self> {
		Ok(Self {
			spills: Spills::new(&opts, ((), ()))?,
			opts,
			data: Vec::new(),
			stats: SorterStats::default(),
			done: false,
		})
	}

	pub fn add(&mut self, path: &str, record_id: u64, cell: &[u8]) -> Result<()> {
		if self.done {
			fail!("Cannot add to a sorter which is already done");
		}
		let key = ColumnKey {
			path: path.to_owned(),
			record_id,
		};
		let cell = CellValue(cell.to_vec());
		let usage = key.mem_usage_for_sorter() + cell.mem_usage_for_sorter();
		self.data.push((key, cell));
		self.stats.increment_num_sorted(1);
		self.stats.increment_bytes_sorted(usage as u64);
		self.stats.add_mem_usage(usage);
		if self.stats.mem_usage > self.opts.max_memory_usage_bytes {
			self.spill()?;
		}
		Ok(())
	}

	pub fn stats(&self) -> &SorterStats {
		&self.stats
	}

	fn spill(&mut self) -> Result<()> {
		if self.data.is_empty() {
			return Ok(());
		}
		self.opts.ensure_spill_allowed()?;
		trace!(target: TARGET, cells = self.data.len(), "Spilling column store cells");
		self.data.sort_by(|a, b| a.0.cmp(&b.0));
		let data = mem::take(&mut self.data);
		self.spills.spill_chunked(data, &mut self.stats, |prev, next| prev.path != next.path)?;
		self.stats.reset_mem_usage();
		Ok(())
	}

	/// Ends the input and returns every cell in order.
	pub fn done(&mut self) -> Result<BoxedIterator<ColumnKey, CellValue>> {
		if self.done {
			fail!("A sorter can only be finished once");
		}
		self.done = true;
		if self.spills.is_empty() {
			self.data.sort_by(|a, b| a.0.cmp(&b.0));
			self.stats.reset_mem_usage();
			return Ok(Box::new(InMemIterator::new(mem::take(&mut self.data))));
		}
		self.spill()?;
		self.spills.merge_to_respect_memory_limits(&Ascending)?;
		Ok(Box::new(self.spills.merged(Ascending)?))
	}
}
