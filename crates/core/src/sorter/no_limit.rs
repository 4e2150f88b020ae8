use std::mem;

use anyhow::Result;

use super::data::{Comparator, SaneComparator, Settings, SorterData};
use super::iter::{BoxedIterator, InMemIterator};
use super::options::SortOptions;
use super::range::{PersistedState, SorterRange};
use super::spill::Spills;
use super::stats::SorterStats;
use super::{Snapshot, Sorter, ValueProducer};
use crate::err::Error;

const TARGET: &str = "spillsort::core::sorter::no_limit";

/// Sorts every record, spilling whenever the memory budget is exceeded.
///
/// Records with equal keys are returned in insertion order.
pub struct NoLimitSorter<K: SorterData, V: SorterData, C> {
	opts: SortOptions,
	comp: SaneComparator<C>,
	data: Vec<(K, V)>,
	spills: Spills<K, V>,
	stats: SorterStats,
	done: bool,
}

impl<K, V, C> NoLimitSorter<K, V, C>
where
	K: SorterData + Clone + 'static,
	V: SorterData + 'static,
	C: Comparator<K> + 'static,
{
	pub fn new(opts: SortOptions, comp: C, settings: Settings<K, V>) -> Result<Self> {
		Ok(Self {
			spills: Spills::new(&opts, settings)?,
			comp: SaneComparator::new(comp, opts.strict_comparator_checks),
			opts,
			data: Vec::new(),
			stats: SorterStats::default(),
			done: false,
		})
	}

	/// Resumes sorting over runs kept in the spill file `file_name`.
	pub fn from_existing_ranges(
		file_name: &str,
		ranges: &[SorterRange],
		opts: SortOptions,
		comp: C,
		settings: Settings<K, V>,
	) -> Result<Self> {
		let spills = Spills::from_ranges(&opts, settings, file_name, ranges)?;
		let stats = SorterStats {
			spilled_ranges: ranges.len() as u64,
			..Default::default()
		};
		Ok(Self {
			spills,
			comp: SaneComparator::new(comp, opts.strict_comparator_checks),
			opts,
			data: Vec::new(),
			stats,
			done: false,
		})
	}

	fn add_with(&mut self, key: K, value: impl FnOnce() -> V) -> Result<()> {
		if self.done {
			fail!("Cannot add to a sorter which is already done");
		}
		let value = value();
		let usage = key.mem_usage_for_sorter() + value.mem_usage_for_sorter();
		self.data.push((key, value));
		self.stats.increment_num_sorted(1);
		self.stats.increment_bytes_sorted(usage as u64);
		match &self.opts.mem_pool {
			Some(pool) => {
				let usage = pool.mem_usage() + mem::size_of::<(K, V)>() * self.data.len();
				self.stats.set_mem_usage(usage);
			}
			None => self.stats.add_mem_usage(usage),
		}
		if self.stats.mem_usage > self.opts.max_memory_usage_bytes {
			self.spill()?;
		}
		Ok(())
	}

	fn sort(&mut self) -> Result<()> {
		let comp = &self.comp;
		self.data.sort_by(|a, b| comp.compare(&a.0, &b.0));
		comp.check()
	}

	/// Writes the buffered records to disk as a sorted run.
	fn spill(&mut self) -> Result<()> {
		if self.data.is_empty() {
			return Ok(());
		}
		self.opts.ensure_spill_allowed()?;
		trace!(target: TARGET, records = self.data.len(), "Spilling sorter data");
		self.sort()?;
		let data = mem::take(&mut self.data);
		self.spills.spill(data, &mut self.stats)?;
		self.stats.reset_mem_usage();
		if let Some(pool) = &self.opts.mem_pool {
			pool.free_unused();
		}
		Ok(())
	}
}

impl<K, V, C> Sorter<K, V> for NoLimitSorter<K, V, C>
where
	K: SorterData + Clone + 'static,
	V: SorterData + 'static,
	C: Comparator<K> + 'static,
{
	fn add(&mut self, key: K, value: V) -> Result<()> {
		self.add_with(key, move || value)
	}

	fn emplace(&mut self, key: K, value: ValueProducer<'_, V>) -> Result<()> {
		self.add_with(key, value)
	}

	fn done(&mut self) -> Result<BoxedIterator<K, V>> {
		if self.done {
			fail!("A sorter can only be finished once");
		}
		self.done = true;
		if self.spills.is_empty() {
			self.sort()?;
			self.stats.reset_mem_usage();
			return Ok(Box::new(InMemIterator::new(mem::take(&mut self.data))));
		}
		self.spill()?;
		self.spills.merge_to_respect_memory_limits(self.comp.inner())?;
		Ok(Box::new(self.spills.merged(self.comp.inner().clone())?))
	}

	fn pause(&self) -> Result<Snapshot<'_, K, V>> {
		if !self.spills.is_empty() {
			return Err(Error::SpilledSortCannotBePaused.into());
		}
		Ok(Box::new(self.data.iter().map(|(k, v)| (k, v))))
	}

	fn stats(&self) -> &SorterStats {
		&self.stats
	}

	fn num_spills(&self) -> usize {
		self.spills.len()
	}

	fn persist_data_for_shutdown(&mut self) -> Result<PersistedState> {
		self.spill()?;
		self.spills.persist()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};
	use tempfile::TempDir;
	use test_log::test;

	use super::*;
	use crate::sorter::data::Ascending;
	use crate::sorter::iter::collect;
	use crate::sorter::options::MemPool;

	fn sorted_keys(mut it: BoxedIterator<i64, i64>) -> Vec<i64> {
		collect(it.as_mut()).unwrap().into_iter().map(|(k, _)| k).collect()
	}

	#[test]
	fn sorts_in_memory() {
		let mut sorter = NoLimitSorter::new(SortOptions::new(), Ascending, ((), ())).unwrap();
		for k in [5i64, 3, 8, 1] {
			sorter.add(k, k * 10).unwrap();
		}
		assert_eq!(sorter.num_spills(), 0);
		assert_eq!(sorted_keys(sorter.done().unwrap()), vec![1, 3, 5, 8]);
		assert!(sorter.done().is_err());
		assert!(sorter.add(1, 1).is_err());
	}

	#[test]
	fn spills_every_record_with_zero_budget() {
		let dir = TempDir::new().unwrap();
		let opts = SortOptions::new().with_temp_dir(dir.path()).with_max_memory_usage_bytes(0);
		let mut sorter = NoLimitSorter::new(opts, Ascending, ((), ())).unwrap();
		for k in [5i64, 3, 8, 1] {
			sorter.add(k, k).unwrap();
		}
		assert_eq!(sorter.num_spills(), 4);
		assert_eq!(sorter.stats().spilled_ranges, 4);
		assert_eq!(sorted_keys(sorter.done().unwrap()), vec![1, 3, 5, 8]);
	}

	#[test]
	fn equal_keys_keep_insertion_order() {
		let dir = TempDir::new().unwrap();
		let opts = SortOptions::new().with_temp_dir(dir.path()).with_max_memory_usage_bytes(64);
		let mut sorter = NoLimitSorter::new(opts, Ascending, ((), ())).unwrap();
		for i in 0..100i64 {
			sorter.add(i % 3, i).unwrap();
		}
		let mut out = sorter.done().unwrap();
		let out = collect(out.as_mut()).unwrap();
		let mut expected: Vec<(i64, i64)> = (0..100).map(|i| (i % 3, i)).collect();
		expected.sort_by_key(|(k, _)| *k);
		assert_eq!(out, expected);
	}

	#[test]
	fn exceeding_memory_without_disk_fails() {
		let opts = SortOptions::new().with_max_memory_usage_bytes(16);
		let mut sorter = NoLimitSorter::new(opts, Ascending, ((), ())).unwrap();
		sorter.add(1i64, 1i64).unwrap();
		let err = sorter.add(2, 2).unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::QueryExceededMemoryLimitNoDiskUseAllowed { limit: 16 })
		));
	}

	#[test]
	fn missing_temp_dir_is_rejected() {
		let mut opts = SortOptions::new().with_ext_sort_allowed(true);
		opts.temp_dir = None;
		let err = NoLimitSorter::<i64, i64, _>::new(opts, Ascending, ((), ())).err().unwrap();
		assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ExternalSortTempDirMissing)));
	}

	#[test]
	fn many_spills_are_merged_in_passes() {
		let dir = TempDir::new().unwrap();
		// A budget of two buffers forces intermediate merges with a fan-in of two
		let opts = SortOptions::new()
			.with_temp_dir(dir.path())
			.with_buffer_size(64)
			.with_max_memory_usage_bytes(128);
		let mut sorter = NoLimitSorter::new(opts, Ascending, ((), ())).unwrap();
		let mut rng = StdRng::seed_from_u64(3);
		let mut input: Vec<i64> = (0..2000).map(|_| rng.gen_range(-500..500)).collect();
		for k in &input {
			sorter.add(*k, 0).unwrap();
		}
		assert!(sorter.num_spills() > 2);
		input.sort();
		assert_eq!(sorted_keys(sorter.done().unwrap()), input);
		// Every spill file is removed once the sorter and its output are gone
		drop(sorter);
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
	}

	#[test]
	fn pause_shows_unspilled_data() {
		let dir = TempDir::new().unwrap();
		let opts = SortOptions::new().with_temp_dir(dir.path()).with_max_memory_usage_bytes(40);
		let mut sorter = NoLimitSorter::new(opts, Ascending, ((), ())).unwrap();
		sorter.add(2i64, 20i64).unwrap();
		let mut paused: Vec<(i64, i64)> = sorter.pause().unwrap().map(|(k, v)| (*k, *v)).collect();
		paused.sort();
		assert_eq!(paused, vec![(2, 20)]);
		for k in 0..10 {
			sorter.add(k, k).unwrap();
		}
		let err = sorter.pause().err().unwrap();
		assert!(matches!(err.downcast_ref::<Error>(), Some(Error::SpilledSortCannotBePaused)));
	}

	#[derive(Debug, Default)]
	struct CountingPool {
		used: AtomicUsize,
		frees: AtomicUsize,
	}

	impl MemPool for CountingPool {
		fn mem_usage(&self) -> usize {
			self.used.load(Ordering::Relaxed)
		}
		fn free_unused(&self) {
			self.frees.fetch_add(1, Ordering::Relaxed);
			self.used.store(0, Ordering::Relaxed);
		}
	}

	#[test]
	fn memory_pool_drives_spilling() {
		let dir = TempDir::new().unwrap();
		let pool = Arc::new(CountingPool::default());
		let opts = SortOptions::new()
			.with_temp_dir(dir.path())
			.with_max_memory_usage_bytes(1000)
			.with_mem_pool(pool.clone());
		let mut sorter = NoLimitSorter::new(opts, Ascending, ((), ())).unwrap();
		sorter.add(1i64, 1i64).unwrap();
		assert_eq!(sorter.num_spills(), 0);
		pool.used.store(5000, Ordering::Relaxed);
		sorter.add(2, 2).unwrap();
		assert_eq!(sorter.num_spills(), 1);
		assert_eq!(pool.frees.load(Ordering::Relaxed), 1);
		assert_eq!(sorted_keys(sorter.done().unwrap()), vec![1, 2]);
	}

	#[test]
	fn strict_checks_reject_inconsistent_comparators() {
		let opts = SortOptions::new().with_strict_comparator_checks(true);
		let broken = |a: &i64, b: &i64| {
			if a == b {
				std::cmp::Ordering::Less
			} else {
				a.cmp(b)
			}
		};
		let mut sorter = NoLimitSorter::new(opts, broken, ((), ())).unwrap();
		sorter.add(1, 1).unwrap();
		sorter.add(2, 2).unwrap();
		let err = sorter.done().err().unwrap();
		assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ComparatorNotSane(_))));
	}
}
