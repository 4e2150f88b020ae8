use std::cmp::Ordering;

use anyhow::Result;

use super::data::{Comparator, SaneComparator, SorterData};
use super::iter::{BoxedIterator, InMemIterator};
use super::options::SortOptions;
use super::range::PersistedState;
use super::stats::SorterStats;
use super::{Snapshot, Sorter, ValueProducer};

/// Keeps only the smallest record, so it never needs to spill.
///
/// Among equal keys the first one added wins.
pub struct LimitOneSorter<K, V, C> {
	comp: SaneComparator<C>,
	best: Option<(K, V)>,
	stats: SorterStats,
	done: bool,
}

impl<K, V, C> LimitOneSorter<K, V, C>
where
	K: SorterData + 'static,
	V: SorterData + 'static,
	C: Comparator<K>,
{
	pub fn new(opts: SortOptions, comp: C) -> Self {
		Self {
			comp: SaneComparator::new(comp, opts.strict_comparator_checks),
			best: None,
			stats: SorterStats::default(),
			done: false,
		}
	}

	fn add_with(&mut self, key: K, value: impl FnOnce() -> V) -> Result<()> {
		if self.done {
			fail!("Cannot add to a sorter which is already done");
		}
		self.stats.increment_num_sorted(1);
		if let Some((best, _)) = &self.best {
			if self.comp.compare(best, &key) != Ordering::Greater {
				return self.comp.check();
			}
		}
		let value = value();
		let usage = key.mem_usage_for_sorter() + value.mem_usage_for_sorter();
		self.stats.increment_bytes_sorted(usage as u64);
		self.stats.set_mem_usage(usage);
		self.best = Some((key, value));
		self.comp.check()
	}
}

impl<K, V, C> Sorter<K, V> for LimitOneSorter<K, V, C>
where
	K: SorterData + 'static,
	V: SorterData + 'static,
	C: Comparator<K>,
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
		self.stats.reset_mem_usage();
		Ok(Box::new(InMemIterator::new(self.best.take().into_iter().collect::<Vec<_>>())))
	}

	fn pause(&self) -> Result<Snapshot<'_, K, V>> {
		Ok(Box::new(self.best.iter().map(|(k, v)| (k, v))))
	}

	fn stats(&self) -> &SorterStats {
		&self.stats
	}

	fn num_spills(&self) -> usize {
		0
	}

	fn persist_data_for_shutdown(&mut self) -> Result<PersistedState> {
		fail!("A single-result sorter never spills, so it has nothing to persist")
	}
}
