use std::cmp::Ordering;
use std::mem;

use anyhow::Result;

use super::data::{Comparator, SaneComparator, Settings, SorterData};
use super::heap;
use super::iter::{BoxedIterator, InMemIterator};
use super::options::SortOptions;
use super::range::PersistedState;
use super::spill::Spills;
use super::stats::SorterStats;
use super::{Snapshot, Sorter, ValueProducer};
use crate::err::Error;

const TARGET: &str = "spillsort::core::sorter::top_k";

/// Keeps the `limit` smallest records.
///
/// Once `limit` records are buffered they are organised as a max-heap, so
/// a newcomer only replaces the current worst. Across spills, a cutoff key
/// is maintained below which at least `limit` records are known to exist,
/// and anything not better than the cutoff is discarded on arrival.
pub struct TopKSorter<K: SorterData, V: SorterData, C> {
	opts: SortOptions,
	limit: usize,
	comp: SaneComparator<C>,
	/// Buffered records, a max-heap whenever it holds `limit` records
	data: Vec<(K, V)>,
	spills: Spills<K, V>,
	stats: SorterStats,
	done: bool,
	/// Keys not better than this are never part of the result
	cutoff: Option<K>,
	/// The worst key kept so far, and how many kept keys are not worse
	worst_seen: Option<K>,
	worst_count: usize,
	/// The median of a spilled batch, and how many kept keys are not worse
	last_median: Option<K>,
	median_count: usize,
}

impl<K, V, C> TopKSorter<K, V, C>
where
	K: SorterData + Clone + 'static,
	V: SorterData + 'static,
	C: Comparator<K> + 'static,
{
	pub fn new(opts: SortOptions, comp: C, settings: Settings<K, V>) -> Result<Self> {
		let limit = usize::try_from(opts.limit).unwrap_or(usize::MAX);
		Ok(Self {
			spills: Spills::new(&opts, settings)?,
			comp: SaneComparator::new(comp, opts.strict_comparator_checks),
			limit,
			opts,
			data: Vec::new(),
			stats: SorterStats::default(),
			done: false,
			cutoff: None,
			worst_seen: None,
			worst_count: 0,
			last_median: None,
			median_count: 0,
		})
	}

	/// The key below which records are currently accepted, if one was established.
	pub fn cutoff(&self) -> Option<&K> {
		self.cutoff.as_ref()
	}

	fn add_with(&mut self, key: K, value: impl FnOnce() -> V) -> Result<()> {
		if self.done {
			fail!("Cannot add to a sorter which is already done");
		}
		self.stats.increment_num_sorted(1);
		let comp = &self.comp;
		if self.data.len() < self.limit {
			if let Some(cutoff) = &self.cutoff {
				if comp.compare(&key, cutoff) != Ordering::Less {
					return comp.check();
				}
			}
			let value = value();
			let usage = key.mem_usage_for_sorter() + value.mem_usage_for_sorter();
			self.stats.increment_bytes_sorted(usage as u64);
			self.stats.add_mem_usage(usage);
			self.data.push((key, value));
			if self.data.len() == self.limit {
				heap::make_heap(&mut self.data, |a, b| comp.less(&a.0, &b.0));
			}
		} else {
			// Not better than the current worst
			if comp.compare(&key, &self.data[0].0) != Ordering::Less {
				return comp.check();
			}
			let value = value();
			let usage = key.mem_usage_for_sorter() + value.mem_usage_for_sorter();
			let old = &self.data[0];
			self.stats.sub_mem_usage(old.0.mem_usage_for_sorter() + old.1.mem_usage_for_sorter());
			self.stats.increment_bytes_sorted(usage as u64);
			self.stats.add_mem_usage(usage);
			self.data[0] = (key, value);
			heap::replace_top(&mut self.data, |a, b| comp.less(&a.0, &b.0));
		}
		comp.check()?;
		if self.stats.mem_usage > self.opts.max_memory_usage_bytes {
			self.spill()?;
		}
		Ok(())
	}

	fn sort(&mut self) -> Result<()> {
		let comp = &self.comp;
		if self.data.len() == self.limit {
			heap::sort_heap(&mut self.data, |a, b| comp.less(&a.0, &b.0));
		} else {
			self.data.sort_by(|a, b| comp.compare(&a.0, &b.0));
		}
		comp.check()
	}

	/// Tightens the cutoff from a freshly sorted batch.
	fn update_cutoff(&mut self) {
		let comp = &self.comp;
		let Some((back, _)) = self.data.last() else {
			return;
		};
		match &self.worst_seen {
			Some(worst) if self.worst_count > 0 && !comp.less(worst, back) => {}
			_ => self.worst_seen = Some(back.clone()),
		}
		if self.median_count == 0 {
			// Picks the higher of the two middle records for even sizes
			self.last_median = Some(self.data[self.data.len() / 2].0.clone());
		}
		self.worst_count += self.data.len();
		if let Some(median) = &self.last_median {
			self.median_count +=
				self.data.partition_point(|(k, _)| comp.compare(k, median) != Ordering::Greater);
		}
		if self.worst_count >= self.limit {
			if let Some(worst) = self.worst_seen.take() {
				self.promote(worst);
			}
			self.worst_count = 0;
		}
		if self.median_count >= self.limit {
			if let Some(median) = self.last_median.take() {
				self.promote(median);
			}
			self.median_count = 0;
		}
	}

	fn promote(&mut self, candidate: K) {
		let better = match &self.cutoff {
			Some(cutoff) => self.comp.less(&candidate, cutoff),
			None => true,
		};
		if better {
			trace!(target: TARGET, "Tightened the top-k cutoff");
			self.cutoff = Some(candidate);
		}
	}

	fn spill(&mut self) -> Result<()> {
		if self.data.is_empty() {
			return Ok(());
		}
		self.opts.ensure_spill_allowed()?;
		self.sort()?;
		self.update_cutoff();
		let data = mem::take(&mut self.data);
		self.spills.spill(data, &mut self.stats)?;
		self.stats.reset_mem_usage();
		Ok(())
	}
}

impl<K, V, C> Sorter<K, V> for TopKSorter<K, V, C>
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
