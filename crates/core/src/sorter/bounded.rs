use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

use anyhow::{bail, Result};

use super::data::{Comparator, SaneComparator, Settings, SorterData};
use super::file::SpillFile;
use super::heap;
use super::iter::{BoxedIterator, MergeIterator, SortIterator};
use super::options::SortOptions;
use super::stats::SorterStats;
use super::writer::SortedFileWriter;
use super::Snapshot;
use crate::err::Error;

const TARGET: &str = "spillsort::core::sorter::bounded";

/// Whether a [`BoundedSorter`] can return a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoundedState {
	/// More input is needed before the smallest record is known
	Wait,
	/// The smallest record can be returned with `next`
	Ready,
	/// Nothing more will be returned
	Done,
}

/// Sorts a stream whose keys are known to never fall below an advancing bound.
///
/// Every record added also tightens a lower bound on all future keys,
/// computed by the bound maker. Buffered records below that bound can be
/// returned straight away, so the sort produces output while input is still
/// arriving. The `limit`, when set, caps the number of records returned.
pub struct BoundedSorter<K: SorterData, V: SorterData, C, B> {
	opts: SortOptions,
	settings: Settings<K, V>,
	comp: SaneComparator<C>,
	make_bound: B,
	check_input: bool,
	/// A min-heap of the buffered records
	heap: Vec<(K, V)>,
	/// The lowest key any future input may have
	min: Option<K>,
	file: Option<Arc<SpillFile>>,
	spilled: Option<MergeIterator<K, V, C>>,
	stats: SorterStats,
	done: bool,
}

impl<K, V, C, B> BoundedSorter<K, V, C, B>
where
	K: SorterData + Clone + 'static,
	V: SorterData + 'static,
	C: Comparator<K> + 'static,
	B: Fn(&K, &V) -> K,
{
	/// Creates a sorter. With `check_input`, keys below the current bound are rejected.
	pub fn new(
		opts: SortOptions,
		comp: C,
		make_bound: B,
		check_input: bool,
		settings: Settings<K, V>,
	) -> Result<Self> {
		Ok(Self {
			file: opts.initial_spill_file()?,
			comp: SaneComparator::new(comp, opts.strict_comparator_checks),
			opts,
			settings,
			make_bound,
			check_input,
			heap: Vec::new(),
			min: None,
			spilled: None,
			stats: SorterStats::default(),
			done: false,
		})
	}

	pub fn add(&mut self, key: K, value: V) -> Result<()> {
		if self.done {
			fail!("Cannot add to a bounded sorter which is already done");
		}
		if self.check_input {
			if let Some(min) = &self.min {
				if self.comp.compare(min, &key) == Ordering::Greater {
					bail!(Error::SortedInputOutOfOrder);
				}
			}
		}
		let bound = (self.make_bound)(&key, &value);
		match &self.min {
			Some(min) if !self.comp.less(min, &bound) => {}
			_ => self.min = Some(bound),
		}
		let usage = key.mem_usage_for_sorter() + value.mem_usage_for_sorter();
		let comp = &self.comp;
		heap::push_heap(&mut self.heap, (key, value), |a, b| comp.less(&b.0, &a.0));
		comp.check()?;
		self.stats.add_mem_usage(usage);
		self.stats.increment_bytes_sorted(usage as u64);
		if self.stats.mem_usage > self.opts.max_memory_usage_bytes {
			self.spill()?;
		}
		Ok(())
	}

	/// Ends the input, after which every buffered record becomes ready.
	pub fn done(&mut self) {
		self.done = true;
	}

	pub fn state(&mut self) -> Result<BoundedState> {
		if self.opts.limit > 0 && self.stats.num_sorted == self.opts.limit {
			return Ok(BoundedState::Done);
		}
		if self.done {
			return Ok(match self.heap.is_empty() && self.spilled.is_none() {
				true => BoundedState::Done,
				false => BoundedState::Ready,
			});
		}
		let Some(min) = &self.min else {
			return Ok(BoundedState::Wait);
		};
		// Only records strictly below the bound cannot be beaten by later input
		if let Some((top, _)) = self.heap.first() {
			if self.comp.less(top, min) {
				return Ok(BoundedState::Ready);
			}
		}
		if let Some(spilled) = self.spilled.as_mut() {
			if self.comp.less(spilled.current()?, min) {
				return Ok(BoundedState::Ready);
			}
		}
		self.comp.check()?;
		Ok(BoundedState::Wait)
	}

	/// Returns the smallest record. Only valid in the [`BoundedState::Ready`] state.
	pub fn next(&mut self) -> Result<(K, V)> {
		if self.state()? != BoundedState::Ready {
			fail!("A bounded sorter can only return records when it is ready");
		}
		let from_heap = match (self.heap.first(), self.spilled.as_mut()) {
			(Some((top, _)), Some(spilled)) => {
				self.comp.compare(top, spilled.current()?) != Ordering::Greater
			}
			(Some(_), None) => true,
			(None, _) => false,
		};
		let record = if from_heap {
			let comp = &self.comp;
			let Some(record) = heap::pop_heap(&mut self.heap, |a, b| comp.less(&b.0, &a.0)) else {
				fail!("A ready bounded sorter has an empty heap");
			};
			self.stats
				.sub_mem_usage(record.0.mem_usage_for_sorter() + record.1.mem_usage_for_sorter());
			record
		} else {
			let Some(spilled) = self.spilled.as_mut() else {
				fail!("A ready bounded sorter has no records");
			};
			let record = spilled.next()?;
			if !spilled.more()? {
				self.spilled = None;
			}
			record
		};
		self.comp.check()?;
		self.stats.increment_num_sorted(1);
		Ok(record)
	}

	/// Starts sorting a new stream. Only valid in the [`BoundedState::Done`] state.
	///
	/// The number of records returned so far is kept, so a reached limit
	/// leaves the sorter done.
	pub fn restart(&mut self) -> Result<()> {
		if self.state()? != BoundedState::Done {
			fail!("A bounded sorter must be done before it can restart");
		}
		self.spilled = None;
		self.heap.clear();
		self.stats.reset_mem_usage();
		self.done = false;
		self.min = None;
		Ok(())
	}

	/// Returns the buffered records, in no particular order.
	pub fn pause(&self) -> Result<Snapshot<'_, K, V>> {
		if self.spilled.is_some() {
			bail!(Error::SpilledSortCannotBePaused);
		}
		Ok(Box::new(self.heap.iter().map(|(k, v)| (k, v))))
	}

	pub fn stats(&self) -> &SorterStats {
		&self.stats
	}

	fn spill(&mut self) -> Result<()> {
		if self.heap.is_empty() {
			return Ok(());
		}
		let limit = usize::try_from(self.opts.limit).unwrap_or(usize::MAX);
		// With a small limit, the surplus can be dropped instead of spilled
		if limit > 0 && limit < self.heap.len() / 2 {
			let comp = &self.comp;
			self.heap.sort_by(|a, b| comp.compare(&a.0, &b.0));
			self.heap.truncate(limit);
			comp.check()?;
			// A sorted vector already satisfies the heap order
			let usage =
				self.heap.iter().map(|(k, v)| k.mem_usage_for_sorter() + v.mem_usage_for_sorter());
			self.stats.set_mem_usage(usage.sum());
			trace!(target: TARGET, kept = limit, "Truncated the bounded sorter heap");
			if self.stats.mem_usage < self.opts.max_memory_usage_bytes {
				return Ok(());
			}
		}
		self.opts.ensure_spill_allowed()?;
		let Some(file) = &self.file else {
			fail!("Spilling is allowed but no spill file was created");
		};
		let mut data = mem::take(&mut self.heap);
		let comp = &self.comp;
		data.sort_by(|a, b| comp.compare(&a.0, &b.0));
		comp.check()?;
		let mut writer =
			SortedFileWriter::<K, V>::new(&self.opts, file.clone(), self.settings.clone())?;
		for (key, value) in &data {
			writer.add_already_sorted(key, value)?;
		}
		let run: BoxedIterator<K, V> = Box::new(writer.done()?);
		debug!(target: TARGET, records = data.len(), "Spilled bounded sorter heap");
		self.stats.spilled_ranges += 1;
		self.stats.spilled_key_values += data.len() as u64;
		match self.spilled.as_mut() {
			Some(spilled) => spilled.add_source(run)?,
			None => {
				self.spilled = Some(MergeIterator::with_strict_checks(
					vec![run],
					0,
					self.comp.inner().clone(),
					self.opts.strict_comparator_checks,
				)?)
			}
		}
		self.stats.reset_mem_usage();
		Ok(())
	}
}
