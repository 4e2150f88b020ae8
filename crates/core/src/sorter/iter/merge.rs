use std::cmp::Ordering;

use anyhow::Result;

use super::{BoxedIterator, SortIterator};
use crate::sorter::data::{Comparator, SaneComparator};
use crate::sorter::heap;

/// One merge input, positioned on a key whose value is still deferred.
struct Stream<K, V> {
	/// The position of the source, which breaks ties between equal keys
	num: usize,
	current: K,
	rest: BoxedIterator<K, V>,
}

impl<K, V> Stream<K, V> {
	/// Moves to the next key, returning false once the source is exhausted.
	fn advance(&mut self) -> Result<bool> {
		if !self.rest.more()? {
			return Ok(false);
		}
		self.current = self.rest.next_with_deferred_value()?;
		Ok(true)
	}
}

/// Merges any number of sorted sources into one sorted stream.
///
/// The smallest head is kept outside the heap in `current`, so a run of
/// records from the same source costs one comparison each. Among equal
/// keys, the source added first wins.
pub struct MergeIterator<K, V, C> {
	comp: SaneComparator<C>,
	/// The number of records still to return
	remaining: u64,
	/// Whether `current` holds a key which has not been returned yet
	positioned: bool,
	current: Option<Stream<K, V>>,
	/// A min-heap of the other sources
	heap: Vec<Stream<K, V>>,
	next_num: usize,
	exhausted: bool,
}

impl<K, V, C> MergeIterator<K, V, C>
where
	K: Clone,
	C: Comparator<K>,
{
	/// Opens every source, skipping the empty ones. A `limit` of zero is unlimited.
	pub fn new(sources: Vec<BoxedIterator<K, V>>, limit: u64, comp: C) -> Result<Self> {
		Self::with_strict_checks(sources, limit, comp, false)
	}

	pub(crate) fn with_strict_checks(
		sources: Vec<BoxedIterator<K, V>>,
		limit: u64,
		comp: C,
		strict: bool,
	) -> Result<Self> {
		let mut merge = Self {
			comp: SaneComparator::new(comp, strict),
			remaining: if limit == 0 {
				u64::MAX
			} else {
				limit
			},
			positioned: false,
			current: None,
			heap: Vec::with_capacity(sources.len()),
			next_num: 0,
			exhausted: false,
		};
		for source in sources {
			if let Some(stream) = merge.open(source)? {
				let comp = &merge.comp;
				heap::push_heap(&mut merge.heap, stream, |a, b| greater(comp, a, b));
			}
		}
		let comp = &merge.comp;
		merge.current = heap::pop_heap(&mut merge.heap, |a, b| greater(comp, a, b));
		merge.positioned = merge.current.is_some();
		merge.comp.check()?;
		Ok(merge)
	}

	/// Opens a source and reads its first key, closing it if it is empty.
	fn open(&mut self, mut source: BoxedIterator<K, V>) -> Result<Option<Stream<K, V>>> {
		let num = self.next_num;
		self.next_num += 1;
		source.open_source()?;
		if !source.more()? {
			source.close_source()?;
			return Ok(None);
		}
		let current = source.next_with_deferred_value()?;
		Ok(Some(Stream {
			num,
			current,
			rest: source,
		}))
	}

	/// Adds another sorted source to a merge which is still in progress.
	///
	/// Its records are ordered after those of every existing source with an
	/// equal key.
	pub fn add_source(&mut self, source: BoxedIterator<K, V>) -> Result<()> {
		if self.exhausted {
			fail!("Cannot add a source to a merge which is already exhausted");
		}
		// The current stream must hold an unreturned key before it can be compared
		if !self.positioned && self.current.is_some() {
			self.advance()?;
			self.positioned = self.current.is_some();
		}
		let Some(stream) = self.open(source)? else {
			return Ok(());
		};
		match self.current.as_mut() {
			None => {
				self.current = Some(stream);
				self.positioned = true;
			}
			Some(current) => {
				let comp = &self.comp;
				heap::push_heap(&mut self.heap, stream, |a, b| greater(comp, a, b));
				if greater(comp, current, &self.heap[0]) {
					std::mem::swap(current, &mut self.heap[0]);
					heap::replace_top(&mut self.heap, |a, b| greater(comp, a, b));
				}
			}
		}
		self.comp.check()
	}

	/// Moves `current` to the smallest unreturned key across all sources.
	fn advance(&mut self) -> Result<()> {
		let Some(current) = self.current.as_mut() else {
			return Ok(());
		};
		if current.advance()? {
			let comp = &self.comp;
			if !self.heap.is_empty() && greater(comp, current, &self.heap[0]) {
				std::mem::swap(current, &mut self.heap[0]);
				heap::replace_top(&mut self.heap, |a, b| greater(comp, a, b));
			}
		} else {
			current.rest.close_source()?;
			let comp = &self.comp;
			self.current = heap::pop_heap(&mut self.heap, |a, b| greater(comp, a, b));
		}
		self.comp.check()
	}
}

/// Orders streams for a min-heap, breaking ties by source position.
fn greater<K, V, C: Comparator<K>>(
	comp: &SaneComparator<C>,
	a: &Stream<K, V>,
	b: &Stream<K, V>,
) -> bool {
	match comp.compare(&a.current, &b.current) {
		Ordering::Equal => a.num > b.num,
		ord => ord == Ordering::Greater,
	}
}

impl<K, V, C> SortIterator<K, V> for MergeIterator<K, V, C>
where
	K: Clone,
	C: Comparator<K>,
{
	fn close_source(&mut self) -> Result<()> {
		if let Some(mut current) = self.current.take() {
			current.rest.close_source()?;
		}
		for mut stream in self.heap.drain(..) {
			stream.rest.close_source()?;
		}
		Ok(())
	}

	fn more(&mut self) -> Result<bool> {
		if self.remaining > 0 {
			if self.positioned || !self.heap.is_empty() {
				return Ok(true);
			}
			if let Some(current) = self.current.as_mut() {
				if current.rest.more()? {
					return Ok(true);
				}
			}
		}
		self.remaining = 0;
		self.exhausted = true;
		// Closing a fully read source verifies its checksum
		self.close_source()?;
		Ok(false)
	}

	fn next(&mut self) -> Result<(K, V)> {
		if self.remaining == 0 {
			fail!("No more records in the merge");
		}
		if self.positioned {
			self.positioned = false;
		} else {
			self.advance()?;
		}
		let Some(current) = self.current.as_mut() else {
			fail!("No more records in the merge");
		};
		self.remaining -= 1;
		let key = current.current.clone();
		let value = current.rest.get_deferred_value()?;
		Ok((key, value))
	}

	fn next_with_deferred_value(&mut self) -> Result<K> {
		fail!("Deferred values are not supported by the merge iterator")
	}

	fn get_deferred_value(&mut self) -> Result<V> {
		fail!("Deferred values are not supported by the merge iterator")
	}

	fn current(&mut self) -> Result<&K> {
		if self.remaining == 0 {
			fail!("No more records in the merge");
		}
		if !self.positioned {
			self.advance()?;
			self.positioned = self.current.is_some();
		}
		match &self.current {
			Some(current) => Ok(&current.current),
			None => fail!("No more records in the merge"),
		}
	}
}

#[cfg(test)]
mod tests {
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};
	use tempfile::TempDir;
	use test_log::test;

	use super::*;
	use crate::err::Error;
	use crate::sorter::data::Ascending;
	use crate::sorter::iter::{collect, InMemIterator};
	use crate::sorter::options::SortOptions;
	use crate::sorter::writer::SortedFileWriter;

	/// A source which supports deferred values, backed by memory.
	struct Deferred {
		data: std::collections::VecDeque<(i32, &'static str)>,
		pending: Option<&'static str>,
	}

	impl Deferred {
		fn boxed(data: Vec<(i32, &'static str)>) -> BoxedIterator<i32, &'static str> {
			Box::new(Self {
				data: data.into(),
				pending: None,
			})
		}
	}

	impl SortIterator<i32, &'static str> for Deferred {
		fn more(&mut self) -> Result<bool> {
			Ok(!self.data.is_empty())
		}
		fn next(&mut self) -> Result<(i32, &'static str)> {
			let k = self.next_with_deferred_value()?;
			Ok((k, self.get_deferred_value()?))
		}
		fn next_with_deferred_value(&mut self) -> Result<i32> {
			let Some((k, v)) = self.data.pop_front() else {
				fail!("empty");
			};
			self.pending = Some(v);
			Ok(k)
		}
		fn get_deferred_value(&mut self) -> Result<&'static str> {
			match self.pending.take() {
				Some(v) => Ok(v),
				None => fail!("no pending value"),
			}
		}
		fn current(&mut self) -> Result<&i32> {
			fail!("unsupported")
		}
	}

	#[test]
	fn merges_sorted_sources() {
		let sources = vec![
			Deferred::boxed(vec![(1, "a"), (4, "a"), (7, "a")]),
			Deferred::boxed(vec![]),
			Deferred::boxed(vec![(2, "c"), (3, "c"), (8, "c")]),
		];
		let mut merge = MergeIterator::new(sources, 0, Ascending).unwrap();
		let keys: Vec<i32> = collect(&mut merge).unwrap().into_iter().map(|(k, _)| k).collect();
		assert_eq!(keys, vec![1, 2, 3, 4, 7, 8]);
	}

	#[test]
	fn ties_favour_earlier_sources() {
		let sources = vec![
			Deferred::boxed(vec![(1, "first"), (5, "first")]),
			Deferred::boxed(vec![(1, "second"), (5, "second")]),
			Deferred::boxed(vec![(5, "third")]),
		];
		let mut merge = MergeIterator::new(sources, 0, Ascending).unwrap();
		let out = collect(&mut merge).unwrap();
		assert_eq!(
			out,
			vec![(1, "first"), (1, "second"), (5, "first"), (5, "second"), (5, "third")]
		);
	}

	#[test]
	fn limit_truncates_output() {
		let sources =
			vec![Deferred::boxed(vec![(1, "a"), (3, "a")]), Deferred::boxed(vec![(2, "b")])];
		let mut merge = MergeIterator::new(sources, 2, Ascending).unwrap();
		assert_eq!(collect(&mut merge).unwrap(), vec![(1, "a"), (2, "b")]);
	}

	#[test]
	fn peeking_and_adding_sources() {
		let mut merge =
			MergeIterator::new(vec![Deferred::boxed(vec![(2, "a"), (6, "a")])], 0, Ascending)
				.unwrap();
		assert_eq!(*merge.current().unwrap(), 2);
		assert_eq!(merge.next().unwrap(), (2, "a"));
		// The new source holds a key below the current head
		merge.add_source(Deferred::boxed(vec![(3, "b"), (6, "b")])).unwrap();
		assert_eq!(*merge.current().unwrap(), 3);
		assert_eq!(collect(&mut merge).unwrap(), vec![(3, "b"), (6, "a"), (6, "b")]);
		let err = merge.add_source(Deferred::boxed(vec![(9, "c")])).unwrap_err();
		assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Unreachable(_))));
	}

	#[test]
	fn adding_to_an_empty_merge() {
		let mut merge = MergeIterator::new(Vec::new(), 0, Ascending).unwrap();
		merge.add_source(Deferred::boxed(vec![(4, "x")])).unwrap();
		assert_eq!(collect(&mut merge).unwrap(), vec![(4, "x")]);
	}

	#[test]
	fn in_memory_sources_cannot_be_merged() {
		let sources: Vec<BoxedIterator<i32, &'static str>> =
			vec![Box::new(InMemIterator::new(vec![(1, "a")]))];
		assert!(MergeIterator::new(sources, 0, Ascending).is_err());
	}

	#[test]
	fn merges_spilled_runs_from_one_file() {
		let dir = TempDir::new().unwrap();
		let opts = SortOptions::new().with_temp_dir(dir.path()).with_buffer_size(128);
		let file = opts.new_spill_file().unwrap();
		let mut rng = StdRng::seed_from_u64(42);
		let mut all = Vec::new();
		let mut sources: Vec<BoxedIterator<u32, u32>> = Vec::new();
		for run in 0..5u32 {
			let mut keys: Vec<u32> = (0..300).map(|_| rng.gen_range(0..1000)).collect();
			keys.sort_unstable();
			let mut writer = SortedFileWriter::new(&opts, file.clone(), ((), ())).unwrap();
			for k in keys {
				writer.add_already_sorted(&k, &run).unwrap();
				all.push((k, run));
			}
			sources.push(Box::new(writer.done().unwrap()));
		}
		// Equal keys come out in run order, as the input was stably ordered by run
		all.sort_by_key(|(k, _)| *k);
		let mut merge = MergeIterator::new(sources, 0, Ascending).unwrap();
		assert_eq!(collect(&mut merge).unwrap(), all);
	}
}
