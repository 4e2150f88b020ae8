//! External merge sorting.
//!
//! Records are buffered in memory until the memory budget is exceeded, at
//! which point they are sorted and written to a spill file as one sorted run.
//! When the input ends, the runs are merged back into a single sorted stream.
//! [`make`] picks the sorter best suited to the requested limit.

use anyhow::Result;

mod bounded;
mod checksum;
mod column;
mod data;
mod file;
mod heap;
mod iter;
mod limit_one;
mod no_limit;
mod options;
mod protect;
mod range;
mod spill;
mod stats;
mod top_k;
mod writer;

pub use self::bounded::{BoundedSorter, BoundedState};
pub use self::checksum::{ChecksumCalculator, ChecksumVersion};
pub use self::column::{CellValue, ColumnKey, ColumnStoreSorter};
pub use self::data::{Ascending, Comparator, Descending, Settings, SorterData};
pub use self::file::{FileNameGenerator, SorterFileStats, SpillFile, UniqueFileNames};
pub use self::iter::{
	collect, BoxedIterator, FileIterator, InMemIterator, MergeIterator, SortIterator,
};
pub use self::limit_one::LimitOneSorter;
pub use self::no_limit::NoLimitSorter;
pub use self::options::{MemPool, SortOptions};
pub use self::protect::TmpDataProtector;
pub use self::range::{PersistedState, SorterRange};
pub(crate) use self::spill::Spills;
pub use self::stats::SorterStats;
pub use self::top_k::TopKSorter;
pub use self::writer::{create_file_iterator_for_resume, SortedFileWriter};

/// Builds a value on demand, so sorters which discard a record never pay for its value.
pub type ValueProducer<'a, V> = Box<dyn FnOnce() -> V + 'a>;

/// A read-only view of the records a sorter holds in memory.
pub type Snapshot<'a, K, V> = Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a>;

/// A sorter accepting records in any order and returning them sorted.
pub trait Sorter<K, V> {
	/// Adds a record.
	fn add(&mut self, key: K, value: V) -> Result<()>;

	/// Adds a record whose value is only built if the record is kept.
	fn emplace(&mut self, key: K, value: ValueProducer<'_, V>) -> Result<()>;

	/// Ends the input and returns the sorted records. May only be called once.
	fn done(&mut self) -> Result<BoxedIterator<K, V>>;

	/// Returns the records held in memory, in no particular order.
	///
	/// Fails once any record has been spilled, as the view would be incomplete.
	fn pause(&self) -> Result<Snapshot<'_, K, V>>;

	fn stats(&self) -> &SorterStats;

	/// The number of sorted runs currently on disk
	fn num_spills(&self) -> usize;

	/// Spills everything, keeps the spill file and describes the runs within it,
	/// so that sorting can resume with [`make_from_existing_ranges`].
	fn persist_data_for_shutdown(&mut self) -> Result<PersistedState>;
}

/// Creates the sorter suited to `opts.limit`: unlimited, a single result, or the top K.
pub fn make<K, V, C>(
	opts: SortOptions,
	comp: C,
	settings: Settings<K, V>,
) -> Result<Box<dyn Sorter<K, V>>>
where
	K: SorterData + Clone + 'static,
	V: SorterData + 'static,
	C: Comparator<K> + 'static,
{
	Ok(match opts.limit {
		0 => Box::new(NoLimitSorter::new(opts, comp, settings)?),
		1 => Box::new(LimitOneSorter::new(opts, comp)),
		_ => Box::new(TopKSorter::new(opts, comp, settings)?),
	})
}

/// Rebuilds an unlimited sorter over runs kept by [`Sorter::persist_data_for_shutdown`].
pub fn make_from_existing_ranges<K, V, C>(
	file_name: &str,
	ranges: &[SorterRange],
	opts: SortOptions,
	comp: C,
	settings: Settings<K, V>,
) -> Result<Box<dyn Sorter<K, V>>>
where
	K: SorterData + Clone + 'static,
	V: SorterData + 'static,
	C: Comparator<K> + 'static,
{
	if opts.limit != 0 {
		fail!("Only unlimited sorters can be resumed from existing ranges");
	}
	Ok(Box::new(NoLimitSorter::from_existing_ranges(file_name, ranges, opts, comp, settings)?))
}
