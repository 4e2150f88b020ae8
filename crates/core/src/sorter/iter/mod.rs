use anyhow::Result;

use super::range::SorterRange;

mod file;
mod mem;
mod merge;

pub use self::file::FileIterator;
pub use self::mem::InMemIterator;
pub use self::merge::MergeIterator;

/// A stream of sorted key / value pairs.
///
/// Besides plain [`next`](SortIterator::next), sources read from disk support
/// a deferred-value protocol: [`next_with_deferred_value`] decodes only the
/// key, and the value must then be fetched with [`get_deferred_value`] before
/// the stream is advanced again. Merging relies on this to compare heads
/// without decoding every value.
///
/// [`next_with_deferred_value`]: SortIterator::next_with_deferred_value
/// [`get_deferred_value`]: SortIterator::get_deferred_value
pub trait SortIterator<K, V> {
	/// Prepares the source for reading
	fn open_source(&mut self) -> Result<()> {
		Ok(())
	}
	/// Releases the source, verifying its integrity if it was fully read
	fn close_source(&mut self) -> Result<()> {
		Ok(())
	}
	/// Whether another record is available
	fn more(&mut self) -> Result<bool>;
	/// Returns the next record
	fn next(&mut self) -> Result<(K, V)>;
	/// Returns the next key, leaving its value pending
	fn next_with_deferred_value(&mut self) -> Result<K>;
	/// Returns the value of the key last returned by `next_with_deferred_value`
	fn get_deferred_value(&mut self) -> Result<V>;
	/// Peeks at the key which the next call to `next` returns
	fn current(&mut self) -> Result<&K>;
	/// The on-disk range backing this source, if any
	fn range(&self) -> Option<SorterRange> {
		None
	}
}

/// A type-erased sorted stream, as returned by the sorters.
pub type BoxedIterator<K, V> = Box<dyn SortIterator<K, V>>;

/// Drains a sorted stream into a vector.
pub fn collect<K, V>(iter: &mut dyn SortIterator<K, V>) -> Result<Vec<(K, V)>> {
	let mut out = Vec::new();
	while iter.more()? {
		out.push(iter.next()?);
	}
	Ok(out)
}
