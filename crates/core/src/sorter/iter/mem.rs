use std::collections::VecDeque;

use anyhow::Result;

use super::SortIterator;

/// Iterates over records which never left memory.
#[derive(Debug)]
pub struct InMemIterator<K, V> {
	data: VecDeque<(K, V)>,
}

impl<K, V> InMemIterator<K, V> {
	pub fn new(data: impl Into<VecDeque<(K, V)>>) -> Self {
		Self {
			data: data.into(),
		}
	}

	pub fn empty() -> Self {
		Self {
			data: VecDeque::new(),
		}
	}
}

impl<K, V> SortIterator<K, V> for InMemIterator<K, V> {
	fn more(&mut self) -> Result<bool> {
		Ok(!self.data.is_empty())
	}

	fn next(&mut self) -> Result<(K, V)> {
		match self.data.pop_front() {
			Some(v) => Ok(v),
			None => fail!("No more records in the in-memory iterator"),
		}
	}

	fn next_with_deferred_value(&mut self) -> Result<K> {
		fail!("Deferred values are not supported by the in-memory iterator")
	}

	fn get_deferred_value(&mut self) -> Result<V> {
		fail!("Deferred values are not supported by the in-memory iterator")
	}

	fn current(&mut self) -> Result<&K> {
		match self.data.front() {
			Some((k, _)) => Ok(k),
			None => fail!("No more records in the in-memory iterator"),
		}
	}
}
