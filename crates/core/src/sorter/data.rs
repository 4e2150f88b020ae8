//! Serialization and comparison contracts for sorted keys and values.

use std::cell::Cell;
use std::cmp::Ordering;
use std::io::Read;
use std::mem;

use anyhow::{bail, Result};
use revision::Revisioned;

use crate::err::Error;
use crate::val::Value;

/// A type which can be held by a sorter and spilled to disk.
///
/// Records are written back to back, so `deserialize_for_sorter` must consume
/// exactly the bytes which `serialize_for_sorter` produced.
pub trait SorterData: Sized {
	/// Per-sort settings needed to decode a record
	type Settings: Clone + Default;
	/// Appends the encoded record to the buffer
	fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()>;
	/// Decodes one record, advancing the reader past it
	fn deserialize_for_sorter(reader: &mut &[u8], settings: &Self::Settings) -> Result<Self>;
	/// The approximate number of bytes this record holds in memory
	fn mem_usage_for_sorter(&self) -> usize;
}

/// Decoding settings for a key / value pair.
pub type Settings<K, V> = (<K as SorterData>::Settings, <V as SorterData>::Settings);

fn read_array<const N: usize>(reader: &mut &[u8]) -> Result<[u8; N]> {
	let mut out = [0u8; N];
	if let Err(e) = reader.read_exact(&mut out) {
		bail!(Error::Deserialization(e.to_string()));
	}
	Ok(out)
}

fn read_len_prefixed(reader: &mut &[u8]) -> Result<Vec<u8>> {
	let len = u32::from_le_bytes(read_array::<4>(reader)?) as usize;
	if reader.len() < len {
		bail!(Error::Deserialization(format!(
			"record claims {len} bytes but only {} remain",
			reader.len()
		)));
	}
	let (head, tail) = reader.split_at(len);
	*reader = tail;
	Ok(head.to_vec())
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
	let Ok(len) = u32::try_from(bytes.len()) else {
		bail!(Error::ChunkTooLarge(bytes.len()));
	};
	buf.extend_from_slice(&len.to_le_bytes());
	buf.extend_from_slice(bytes);
	Ok(())
}

macro_rules! impl_sorter_data_for_num {
	($($t:ty),+) => {
		$(
			impl SorterData for $t {
				type Settings = ();
				fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()> {
					buf.extend_from_slice(&self.to_le_bytes());
					Ok(())
				}
				fn deserialize_for_sorter(reader: &mut &[u8], _: &()) -> Result<Self> {
					Ok(<$t>::from_le_bytes(read_array::<{ mem::size_of::<$t>() }>(reader)?))
				}
				fn mem_usage_for_sorter(&self) -> usize {
					mem::size_of::<$t>()
				}
			}
		)+
	};
}

impl_sorter_data_for_num!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl SorterData for () {
	type Settings = ();
	fn serialize_for_sorter(&self, _: &mut Vec<u8>) -> Result<()> {
		Ok(())
	}
	fn deserialize_for_sorter(_: &mut &[u8], _: &()) -> Result<Self> {
		Ok(())
	}
	fn mem_usage_for_sorter(&self) -> usize {
		0
	}
}

impl SorterData for bool {
	type Settings = ();
	fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()> {
		buf.push(*self as u8);
		Ok(())
	}
	fn deserialize_for_sorter(reader: &mut &[u8], _: &()) -> Result<Self> {
		Ok(read_array::<1>(reader)?[0] != 0)
	}
	fn mem_usage_for_sorter(&self) -> usize {
		mem::size_of::<bool>()
	}
}

impl SorterData for String {
	type Settings = ();
	fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()> {
		write_len_prefixed(buf, self.as_bytes())
	}
	fn deserialize_for_sorter(reader: &mut &[u8], _: &()) -> Result<Self> {
		match String::from_utf8(read_len_prefixed(reader)?) {
			Ok(v) => Ok(v),
			Err(e) => bail!(Error::Deserialization(e.to_string())),
		}
	}
	fn mem_usage_for_sorter(&self) -> usize {
		mem::size_of::<String>() + self.capacity()
	}
}

impl SorterData for Vec<u8> {
	type Settings = ();
	fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()> {
		write_len_prefixed(buf, self)
	}
	fn deserialize_for_sorter(reader: &mut &[u8], _: &()) -> Result<Self> {
		read_len_prefixed(reader)
	}
	fn mem_usage_for_sorter(&self) -> usize {
		mem::size_of::<Vec<u8>>() + self.capacity()
	}
}

impl<A: SorterData, B: SorterData> SorterData for (A, B) {
	type Settings = (A::Settings, B::Settings);
	fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()> {
		self.0.serialize_for_sorter(buf)?;
		self.1.serialize_for_sorter(buf)
	}
	fn deserialize_for_sorter(reader: &mut &[u8], settings: &Self::Settings) -> Result<Self> {
		let a = A::deserialize_for_sorter(reader, &settings.0)?;
		let b = B::deserialize_for_sorter(reader, &settings.1)?;
		Ok((a, b))
	}
	fn mem_usage_for_sorter(&self) -> usize {
		self.0.mem_usage_for_sorter() + self.1.mem_usage_for_sorter()
	}
}

impl SorterData for Value {
	type Settings = ();
	fn serialize_for_sorter(&self, buf: &mut Vec<u8>) -> Result<()> {
		self.serialize_revisioned(buf).map_err(Error::Revision)?;
		Ok(())
	}
	fn deserialize_for_sorter(reader: &mut &[u8], _: &()) -> Result<Self> {
		Ok(Value::deserialize_revisioned(reader).map_err(Error::Revision)?)
	}
	fn mem_usage_for_sorter(&self) -> usize {
		self.mem_usage()
	}
}

/// A total order over sort keys.
pub trait Comparator<K: ?Sized>: Clone {
	fn compare(&self, a: &K, b: &K) -> Ordering;
}

impl<K: ?Sized, F> Comparator<K> for F
where
	F: Fn(&K, &K) -> Ordering + Clone,
{
	fn compare(&self, a: &K, b: &K) -> Ordering {
		self(a, b)
	}
}

/// Orders keys by their natural [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ascending;

impl<K: Ord + ?Sized> Comparator<K> for Ascending {
	fn compare(&self, a: &K, b: &K) -> Ordering {
		a.cmp(b)
	}
}

/// Orders keys in the reverse of their natural [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Descending;

impl<K: Ord + ?Sized> Comparator<K> for Descending {
	fn compare(&self, a: &K, b: &K) -> Ordering {
		b.cmp(a)
	}
}

/// Wraps a comparator, optionally checking every comparison for
/// antisymmetry and reflexivity.
///
/// Violations are recorded rather than raised, as they are detected deep
/// inside sorting routines, and are reported by [`SaneComparator::check`].
#[derive(Clone, Debug)]
pub(crate) struct SaneComparator<C> {
	inner: C,
	strict: bool,
	violation: Cell<bool>,
}

impl<C> SaneComparator<C> {
	pub(crate) fn new(inner: C, strict: bool) -> Self {
		Self {
			inner,
			strict,
			violation: Cell::new(false),
		}
	}

	pub(crate) fn inner(&self) -> &C {
		&self.inner
	}

	pub(crate) fn compare<K: ?Sized>(&self, a: &K, b: &K) -> Ordering
	where
		C: Comparator<K>,
	{
		let ord = self.inner.compare(a, b);
		if self.strict {
			let sane = self.inner.compare(b, a) == ord.reverse()
				&& self.inner.compare(a, a) == Ordering::Equal
				&& self.inner.compare(b, b) == Ordering::Equal;
			if !sane {
				self.violation.set(true);
			}
		}
		ord
	}

	pub(crate) fn less<K: ?Sized>(&self, a: &K, b: &K) -> bool
	where
		C: Comparator<K>,
	{
		self.compare(a, b) == Ordering::Less
	}

	/// Fails if any comparison since the last check was inconsistent.
	pub(crate) fn check(&self) -> Result<()> {
		if self.violation.replace(false) {
			bail!(Error::ComparatorNotSane(
				"comparison results are not antisymmetric or not reflexive".to_string()
			));
		}
		Ok(())
	}
}
