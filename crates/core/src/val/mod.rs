use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::mem;

use revision::revisioned;
use serde::{Deserialize, Serialize};

pub mod number;

pub use self::number::Number;

pub type Array = Vec<Value>;
pub type Object = BTreeMap<String, Value>;

/// A dynamically typed document value, used for group keys, accumulator
/// state and spilled group partials.
///
/// Values are totally ordered: first by variant, in declaration order, and
/// then by content. Numbers compare by numeric value across integer and
/// float representations.
#[revisioned(revision = 1)]
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
	#[default]
	None,
	Null,
	Bool(bool),
	Number(Number),
	Strand(String),
	Bytes(Vec<u8>),
	Array(Array),
	Object(Object),
	// Add new variants here
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Number(Number::Int(v))
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Number(Number::Int(v as i64))
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Number(Number::Float(v))
	}
}

impl From<Number> for Value {
	fn from(v: Number) -> Self {
		Value::Number(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Strand(v.to_owned())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Strand(v)
	}
}

impl From<Array> for Value {
	fn from(v: Array) -> Self {
		Value::Array(v)
	}
}

impl From<Object> for Value {
	fn from(v: Object) -> Self {
		Value::Object(v)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(v: Option<T>) -> Self {
		match v {
			Some(v) => v.into(),
			None => Value::None,
		}
	}
}

impl Value {
	/// Check if this Value is NONE
	pub fn is_none(&self) -> bool {
		matches!(self, Value::None)
	}

	/// Check if this Value is NONE or NULL
	pub fn is_nullish(&self) -> bool {
		matches!(self, Value::None | Value::Null)
	}

	/// Returns the number held by this value, if it is numeric
	pub fn as_number(&self) -> Option<Number> {
		match self {
			Value::Number(n) => Some(*n),
			_ => None,
		}
	}

	/// Fetches the value at a dotted field path, or NONE if any part is missing.
	///
	/// Traversing through an array collects the path from each element.
	pub fn pick(&self, path: &str) -> Value {
		if path.is_empty() {
			return self.clone();
		}
		let (head, rest) = match path.split_once('.') {
			Some((head, rest)) => (head, rest),
			None => (path, ""),
		};
		match self {
			Value::Object(o) => match o.get(head) {
				Some(v) => v.pick(rest),
				None => Value::None,
			},
			Value::Array(a) => match head.parse::<usize>() {
				Ok(i) => a.get(i).map(|v| v.pick(rest)).unwrap_or_default(),
				Err(_) => Value::Array(a.iter().map(|v| v.pick(path)).collect()),
			},
			_ => Value::None,
		}
	}

	/// The approximate number of bytes held by this value, including the inline size.
	pub fn mem_usage(&self) -> usize {
		mem::size_of::<Value>() + self.heap_usage()
	}

	fn heap_usage(&self) -> usize {
		match self {
			Value::Strand(s) => s.capacity(),
			Value::Bytes(b) => b.capacity(),
			Value::Array(a) => {
				let spare = (a.capacity() - a.len()) * mem::size_of::<Value>();
				spare + a.iter().map(Value::mem_usage).sum::<usize>()
			}
			Value::Object(o) => o.iter().map(|(k, v)| k.capacity() + v.mem_usage()).sum(),
			_ => 0,
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Value::None => f.write_str("NONE"),
			Value::Null => f.write_str("NULL"),
			Value::Bool(v) => Display::fmt(v, f),
			Value::Number(v) => Display::fmt(v, f),
			Value::Strand(v) => write!(f, "{v:?}"),
			Value::Bytes(v) => write!(f, "<bytes {}>", v.len()),
			Value::Array(v) => {
				f.write_str("[")?;
				for (i, x) in v.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					Display::fmt(x, f)?;
				}
				f.write_str("]")
			}
			Value::Object(v) => {
				f.write_str("{ ")?;
				for (i, (k, x)) in v.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{k}: {x}")?;
				}
				f.write_str(" }")
			}
		}
	}
}
