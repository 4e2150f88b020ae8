use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash;
use std::ops;

use revision::revisioned;
use serde::{Deserialize, Serialize};

#[revisioned(revision = 1)]
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum Number {
	Int(i64),
	Float(f64),
}

impl Default for Number {
	fn default() -> Self {
		Self::Int(0)
	}
}

impl From<i64> for Number {
	fn from(v: i64) -> Self {
		Self::Int(v)
	}
}

impl From<i32> for Number {
	fn from(v: i32) -> Self {
		Self::Int(v as i64)
	}
}

impl From<f64> for Number {
	fn from(v: f64) -> Self {
		Self::Float(v)
	}
}

impl Display for Number {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Number::Int(v) => Display::fmt(v, f),
			Number::Float(v) => {
				if v.is_finite() && v.fract() == 0.0 {
					write!(f, "{v}f")
				} else {
					Display::fmt(v, f)
				}
			}
		}
	}
}

impl Number {
	pub fn is_int(&self) -> bool {
		matches!(self, Number::Int(_))
	}

	pub fn is_float(&self) -> bool {
		matches!(self, Number::Float(_))
	}

	pub fn as_int(self) -> i64 {
		match self {
			Number::Int(v) => v,
			Number::Float(v) => v as i64,
		}
	}

	pub fn as_float(self) -> f64 {
		match self {
			Number::Int(v) => v as f64,
			Number::Float(v) => v,
		}
	}

	/// Returns the integer this number is exactly equal to, if any.
	fn as_exact_int(&self) -> Option<i64> {
		match self {
			Number::Int(v) => Some(*v),
			Number::Float(v) => {
				if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 {
					Some(*v as i64)
				} else {
					None
				}
			}
		}
	}
}

/// Orders floats totally, with NaN below every other number.
fn float_cmp(a: f64, b: f64) -> Ordering {
	a.partial_cmp(&b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()).reverse())
}

/// Compares an integer with a float exactly, without rounding the integer.
fn int_float_cmp(v: i64, w: f64) -> Ordering {
	// 2^63, the first float above every i64
	const LIMIT: f64 = 9_223_372_036_854_775_808.0;
	if w.is_nan() {
		return Ordering::Greater;
	}
	if w >= LIMIT {
		return Ordering::Less;
	}
	if w < -LIMIT {
		return Ordering::Greater;
	}
	let whole = w.trunc();
	match v.cmp(&(whole as i64)) {
		Ordering::Equal => float_cmp(whole, w),
		o => o,
	}
}

impl Ord for Number {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Number::Int(v), Number::Int(w)) => v.cmp(w),
			(Number::Float(v), Number::Float(w)) => float_cmp(*v, *w),
			// ------------------------------
			(Number::Int(v), Number::Float(w)) => int_float_cmp(*v, *w),
			(Number::Float(v), Number::Int(w)) => int_float_cmp(*w, *v).reverse(),
		}
	}
}

impl PartialOrd for Number {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl PartialEq for Number {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Number {}

impl hash::Hash for Number {
	fn hash<H: hash::Hasher>(&self, state: &mut H) {
		// Numbers which compare equal across variants must hash equally
		match (self, self.as_exact_int()) {
			(_, Some(v)) => v.hash(state),
			(Number::Float(v), None) if v.is_nan() => f64::NAN.to_bits().hash(state),
			(Number::Float(v), None) => v.to_bits().hash(state),
			(Number::Int(v), None) => v.hash(state),
		}
	}
}

impl ops::Add for Number {
	type Output = Self;
	fn add(self, other: Self) -> Self {
		match (self, other) {
			(Number::Int(v), Number::Int(w)) => match v.checked_add(w) {
				Some(v) => Number::Int(v),
				None => Number::Float(v as f64 + w as f64),
			},
			(v, w) => Number::Float(v.as_float() + w.as_float()),
		}
	}
}

impl ops::AddAssign for Number {
	fn add_assign(&mut self, other: Self) {
		*self = *self + other;
	}
}
