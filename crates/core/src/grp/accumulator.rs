use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::mem;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::expr::Expr;
use crate::err::Error;
use crate::val::{Number, Object, Value};

/// The kinds of accumulator a group statement can use.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccumulatorKind {
	Sum,
	Count,
	Min,
	Max,
	Avg,
	First,
	Last,
	Push,
	AddToSet,
	MergeObjects,
}

impl Display for AccumulatorKind {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl AccumulatorKind {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Sum => "$sum",
			Self::Count => "$count",
			Self::Min => "$min",
			Self::Max => "$max",
			Self::Avg => "$avg",
			Self::First => "$first",
			Self::Last => "$last",
			Self::Push => "$push",
			Self::AddToSet => "$addToSet",
			Self::MergeObjects => "$mergeObjects",
		}
	}
}

/// One output field of a group: `field_name: { kind: argument }`.
#[derive(Clone, Debug, PartialEq)]
pub struct AccumulationStatement {
	pub field_name: String,
	pub kind: AccumulatorKind,
	/// Evaluated against each input document to produce the accumulator input
	pub argument: Expr,
	/// Evaluated against the group key to seed each new group
	pub initializer: Option<Expr>,
}

impl AccumulationStatement {
	pub fn new(field_name: impl Into<String>, kind: AccumulatorKind, argument: Expr) -> Self {
		Self {
			field_name: field_name.into(),
			kind,
			argument,
			initializer: None,
		}
	}

	pub fn with_initializer(mut self, initializer: Expr) -> Self {
		self.initializer = Some(initializer);
		self
	}

	/// Creates an accumulator which has started the group with the given key.
	pub fn make_accumulator(&self, group_key: &Value) -> Accumulator {
		let mut acc = Accumulator::new(self.kind);
		let seed = match &self.initializer {
			Some(init) => init.evaluate(group_key),
			None => Value::None,
		};
		acc.start_new_group(&seed);
		acc
	}
}

/// The running state of one accumulator for one group.
///
/// When `merging`, inputs are partial states produced by
/// [`get_value(true)`](Accumulator::get_value) of the same accumulator kind,
/// rather than values taken from documents.
#[derive(Clone, Debug, PartialEq)]
pub enum Accumulator {
	Sum {
		sum: Number,
	},
	Count {
		count: Number,
	},
	Min {
		min: Option<Value>,
	},
	Max {
		max: Option<Value>,
	},
	Avg {
		sum: Number,
		count: Number,
	},
	First {
		first: Option<Value>,
	},
	Last {
		last: Option<Value>,
	},
	Push {
		values: Vec<Value>,
	},
	AddToSet {
		values: BTreeSet<Value>,
	},
	MergeObjects {
		object: Object,
	},
}

impl Accumulator {
	pub fn new(kind: AccumulatorKind) -> Self {
		match kind {
			AccumulatorKind::Sum => Self::Sum {
				sum: Number::default(),
			},
			AccumulatorKind::Count => Self::Count {
				count: Number::default(),
			},
			AccumulatorKind::Min => Self::Min {
				min: None,
			},
			AccumulatorKind::Max => Self::Max {
				max: None,
			},
			AccumulatorKind::Avg => Self::Avg {
				sum: Number::default(),
				count: Number::default(),
			},
			AccumulatorKind::First => Self::First {
				first: None,
			},
			AccumulatorKind::Last => Self::Last {
				last: None,
			},
			AccumulatorKind::Push => Self::Push {
				values: Vec::new(),
			},
			AccumulatorKind::AddToSet => Self::AddToSet {
				values: BTreeSet::new(),
			},
			AccumulatorKind::MergeObjects => Self::MergeObjects {
				object: Object::new(),
			},
		}
	}

	pub fn kind(&self) -> AccumulatorKind {
		match self {
			Self::Sum {
				..
			} => AccumulatorKind::Sum,
			Self::Count {
				..
			} => AccumulatorKind::Count,
			Self::Min {
				..
			} => AccumulatorKind::Min,
			Self::Max {
				..
			} => AccumulatorKind::Max,
			Self::Avg {
				..
			} => AccumulatorKind::Avg,
			Self::First {
				..
			} => AccumulatorKind::First,
			Self::Last {
				..
			} => AccumulatorKind::Last,
			Self::Push {
				..
			} => AccumulatorKind::Push,
			Self::AddToSet {
				..
			} => AccumulatorKind::AddToSet,
			Self::MergeObjects {
				..
			} => AccumulatorKind::MergeObjects,
		}
	}

	/// Whether further inputs can still change the result.
	pub fn needs_input(&self) -> bool {
		match self {
			Self::First {
				first,
			} => first.is_none(),
			_ => true,
		}
	}

	pub fn process(&mut self, input: &Value, merging: bool) -> Result<()> {
		match self {
			Self::Sum {
				sum,
			} => {
				if let Some(n) = input.as_number() {
					*sum += n;
				}
			}
			Self::Count {
				count,
			} => match merging {
				true => {
					if let Some(n) = input.as_number() {
						*count += n;
					}
				}
				false => *count += Number::Int(1),
			},
			Self::Min {
				min,
			} => {
				if !input.is_nullish() && min.as_ref().map_or(true, |m| input < m) {
					*min = Some(input.clone());
				}
			}
			Self::Max {
				max,
			} => {
				if !input.is_nullish() && max.as_ref().map_or(true, |m| input > m) {
					*max = Some(input.clone());
				}
			}
			Self::Avg {
				sum,
				count,
			} => match merging {
				true => {
					if let Some(n) = input.pick("sum").as_number() {
						*sum += n;
					}
					if let Some(n) = input.pick("count").as_number() {
						*count += n;
					}
				}
				false => {
					if let Some(n) = input.as_number() {
						*sum += n;
						*count += Number::Int(1);
					}
				}
			},
			Self::First {
				first,
			} => {
				if first.is_none() {
					// A missing field still counts as the first input
					*first = Some(match input {
						Value::None => Value::Null,
						v => v.clone(),
					});
				}
			}
			Self::Last {
				last,
			} => {
				*last = Some(match input {
					Value::None => Value::Null,
					v => v.clone(),
				});
			}
			Self::Push {
				values,
			} => match (merging, input) {
				(true, Value::Array(partial)) => values.extend(partial.iter().cloned()),
				(true, v) => bail!(Self::invalid(AccumulatorKind::Push, "array", v)),
				(false, Value::None) => {}
				(false, v) => values.push(v.clone()),
			},
			Self::AddToSet {
				values,
			} => match (merging, input) {
				(true, Value::Array(partial)) => values.extend(partial.iter().cloned()),
				(true, v) => bail!(Self::invalid(AccumulatorKind::AddToSet, "array", v)),
				(false, Value::None) => {}
				(false, v) => {
					values.insert(v.clone());
				}
			},
			Self::MergeObjects {
				object,
			} => match input {
				Value::None | Value::Null => {}
				Value::Object(o) => {
					for (k, v) in o {
						// Missing values never overwrite existing ones
						if !v.is_none() {
							object.insert(k.clone(), v.clone());
						}
					}
				}
				v => bail!(Self::invalid(AccumulatorKind::MergeObjects, "object", v)),
			},
		}
		Ok(())
	}

	fn invalid(kind: AccumulatorKind, expected: &'static str, found: &Value) -> Error {
		Error::InvalidAccumulatorInput {
			accumulator: kind.name(),
			expected,
			found: found.to_string(),
		}
	}

	/// The result of the group, or with `to_be_merged` the partial state to spill.
	pub fn get_value(&self, to_be_merged: bool) -> Value {
		match self {
			Self::Sum {
				sum,
			} => (*sum).into(),
			Self::Count {
				count,
			} => (*count).into(),
			Self::Min {
				min: v,
			}
			| Self::Max {
				max: v,
			}
			| Self::First {
				first: v,
			}
			| Self::Last {
				last: v,
			} => v.clone().unwrap_or(Value::Null),
			Self::Avg {
				sum,
				count,
			} => match to_be_merged {
				true => {
					let state: Object = map! { "sum" => *sum, "count" => *count };
					state.into()
				}
				false if count.as_int() == 0 => Value::Null,
				false => Value::from(sum.as_float() / count.as_float()),
			},
			Self::Push {
				values,
			} => Value::Array(values.clone()),
			Self::AddToSet {
				values,
			} => Value::Array(values.iter().cloned().collect()),
			Self::MergeObjects {
				object,
			} => Value::Object(object.clone()),
		}
	}

	/// Prepares the accumulator for a new group. The built-in kinds need no seed.
	pub fn start_new_group(&mut self, _seed: &Value) {}

	/// The approximate number of bytes held by this accumulator.
	pub fn mem_usage(&self) -> usize {
		let held = match self {
			Self::Min {
				min: v,
			}
			| Self::Max {
				max: v,
			}
			| Self::First {
				first: v,
			}
			| Self::Last {
				last: v,
			} => v.as_ref().map_or(0, Value::mem_usage),
			Self::Push {
				values,
			} => values.iter().map(Value::mem_usage).sum(),
			Self::AddToSet {
				values,
			} => values.iter().map(Value::mem_usage).sum(),
			Self::MergeObjects {
				object,
			} => object.iter().map(|(k, v)| k.capacity() + v.mem_usage()).sum(),
			_ => 0,
		};
		mem::size_of::<Self>() + held
	}

	/// Returns to the state of a freshly created accumulator.
	pub fn reset(&mut self) {
		*self = Self::new(self.kind());
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	fn ints(values: &[i64]) -> Value {
		Value::from(values.iter().map(|v| Value::from(*v)).collect::<Vec<_>>())
	}

	fn fold(kind: AccumulatorKind, inputs: &[Value]) -> Accumulator {
		let mut acc = Accumulator::new(kind);
		for v in inputs {
			if acc.needs_input() {
				acc.process(v, false).unwrap();
			}
		}
		acc
	}

	#[rstest]
	#[case::sum(AccumulatorKind::Sum, Value::from(7))]
	#[case::count(AccumulatorKind::Count, Value::from(4))]
	#[case::min(AccumulatorKind::Min, Value::from(1))]
	#[case::max(AccumulatorKind::Max, Value::from(4))]
	#[case::avg(AccumulatorKind::Avg, Value::from(7.0 / 3.0))]
	#[case::first(AccumulatorKind::First, Value::from(4))]
	#[case::last(AccumulatorKind::Last, Value::Null)]
	#[case::push(AccumulatorKind::Push, ints(&[4, 1, 2]))]
	#[case::add_to_set(AccumulatorKind::AddToSet, ints(&[1, 2, 4]))]
	fn folds_document_values(#[case] kind: AccumulatorKind, #[case] expected: Value) {
		let inputs = [Value::from(4), Value::from(1), Value::from(2), Value::None];
		assert_eq!(fold(kind, &inputs).get_value(false), expected);
	}

	#[rstest]
	#[case::sum(AccumulatorKind::Sum)]
	#[case::count(AccumulatorKind::Count)]
	#[case::min(AccumulatorKind::Min)]
	#[case::max(AccumulatorKind::Max)]
	#[case::avg(AccumulatorKind::Avg)]
	#[case::first(AccumulatorKind::First)]
	#[case::last(AccumulatorKind::Last)]
	#[case::push(AccumulatorKind::Push)]
	#[case::add_to_set(AccumulatorKind::AddToSet)]
	fn merging_partials_matches_a_single_pass(#[case] kind: AccumulatorKind) {
		let inputs: Vec<Value> = [5, 3, 9, 3, 1].into_iter().map(Value::from).collect();
		let whole = fold(kind, &inputs);
		let mut merged = Accumulator::new(kind);
		for part in [&inputs[..2], &inputs[2..]] {
			let partial = fold(kind, part).get_value(true);
			if merged.needs_input() {
				merged.process(&partial, true).unwrap();
			}
		}
		assert_eq!(merged.get_value(false), whole.get_value(false));
	}

	#[test]
	fn first_stops_asking_for_input() {
		let mut acc = Accumulator::new(AccumulatorKind::First);
		assert!(acc.needs_input());
		acc.process(&Value::None, false).unwrap();
		assert!(!acc.needs_input());
		assert_eq!(acc.get_value(false), Value::Null);
		acc.reset();
		assert!(acc.needs_input());
	}

	#[test]
	fn avg_of_nothing_is_null() {
		let acc = fold(AccumulatorKind::Avg, &[Value::from("a")]);
		assert_eq!(acc.get_value(false), Value::Null);
	}

	#[test]
	fn merge_objects_rejects_non_objects() {
		let first: Object = map! { "a" => 1, "b" => 1 };
		let second: Object = map! { "b" => 2 };
		let mut acc = Accumulator::new(AccumulatorKind::MergeObjects);
		acc.process(&first.into(), false).unwrap();
		acc.process(&Value::Null, false).unwrap();
		acc.process(&second.into(), false).unwrap();
		let expected: Object = map! { "a" => 1, "b" => 2 };
		assert_eq!(acc.get_value(false), Value::from(expected));
		let err = acc.process(&Value::from(3), false).unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::InvalidAccumulatorInput {
				accumulator: "$mergeObjects",
				..
			})
		));
	}

	#[test]
	fn memory_grows_with_held_values() {
		let empty = Accumulator::new(AccumulatorKind::Push);
		let full = fold(AccumulatorKind::Push, &[Value::from("some text"), Value::from(1)]);
		assert!(full.mem_usage() > empty.mem_usage());
	}
}
