use std::collections::hash_map::{Entry, IntoIter};
use std::collections::HashMap;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use ahash::RandomState;
use anyhow::Result;

use super::accumulator::{AccumulationStatement, Accumulator};
use super::expr::Expr;
use crate::cnf::{GROUP_MAX_MEMORY_USAGE_BYTES, TEMP_DIR};
use crate::sorter::{
	Ascending, MergeIterator, SortIterator, SortOptions, SorterFileStats, SorterStats, Spills,
};
use crate::val::{Object, Value};

const TARGET: &str = "spillsort::core::grp::processor";

/// The in-memory groups, keyed by group key.
type GroupsMap = HashMap<Value, Vec<Accumulator>, RandomState>;

/// Options controlling a single grouping operation.
#[derive(Clone, Debug)]
pub struct GroupOptions {
	/// The number of bytes of group state held before spilling
	pub max_memory_usage_bytes: usize,
	/// Whether groups may be spilled to disk at all
	pub allow_disk_use: bool,
	pub temp_dir: Option<PathBuf>,
	/// Spill after every document, to exercise the merge path in tests
	pub stress_spill_every_add: bool,
	pub file_stats: Option<Arc<SorterFileStats>>,
}

impl Default for GroupOptions {
	fn default() -> Self {
		Self {
			max_memory_usage_bytes: *GROUP_MAX_MEMORY_USAGE_BYTES,
			allow_disk_use: false,
			temp_dir: TEMP_DIR.clone(),
			stress_spill_every_add: false,
			file_stats: None,
		}
	}
}

impl GroupOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_memory_usage_bytes(mut self, bytes: usize) -> Self {
		self.max_memory_usage_bytes = bytes;
		self
	}

	/// Allows spilling into the given directory
	pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.temp_dir = Some(dir.into());
		self.allow_disk_use = true;
		self
	}

	pub fn with_stress_spill_every_add(mut self, stress: bool) -> Self {
		self.stress_spill_every_add = stress;
		self
	}

	pub fn with_file_stats(mut self, stats: Arc<SorterFileStats>) -> Self {
		self.file_stats = Some(stats);
		self
	}

	fn sort_options(&self) -> SortOptions {
		let mut opts = SortOptions::new()
			.with_max_memory_usage_bytes(self.max_memory_usage_bytes)
			.with_ext_sort_allowed(self.allow_disk_use);
		opts.temp_dir = self.temp_dir.clone();
		opts.file_stats = self.file_stats.clone();
		opts
	}
}

/// Counters describing the work done by a group processor.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GroupStats {
	/// The number of times the groups were spilled
	pub spills: u64,
	/// The number of partial groups written to disk
	pub spilled_records: u64,
	/// The number of bytes of group state currently held
	pub mem_usage: usize,
	/// The highest number of bytes of group state held at once
	pub max_mem_usage: usize,
}

/// Where finished groups are read from.
enum Output {
	Memory(IntoIter<Value, Vec<Accumulator>>),
	Spilled {
		merged: MergeIterator<Value, Value, Ascending>,
		/// The first partial state of the next group, already read from the merge
		next: Option<(Value, Value)>,
	},
}

/// Groups documents and folds them into accumulators, spilling to disk
/// when the group state outgrows its memory budget.
pub struct GroupProcessor {
	id: Expr,
	statements: Vec<AccumulationStatement>,
	opts: GroupOptions,
	groups: GroupsMap,
	spills: Spills<Value, Value>,
	sorter_stats: SorterStats,
	stats: GroupStats,
	output: Option<Output>,
}

impl GroupProcessor {
	pub fn new(
		id: Expr,
		statements: Vec<AccumulationStatement>,
		opts: GroupOptions,
	) -> Result<Self> {
		Ok(Self {
			spills: Spills::new(&opts.sort_options(), ((), ()))?,
			id,
			statements,
			opts,
			groups: GroupsMap::default(),
			sorter_stats: SorterStats::default(),
			stats: GroupStats::default(),
			output: None,
		})
	}

	pub fn stats(&self) -> &GroupStats {
		&self.stats
	}

	/// Evaluates the group key of a document. A missing key groups as null.
	pub fn compute_group_key(&self, doc: &Value) -> Value {
		match self.id.evaluate(doc) {
			Value::None => Value::Null,
			v => v,
		}
	}

	/// Adds a document to the group its key selects.
	pub fn add_document(&mut self, doc: &Value) -> Result<()> {
		let key = self.compute_group_key(doc);
		self.add(key, doc)
	}

	/// Adds a document to the group with the given key.
	pub fn add(&mut self, group_key: Value, doc: &Value) -> Result<()> {
		if self.output.is_some() {
			fail!("Cannot add to a group processor whose groups are already ready");
		}
		let mut usage = self.stats.mem_usage;
		let accs = match self.groups.entry(group_key) {
			Entry::Occupied(e) => e.into_mut(),
			Entry::Vacant(e) => {
				let accs: Vec<Accumulator> =
					self.statements.iter().map(|s| s.make_accumulator(e.key())).collect();
				usage +=
					e.key().mem_usage() + accs.iter().map(Accumulator::mem_usage).sum::<usize>();
				e.insert(accs)
			}
		};
		for (acc, stmt) in accs.iter_mut().zip(&self.statements) {
			if !acc.needs_input() {
				continue;
			}
			let before = acc.mem_usage();
			acc.process(&stmt.argument.evaluate(doc), false)?;
			usage = (usage + acc.mem_usage()).saturating_sub(before);
		}
		self.set_mem_usage(usage);
		if self.stats.mem_usage > self.opts.max_memory_usage_bytes
			|| (self.opts.stress_spill_every_add && self.opts.allow_disk_use)
		{
			self.spill()?;
		}
		Ok(())
	}

	fn set_mem_usage(&mut self, usage: usize) {
		self.stats.mem_usage = usage;
		self.stats.max_mem_usage = self.stats.max_mem_usage.max(usage);
	}

	/// Writes every in-memory group to disk as one sorted run of partial states.
	pub fn spill(&mut self) -> Result<()> {
		if self.groups.is_empty() {
			return Ok(());
		}
		let mut groups: Vec<(Value, Vec<Accumulator>)> = self.groups.drain().collect();
		groups.sort_unstable_by(|a, b| a.0.cmp(&b.0));
		let count = groups.len();
		debug!(target: TARGET, groups = count, "Spilling group state");
		let records = groups.into_iter().map(|(key, accs)| (key, encode_partials(&accs)));
		self.spills.spill(records, &mut self.sorter_stats)?;
		self.stats.spills += 1;
		self.stats.spilled_records += count as u64;
		self.set_mem_usage(0);
		Ok(())
	}

	/// Ends the input and prepares the groups for [`get_next`](GroupProcessor::get_next).
	pub fn ready_groups(&mut self) -> Result<()> {
		if self.output.is_some() {
			fail!("The groups of a group processor can only be readied once");
		}
		if self.spills.is_empty() {
			let groups = mem::take(&mut self.groups);
			self.output = Some(Output::Memory(groups.into_iter()));
			return Ok(());
		}
		self.spill()?;
		self.spills.merge_to_respect_memory_limits(&Ascending)?;
		let mut merged = self.spills.merged(Ascending)?;
		let next = match merged.more()? {
			true => Some(merged.next()?),
			false => None,
		};
		self.output = Some(Output::Spilled {
			merged,
			next,
		});
		Ok(())
	}

	/// Returns the next finished group as a document, or `None` once all were returned.
	pub fn get_next(&mut self) -> Result<Option<Value>> {
		let Some(output) = self.output.as_mut() else {
			fail!("The groups of a group processor must be readied before they are read");
		};
		let (key, accs) = match output {
			Output::Memory(groups) => match groups.next() {
				Some(group) => group,
				None => return Ok(None),
			},
			Output::Spilled {
				merged,
				next,
			} => {
				let Some((key, partial)) = next.take() else {
					return Ok(None);
				};
				let mut accs: Vec<Accumulator> =
					self.statements.iter().map(|s| s.make_accumulator(&key)).collect();
				merge_partials(&mut accs, &partial)?;
				// Consume every partial state with the same key
				while merged.more()? {
					let (k, partial) = merged.next()?;
					if k != key {
						*next = Some((k, partial));
						break;
					}
					merge_partials(&mut accs, &partial)?;
				}
				(key, accs)
			}
		};
		Ok(Some(self.make_document(key, &accs)))
	}

	fn make_document(&self, key: Value, accs: &[Accumulator]) -> Value {
		let mut doc = Object::new();
		doc.insert("_id".to_owned(), key);
		for (acc, stmt) in accs.iter().zip(&self.statements) {
			doc.insert(stmt.field_name.clone(), acc.get_value(false));
		}
		doc.into()
	}

	/// Drops all groups and spilled data so the processor can be reused.
	pub fn reset(&mut self) -> Result<()> {
		self.output = None;
		self.groups.clear();
		self.spills = Spills::new(&self.opts.sort_options(), ((), ()))?;
		self.stats.mem_usage = 0;
		Ok(())
	}
}

/// Encodes the partial states of a group, without wrapping a lone accumulator.
fn encode_partials(accs: &[Accumulator]) -> Value {
	match accs {
		[] => Value::Null,
		[acc] => acc.get_value(true),
		accs => Value::Array(accs.iter().map(|acc| acc.get_value(true)).collect()),
	}
}

fn merge_partials(accs: &mut [Accumulator], partial: &Value) -> Result<()> {
	match accs {
		[] => {}
		[acc] => {
			if acc.needs_input() {
				acc.process(partial, true)?;
			}
		}
		accs => {
			let Value::Array(partials) = partial else {
				fail!("Spilled group state is not an array but {partial}");
			};
			if partials.len() != accs.len() {
				fail!(
					"Spilled group state holds {} accumulators, expected {}",
					partials.len(),
					accs.len()
				);
			}
			for (acc, partial) in accs.iter_mut().zip(partials) {
				if acc.needs_input() {
					acc.process(partial, true)?;
				}
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use rand::rngs::StdRng;
	use rand::seq::SliceRandom;
	use rand::SeedableRng;
	use rstest::rstest;
	use tempfile::TempDir;

	use super::*;
	use crate::err::Error;
	use crate::grp::AccumulatorKind;

	fn doc(group: &str, n: i64) -> Value {
		let doc: Object = map! { "g" => group, "n" => n };
		doc.into()
	}

	fn drain(processor: &mut GroupProcessor) -> Vec<Value> {
		processor.ready_groups().unwrap();
		let mut out = Vec::new();
		while let Some(v) = processor.get_next().unwrap() {
			out.push(v);
		}
		out.sort();
		out
	}

	fn statements() -> Vec<AccumulationStatement> {
		vec![
			AccumulationStatement::new("total", AccumulatorKind::Sum, Expr::field("n")),
			AccumulationStatement::new("first", AccumulatorKind::First, Expr::field("n")),
			AccumulationStatement::new("all", AccumulatorKind::Push, Expr::field("n")),
		]
	}

	#[rstest]
	#[case::in_memory(false)]
	#[case::spilled(true)]
	fn sums_each_group(#[case] spill: bool) {
		let dir = TempDir::new().unwrap();
		let opts = GroupOptions::new().with_temp_dir(dir.path()).with_stress_spill_every_add(spill);
		let stmt = AccumulationStatement::new("total", AccumulatorKind::Sum, Expr::field("n"));
		let mut processor = GroupProcessor::new(Expr::field("g"), vec![stmt], opts).unwrap();
		for (g, n) in [("A", 1), ("B", 3), ("A", 2)] {
			processor.add_document(&doc(g, n)).unwrap();
		}
		assert_eq!(processor.stats().spills, if spill { 3 } else { 0 });
		let a: Object = map! { "_id" => "A", "total" => 3 };
		let b: Object = map! { "_id" => "B", "total" => 3 };
		assert_eq!(drain(&mut processor), vec![Value::from(a), Value::from(b)]);
	}

	#[test_log::test]
	fn spilling_matches_the_in_memory_result() {
		let mut input: Vec<(String, i64)> =
			(0..300).map(|i| (format!("g{}", i % 17), i)).collect();
		input.shuffle(&mut StdRng::seed_from_u64(5));
		let run = |opts: GroupOptions| {
			let mut processor = GroupProcessor::new(Expr::field("g"), statements(), opts).unwrap();
			for (g, n) in &input {
				processor.add_document(&doc(g, *n)).unwrap();
			}
			let spills = processor.stats().spills;
			(drain(&mut processor), spills)
		};
		let dir = TempDir::new().unwrap();
		let (in_memory, none) = run(GroupOptions::new());
		let (spilled, some) =
			run(GroupOptions::new().with_temp_dir(dir.path()).with_max_memory_usage_bytes(2048));
		assert_eq!(none, 0);
		assert!(some > 1);
		assert_eq!(in_memory.len(), 17);
		assert_eq!(spilled, in_memory);
	}

	#[rstest]
	#[case::in_memory(false)]
	#[case::spilled(true)]
	fn nearby_large_numbers_form_separate_groups(#[case] spill: bool) {
		let dir = TempDir::new().unwrap();
		let opts = GroupOptions::new().with_temp_dir(dir.path()).with_stress_spill_every_add(spill);
		let stmt = AccumulationStatement::new("c", AccumulatorKind::Count, Expr::Root);
		let mut processor = GroupProcessor::new(Expr::field("g"), vec![stmt], opts).unwrap();
		let int = Value::from(9_007_199_254_740_993i64);
		let float = Value::from(9_007_199_254_740_992.0f64);
		for key in [int.clone(), float.clone()] {
			let doc: Object = map! { "g" => key.clone() };
			processor.add(key, &Value::from(doc)).unwrap();
		}
		let a: Object = map! { "_id" => float, "c" => 1 };
		let b: Object = map! { "_id" => int, "c" => 1 };
		assert_eq!(drain(&mut processor), vec![Value::from(a), Value::from(b)]);
	}

	#[test_log::test]
	fn missing_group_keys_group_as_null() {
		let stmt = AccumulationStatement::new("count", AccumulatorKind::Count, Expr::Root);
		let mut processor =
			GroupProcessor::new(Expr::field("missing"), vec![stmt], GroupOptions::new()).unwrap();
		processor.add_document(&doc("A", 1)).unwrap();
		processor.add_document(&doc("B", 2)).unwrap();
		let expected: Object = map! { "_id" => Value::Null, "count" => 2 };
		assert_eq!(drain(&mut processor), vec![Value::from(expected)]);
	}

	#[test_log::test]
	fn no_accumulators_yields_distinct_keys() {
		let dir = TempDir::new().unwrap();
		let opts = GroupOptions::new().with_temp_dir(dir.path()).with_stress_spill_every_add(true);
		let mut processor = GroupProcessor::new(Expr::field("g"), vec![], opts).unwrap();
		for g in ["x", "y", "x"] {
			processor.add_document(&doc(g, 0)).unwrap();
		}
		let x: Object = map! { "_id" => "x" };
		let y: Object = map! { "_id" => "y" };
		assert_eq!(drain(&mut processor), vec![Value::from(x), Value::from(y)]);
	}

	#[test_log::test]
	fn exceeding_memory_without_disk_fails() {
		let opts = GroupOptions::new().with_max_memory_usage_bytes(16);
		let mut processor = GroupProcessor::new(Expr::field("g"), statements(), opts).unwrap();
		let err = processor.add_document(&doc("A", 1)).unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::QueryExceededMemoryLimitNoDiskUseAllowed { limit: 16 })
		));
	}

	#[test_log::test]
	fn reset_allows_reuse() {
		let dir = TempDir::new().unwrap();
		let opts = GroupOptions::new().with_temp_dir(dir.path()).with_stress_spill_every_add(true);
		let stmt = AccumulationStatement::new("total", AccumulatorKind::Sum, Expr::field("n"));
		let mut processor = GroupProcessor::new(Expr::field("g"), vec![stmt], opts).unwrap();
		processor.add_document(&doc("A", 1)).unwrap();
		processor.ready_groups().unwrap();
		assert!(processor.add_document(&doc("A", 1)).is_err());
		processor.reset().unwrap();
		processor.add_document(&doc("A", 5)).unwrap();
		let a: Object = map! { "_id" => "A", "total" => 5 };
		assert_eq!(drain(&mut processor), vec![Value::from(a)]);
		drop(processor);
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
	}
}
