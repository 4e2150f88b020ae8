use spillsort::grp::{AccumulationStatement, AccumulatorKind, Expr, GroupOptions, GroupProcessor};
use spillsort::val::{Object, Value};
use tempfile::TempDir;
use test_log::test;

fn doc(group: &str, n: i64) -> Value {
	let doc: Object = map(&[("g", Value::from(group)), ("n", Value::from(n))]);
	doc.into()
}

fn map(fields: &[(&str, Value)]) -> Object {
	fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn results(processor: &mut GroupProcessor) -> Vec<Value> {
	processor.ready_groups().unwrap();
	let mut out = Vec::new();
	while let Some(doc) = processor.get_next().unwrap() {
		out.push(doc);
	}
	out.sort();
	out
}

#[test]
fn sums_survive_a_spill_after_every_add() {
	let dir = TempDir::new().unwrap();
	let opts = GroupOptions::new().with_temp_dir(dir.path()).with_stress_spill_every_add(true);
	let sum = AccumulationStatement::new("sum", AccumulatorKind::Sum, Expr::field("n"));
	let mut processor = GroupProcessor::new(Expr::field("g"), vec![sum], opts).unwrap();
	for (g, n) in [("A", 1), ("A", 2), ("B", 3)] {
		processor.add_document(&doc(g, n)).unwrap();
	}
	assert_eq!(processor.stats().spills, 3);
	let expected: Vec<Value> = [("A", 3), ("B", 3)]
		.into_iter()
		.map(|(g, n)| map(&[("_id", Value::from(g)), ("sum", Value::from(n))]).into())
		.collect();
	assert_eq!(results(&mut processor), expected);
}

#[test]
fn every_accumulator_merges_across_spills() {
	let statements = vec![
		AccumulationStatement::new("count", AccumulatorKind::Count, Expr::Root),
		AccumulationStatement::new("min", AccumulatorKind::Min, Expr::field("n")),
		AccumulationStatement::new("max", AccumulatorKind::Max, Expr::field("n")),
		AccumulationStatement::new("avg", AccumulatorKind::Avg, Expr::field("n")),
		AccumulationStatement::new("first", AccumulatorKind::First, Expr::field("n")),
		AccumulationStatement::new("last", AccumulatorKind::Last, Expr::field("n")),
		AccumulationStatement::new("set", AccumulatorKind::AddToSet, Expr::field("n")),
		AccumulationStatement::new("merged", AccumulatorKind::MergeObjects, Expr::Root)
			.with_initializer(Expr::Literal(Value::Null)),
	];
	let input: Vec<Value> = (0..200).map(|i| doc(&format!("k{}", i % 7), i % 13)).collect();
	let run = |opts: GroupOptions| {
		let mut processor =
			GroupProcessor::new(Expr::field("g"), statements.clone(), opts).unwrap();
		for d in &input {
			processor.add_document(d).unwrap();
		}
		results(&mut processor)
	};
	let dir = TempDir::new().unwrap();
	let in_memory = run(GroupOptions::new());
	let spilled =
		run(GroupOptions::new().with_temp_dir(dir.path()).with_max_memory_usage_bytes(1500));
	assert_eq!(in_memory.len(), 7);
	assert_eq!(spilled, in_memory);
}

#[test]
fn compound_group_keys() {
	let id = Expr::Object(vec![
		("g".to_owned(), Expr::field("g")),
		("odd".to_owned(), Expr::field("odd")),
	]);
	let count = AccumulationStatement::new("count", AccumulatorKind::Count, Expr::Root);
	let mut processor = GroupProcessor::new(id, vec![count], GroupOptions::new()).unwrap();
	for n in 0..6i64 {
		let mut d = map(&[("g", Value::from("x")), ("n", Value::from(n))]);
		if n % 2 == 1 {
			d.insert("odd".to_owned(), Value::Bool(true));
		}
		processor.add_document(&d.into()).unwrap();
	}
	let out = results(&mut processor);
	assert_eq!(out.len(), 2);
	let counts: Vec<Value> = out.iter().map(|d| d.pick("count")).collect();
	assert_eq!(counts, vec![Value::from(3), Value::from(3)]);
}
