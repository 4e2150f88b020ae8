mod common;

use common::{file_count, keys, random_keys, spilling};
use spillsort::err::Error;
use spillsort::sorter::{self, Ascending, PersistedState, SortOptions};
use test_log::test;

#[test]
fn persisted_runs_resume_in_a_new_sorter() {
	let spill = spilling(256);
	let input = random_keys(9, 500, 10_000);
	let mut sorter = sorter::make::<i64, i64, _>(spill.opts.clone(), Ascending, ((), ())).unwrap();
	for k in &input {
		sorter.add(*k, -k).unwrap();
	}
	let state = sorter.persist_data_for_shutdown().unwrap();
	drop(sorter);
	// The kept file outlives the sorter
	assert_eq!(file_count(&spill.dir), 1);
	let json = serde_json::to_string(&state).unwrap();
	let state: PersistedState = serde_json::from_str(&json).unwrap();
	assert!(state.ranges.len() > 1);
	let mut resumed = sorter::make_from_existing_ranges::<i64, i64, _>(
		&state.file_name,
		&state.ranges,
		spill.opts.clone(),
		Ascending,
		((), ()),
	)
	.unwrap();
	// Sorting continues with fresh input
	resumed.add(-1, 1).unwrap();
	let mut expected = input.clone();
	expected.push(-1);
	expected.sort();
	assert_eq!(keys(resumed.done().unwrap()), expected);
}

#[test]
fn only_unlimited_sorters_resume() {
	let spill = spilling(0);
	let opts = spill.opts.clone().with_limit(5);
	let res =
		sorter::make_from_existing_ranges::<i64, i64, _>("missing", &[], opts, Ascending, ((), ()));
	assert!(res.is_err());
}

#[test]
fn resuming_from_an_empty_file_fails() {
	let spill = spilling(0);
	std::fs::write(spill.dir.path().join("empty"), b"").unwrap();
	let mut sorter = sorter::make::<i64, i64, _>(spill.opts.clone(), Ascending, ((), ())).unwrap();
	sorter.add(1, 1).unwrap();
	let state = sorter.persist_data_for_shutdown().unwrap();
	let err = sorter::make_from_existing_ranges::<i64, i64, _>(
		"empty",
		&state.ranges,
		spill.opts.clone(),
		Ascending,
		((), ()),
	)
	.err()
	.unwrap();
	assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnexpectedEmptyFile { .. })));
}

#[test]
fn sorters_without_disk_cannot_persist() {
	let mut sorter = sorter::make::<i64, i64, _>(SortOptions::new(), Ascending, ((), ())).unwrap();
	sorter.add(1, 1).unwrap();
	assert!(sorter.persist_data_for_shutdown().is_err());
}
