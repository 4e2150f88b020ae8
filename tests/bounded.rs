mod common;

use common::spilling;
use spillsort::sorter::{Ascending, BoundedSorter, BoundedState, SortOptions};
use test_log::test;

/// Keys arrive at most `slack` out of order.
fn jittered(count: i64, slack: i64) -> Vec<i64> {
	(0..count).map(|i| i + (i * 7919) % slack).collect()
}

#[test]
fn streams_nearly_sorted_input() {
	for budget in [usize::MAX, 128] {
		let spill = spilling(budget);
		let mut sorter =
			BoundedSorter::new(
				spill.opts.clone(),
				Ascending,
				|k: &i64, _: &i64| k - 16,
				true,
				((), ()),
			)
				.unwrap();
		let input = jittered(2000, 16);
		let mut out = Vec::new();
		for k in &input {
			sorter.add(*k, 0).unwrap();
			while sorter.state().unwrap() == BoundedState::Ready {
				out.push(sorter.next().unwrap().0);
			}
		}
		sorter.done();
		while sorter.state().unwrap() == BoundedState::Ready {
			out.push(sorter.next().unwrap().0);
		}
		let mut expected = input.clone();
		expected.sort();
		assert_eq!(out, expected, "budget {budget}");
		assert_eq!(sorter.state().unwrap(), BoundedState::Done);
	}
}

#[test]
fn output_starts_before_input_ends() {
	let mut sorter =
		BoundedSorter::new(SortOptions::new(), Ascending, |k: &i64, _: &()| *k, false, ((), ()))
			.unwrap();
	sorter.add(1, ()).unwrap();
	sorter.add(2, ()).unwrap();
	assert_eq!(sorter.state().unwrap(), BoundedState::Ready);
	assert_eq!(sorter.next().unwrap().0, 1);
	assert_eq!(sorter.state().unwrap(), BoundedState::Wait);
}

#[test]
fn limit_finishes_early() {
	let opts = SortOptions::new().with_limit(3);
	let mut sorter =
		BoundedSorter::new(opts, Ascending, |k: &i64, _: &()| *k, true, ((), ())).unwrap();
	let mut out = Vec::new();
	for k in 0..10 {
		if sorter.state().unwrap() == BoundedState::Done {
			break;
		}
		sorter.add(k, ()).unwrap();
		while sorter.state().unwrap() == BoundedState::Ready {
			out.push(sorter.next().unwrap().0);
		}
	}
	assert_eq!(out, vec![0, 1, 2]);
	assert_eq!(sorter.stats().num_sorted, 3);
}
