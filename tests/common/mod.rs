#![allow(dead_code)]
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spillsort::sorter::{collect, BoxedIterator, SortOptions};
use tempfile::TempDir;

/// A temp directory together with sort options which spill into it.
pub struct Spill {
	pub dir: TempDir,
	pub opts: SortOptions,
}

/// Sort options which allow spilling, with the given memory budget.
pub fn spilling(max_memory_usage_bytes: usize) -> Spill {
	let dir = TempDir::new().unwrap();
	let opts = SortOptions::new()
		.with_temp_dir(dir.path())
		.with_max_memory_usage_bytes(max_memory_usage_bytes);
	Spill {
		dir,
		opts,
	}
}

/// The number of files currently in the directory.
pub fn file_count(dir: &TempDir) -> usize {
	std::fs::read_dir(dir.path()).unwrap().count()
}

/// Reproducible random keys in `0..range`.
pub fn random_keys(seed: u64, count: usize, range: i64) -> Vec<i64> {
	let mut rng = StdRng::seed_from_u64(seed);
	(0..count).map(|_| rng.gen_range(0..range)).collect()
}

/// Drains a sorted stream, keeping only the keys.
pub fn keys<K, V>(mut iter: BoxedIterator<K, V>) -> Vec<K> {
	collect(iter.as_mut()).unwrap().into_iter().map(|(k, _)| k).collect()
}
