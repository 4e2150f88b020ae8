//! # Spillsort
//!
//! Sorting and grouping of arbitrarily large inputs within a fixed memory
//! budget. Records are buffered in memory and, once the budget is exceeded,
//! written to disk as sorted runs which are merged back when the input ends.
//!
//! ```no_run
//! use spillsort::sorter::{self, Ascending, SortIterator, SortOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let opts = SortOptions::new().with_temp_dir(std::env::temp_dir());
//! let mut sorter = sorter::make::<i64, String, _>(opts, Ascending, ((), ()))?;
//! sorter.add(2, "two".to_owned())?;
//! sorter.add(1, "one".to_owned())?;
//! let mut out = sorter.done()?;
//! while out.more()? {
//! 	let (key, value) = out.next()?;
//! 	println!("{key}: {value}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod telemetry;

pub use spillsort_core::{cnf, err, grp, sorter, val};
