//! # Spillsort Core
//!
//! This crate is the engine behind spillsort. It sorts and groups arbitrarily
//! large inputs within a memory budget by spilling sorted runs to disk, in
//! checksummed and optionally compressed chunks, and merging them back.
//!
//! The main entry points are [`sorter::make`] for generic sorting,
//! [`sorter::BoundedSorter`] for streaming over nearly-sorted input,
//! [`sorter::ColumnStoreSorter`] for column cell builds and
//! [`grp::GroupProcessor`] for grouping with accumulators.

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod cnf;
pub mod err;
pub mod grp;
pub mod sorter;
pub mod val;
