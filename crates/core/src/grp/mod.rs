//! `$group`-style aggregation.
//!
//! Documents are bucketed by a group key and folded into a set of
//! accumulators per group. Groups live in a hash map until the memory
//! budget is exceeded, after which they are spilled to disk as sorted runs
//! of partial accumulator states, and merged back group by group once the
//! input ends.

mod accumulator;
mod expr;
mod processor;

pub use self::accumulator::{AccumulationStatement, Accumulator, AccumulatorKind};
pub use self::expr::Expr;
pub use self::processor::{GroupOptions, GroupProcessor, GroupStats};
