//! Pattern Memory (spec §4.2): online statistical learning over feature
//! vectors, partitioned by operating mode.

pub mod store;

pub use store::{EvaluatedDirection, EvaluationResult, PatternMemory, PatternResult, PatternStat, Partition};
