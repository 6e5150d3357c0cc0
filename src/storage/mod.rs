//! Relation storage: memory-mapped, column-major input files.

pub mod relation;

pub use relation::{JoinRelation, Relation, Tuple};
