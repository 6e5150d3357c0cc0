//! Indexing structures used by the join engine.
//!
//! A single hopscotch hash table implementation, built fresh per partition
//! during the build phase of the partitioned hash join and discarded once its
//! probes are done.

pub mod hash_index;

pub use hash_index::{HashTable, RowIds, Tuple};
