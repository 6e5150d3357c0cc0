//! Query execution: radix partitioning, the partitioned hash join, the
//! cost-based optimizer, and the filter/join/projection executor that
//! composes them into query results.

pub mod executor;
pub mod hash_join;
pub mod optimizer;
pub mod partition;

pub use executor::{
    apply_filters, apply_joins, build_join_relation, calculate_checksums, format_checksums,
    Intermediates,
};
pub use hash_join::hash_join;
pub use optimizer::{gather_statistics, optimize_query, ColumnStats, RelationStatistics};
pub use partition::partition;
