//! Per-column statistics and the filter/join cost formulas that drive join
//! reordering. Grounded on
//! `original_source/modules/optimizer/optimizer.c`'s `gatherStatistics`,
//! `estimateJoinCost`, and the filter-selectivity arithmetic inlined in
//! `optimizeQuery`; naming follows the teacher's `ColumnStatistics`/
//! `TableStatistics` convention, scaled down to the four numbers this engine
//! actually tracks.

use crate::parser::{FilterPredicate, JoinPredicate, Operator};
use crate::storage::Relation;

/// A column's `{min, max, count, distinct}` summary (contest-exact, so `u32`
/// throughout rather than the wider types a general-purpose optimizer would
/// use).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnStats {
    pub min: u32,
    pub max: u32,
    pub count: u32,
    pub distinct: u32,
}

/// A relation's per-column statistics, one [`ColumnStats`] per column.
#[derive(Debug, Clone)]
pub struct RelationStatistics {
    pub columns: Vec<ColumnStats>,
}

/// Distinct-count sampling cap: beyond this many rows, only the first
/// `MAX_DISTINCT_SAMPLE` values are sorted and counted rather than the whole
/// column, trading estimate precision for a bounded `O(n log n)` cost on huge
/// relations. Mirrors `optimizer.c`'s `MAX_COUNT`.
const MAX_DISTINCT_SAMPLE: usize = 5_000_000;

/// Scans every column of `relation` once for `{min, max, count}`, then sorts a
/// (possibly capped) copy of each column to count distinct values.
pub fn gather_statistics(relation: &Relation) -> RelationStatistics {
    let num_tuples = relation.num_tuples();
    let mut columns = Vec::with_capacity(relation.num_columns() as usize);

    for col in 0..relation.num_columns() {
        let mut min = u32::MAX;
        let mut max = 0u32;
        for value in relation.column_iter(col) {
            let value = value as u32;
            min = min.min(value);
            max = max.max(value);
        }

        let sample_len = (num_tuples as usize).min(MAX_DISTINCT_SAMPLE);
        let mut sample: Vec<u32> = relation.column_iter(col).take(sample_len).map(|v| v as u32).collect();
        sample.sort_unstable();
        let distinct = if sample.is_empty() {
            0
        } else {
            1 + sample.windows(2).filter(|pair| pair[0] != pair[1]).count() as u32
        };

        columns.push(ColumnStats {
            min,
            max,
            count: num_tuples as u32,
            distinct,
        });
    }

    RelationStatistics { columns }
}

/// Narrows `stats[filter.column.table]` by `filter`, propagating the new
/// `count` and a scaled `distinct` to every other column of that relation.
/// Mirrors `optimizer.c`'s inline filter handling in `optimizeQuery`.
pub fn apply_filter(stats: &mut [RelationStatistics], filter: &FilterPredicate) {
    let table = filter.column.table as usize;
    let col_idx = filter.column.index as usize;

    let old = stats[table].columns[col_idx];
    if old.count == 0 {
        return;
    }

    let new_count;
    let new_distinct;
    let new_min;
    let new_max;

    match filter.operator {
        Operator::Lt => {
            if old.min < filter.value {
                let span = (old.max - old.min).max(1) as f64;
                let frac = ((filter.value - old.min) as f64 / span).min(1.0);
                new_count = (frac * old.count as f64) as u32;
                new_distinct = (frac * old.distinct as f64) as u32;
            } else {
                new_count = 0;
                new_distinct = 0;
            }
            new_min = old.min;
            new_max = filter.value;
        }
        Operator::Gt => {
            if old.max > filter.value {
                let span = (old.max - old.min).max(1) as f64;
                let frac = ((old.max - filter.value) as f64 / span).min(1.0);
                new_count = (frac * old.count as f64) as u32;
                new_distinct = (frac * old.distinct as f64) as u32;
            } else {
                new_count = 0;
                new_distinct = 0;
            }
            new_min = filter.value;
            new_max = old.max;
        }
        Operator::Eq => {
            if old.min <= filter.value && filter.value <= old.max {
                new_count = old.count / old.distinct.max(1);
                new_distinct = 1;
            } else {
                new_count = 0;
                new_distinct = 0;
            }
            new_min = filter.value;
            new_max = filter.value;
        }
    }

    stats[table].columns[col_idx] = ColumnStats {
        min: new_min,
        max: new_max,
        count: new_count,
        distinct: new_distinct,
    };

    propagate_count_and_distinct(&mut stats[table], col_idx, old.count, new_count);
}

/// Scales every other column's `distinct` by the fraction of rows the last
/// operation removed, then sets its `count` to match. Shared by `apply_filter`
/// and the same-relation branch of `estimate_join_cost`.
fn propagate_count_and_distinct(relation: &mut RelationStatistics, changed_col: usize, old_count: u32, new_count: u32) {
    let frac = new_count as f64 / old_count.max(1) as f64;

    for (j, col) in relation.columns.iter_mut().enumerate() {
        if j == changed_col {
            continue;
        }
        let exponent = old_count as f64 / col.distinct.max(1) as f64;
        let scaled = 1.0 - (1.0 - frac).powf(exponent);
        col.distinct = (col.distinct as f64 * scaled) as u32;
        col.count = new_count;
    }
}

/// Estimates the cardinality of applying `join`, mutating `stats` in place to
/// reflect the new relation size(s) and updated distinct counts. Mirrors
/// `optimizer.c`'s `estimateJoinCost` exactly, including its three cases:
/// self-join on the same column, same-alias-different-column (treated as a
/// filter), and a genuine cross-relation join.
pub fn estimate_join_cost(join: &JoinPredicate, stats: &mut [RelationStatistics]) -> u32 {
    let left_table = join.left.table as usize;
    let left_col = join.left.index as usize;
    let right_table = join.right.table as usize;
    let right_col = join.right.index as usize;

    if join.left.alias == join.right.alias {
        let old = stats[left_table].columns[left_col];
        let n = (old.max - old.min + 1).max(1) as f64;

        if left_col == right_col {
            let new_count = (((old.count as u64) * (old.count as u64)) as f64 / n) as u32;
            for col in &mut stats[left_table].columns {
                col.count = new_count;
            }
            return new_count;
        }

        let other = stats[left_table].columns[right_col];
        let new_max = old.max.min(other.max);
        let new_min = old.min.max(other.min);
        let new_count = old.count / (n as u32).max(1);

        let distinct_frac = 1.0 - (1.0 - new_count as f64 / old.count.max(1) as f64)
            .powf(old.count as f64 / old.distinct.max(1) as f64);
        let new_distinct = (old.distinct as f64 * distinct_frac) as u32;

        stats[left_table].columns[left_col] = ColumnStats {
            min: new_min,
            max: new_max,
            count: new_count,
            distinct: new_distinct,
        };
        stats[left_table].columns[right_col] = ColumnStats {
            min: new_min,
            max: new_max,
            count: new_count,
            distinct: new_distinct,
        };

        for (j, col) in stats[left_table].columns.iter_mut().enumerate() {
            if j == left_col || j == right_col {
                continue;
            }
            let exponent = col.count as f64 / col.distinct.max(1) as f64;
            let scaled = 1.0 - (1.0 - new_count as f64 / old.count.max(1) as f64).powf(exponent);
            col.distinct = (col.distinct as f64 * scaled) as u32;
            col.count = new_count;
        }

        return new_count;
    }

    // Cross-relation join.
    let left = stats[left_table].columns[left_col];
    let right = stats[right_table].columns[right_col];

    let new_max = left.max.min(right.max);
    let new_min = left.min.max(right.min);
    let n = (new_max - new_min + 1).max(1) as f64;
    let new_count = (((left.count as u64) * (right.count as u64)) as f64 / n) as u32;
    let new_distinct = left.distinct.saturating_mul(right.distinct);

    let frac_left = new_distinct as f64 / left.distinct.max(1) as f64;
    let frac_right = new_distinct as f64 / right.distinct.max(1) as f64;

    for (j, col) in stats[left_table].columns.iter_mut().enumerate() {
        if j == left_col {
            col.min = new_min;
            col.max = new_max;
            col.distinct = new_distinct;
        } else {
            let exponent = col.count as f64 / col.distinct.max(1) as f64;
            let scaled = 1.0 - (1.0 - frac_left).powf(exponent);
            col.distinct = (col.distinct as f64 * scaled) as u32;
        }
        col.count = new_count;
    }

    for (j, col) in stats[right_table].columns.iter_mut().enumerate() {
        if j == right_col {
            col.min = new_min;
            col.max = new_max;
            col.distinct = new_distinct;
        } else {
            let exponent = col.count as f64 / col.distinct.max(1) as f64;
            let scaled = 1.0 - (1.0 - frac_right).powf(exponent);
            col.distinct = (col.distinct as f64 * scaled) as u32;
        }
        col.count = new_count;
    }

    new_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Column;

    fn stats(cols: &[(u32, u32, u32, u32)]) -> RelationStatistics {
        RelationStatistics {
            columns: cols
                .iter()
                .map(|&(min, max, count, distinct)| ColumnStats { min, max, count, distinct })
                .collect(),
        }
    }

    #[test]
    fn equality_filter_narrows_to_a_single_distinct_value() {
        let mut all = vec![stats(&[(0, 99, 100, 100)])];
        let filter = FilterPredicate {
            column: Column { table: 0, alias: 0, index: 0 },
            value: 42,
            operator: Operator::Eq,
        };

        apply_filter(&mut all, &filter);

        let col = all[0].columns[0];
        assert_eq!(col.distinct, 1);
        assert_eq!(col.count, 1);
    }

    #[test]
    fn out_of_range_equality_filter_yields_zero_rows() {
        let mut all = vec![stats(&[(0, 9, 10, 10)])];
        let filter = FilterPredicate {
            column: Column { table: 0, alias: 0, index: 0 },
            value: 500,
            operator: Operator::Eq,
        };

        apply_filter(&mut all, &filter);

        assert_eq!(all[0].columns[0].count, 0);
    }

    #[test]
    fn cross_relation_join_scales_both_sides_by_the_same_distinct_product() {
        let mut all = vec![
            stats(&[(0, 99, 100, 100)]),
            stats(&[(0, 99, 200, 50)]),
        ];
        let join = JoinPredicate {
            left: Column { table: 0, alias: 0, index: 0 },
            right: Column { table: 1, alias: 1, index: 0 },
        };

        let new_count = estimate_join_cost(&join, &mut all);

        assert_eq!(all[0].columns[0].distinct, all[1].columns[0].distinct);
        assert_eq!(all[0].columns[0].count, new_count);
        assert_eq!(all[1].columns[0].count, new_count);
    }

    #[test]
    fn self_join_same_column_only_changes_count() {
        let mut all = vec![stats(&[(0, 9, 100, 10), (0, 99, 100, 100)])];
        let join = JoinPredicate {
            left: Column { table: 0, alias: 0, index: 0 },
            right: Column { table: 0, alias: 0, index: 0 },
        };

        estimate_join_cost(&join, &mut all);

        assert_eq!(all[0].columns[0].distinct, 10);
        assert_eq!(all[0].columns[1].count, all[0].columns[0].count);
    }
}
