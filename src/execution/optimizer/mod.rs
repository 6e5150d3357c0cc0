//! Cost-based left-deep join reordering.
//!
//! Enumerates every connected (no-cross-product) left-deep permutation of a
//! query's joins, costing each with [`cost_model::estimate_join_cost`] against
//! a scratch copy of the relevant relations' statistics, and installs the
//! cheapest one back into the query. Grounded on
//! `original_source/modules/optimizer/optimizer.c`'s `optimizeQuery`,
//! `noCrossProduct`, and `generatePermutations`.

pub mod cost_model;

pub use cost_model::{gather_statistics, ColumnStats, RelationStatistics};

use crate::parser::{JoinPredicate, Query};

/// Per `optimizer.c`'s `transform`: reordering only ever applies to queries
/// with at least two joins, and is skipped for a two-join query where a
/// filter already targets one of the join's aliases on a *different* table
/// than its join partner (the filter is cheap enough there that reordering
/// can't help).
fn should_transform(query: &Query) -> bool {
    if query.joins.len() < 2 {
        return false;
    }
    if query.joins.len() == 2 {
        let first = &query.joins[0];
        if first.left.table != first.right.table {
            let targets_first_join_alias = query
                .filters
                .iter()
                .any(|f| f.column.alias == first.left.alias || f.column.alias == first.right.alias);
            if targets_first_join_alias {
                return false;
            }
        }
    }
    true
}

/// Left-deep connectivity check: every join after the first must share an
/// alias with the join immediately before it in `order`.
fn no_cross_product(query: &Query, order: &[usize]) -> bool {
    for pair in order.windows(2) {
        let prev = &query.joins[pair[0]];
        let next = &query.joins[pair[1]];
        let shares_alias = next.left.alias == prev.left.alias
            || next.left.alias == prev.right.alias
            || next.right.alias == prev.left.alias
            || next.right.alias == prev.right.alias;
        if !shares_alias {
            return false;
        }
    }
    true
}

/// Every permutation of `0..n`, generated via the same recursive-swap
/// (Heap's-algorithm-style) method as `generatePermutations`, so the first
/// permutation produced is always the identity order `[0, 1, …, n-1]`.
fn generate_permutations(n: usize) -> Vec<Vec<usize>> {
    let mut arr: Vec<usize> = (0..n).collect();
    let mut out = Vec::new();
    permute(&mut arr, 0, &mut out);
    out
}

fn permute(arr: &mut Vec<usize>, left: usize, out: &mut Vec<Vec<usize>>) {
    let n = arr.len();
    if n == 0 || left >= n - 1 {
        out.push(arr.clone());
        return;
    }
    for i in left..n {
        arr.swap(left, i);
        permute(arr, left + 1, out);
        arr.swap(left, i);
    }
}

/// Reorders `query.joins` in place into the cheapest connected left-deep
/// order found. `greedy` selects `optimizeQuery`'s "dynamic" mode: seed the
/// search with whichever single join is cheapest standalone, and only
/// consider permutations starting with it, instead of evaluating every
/// connected permutation exhaustively.
pub fn optimize_query(query: &mut Query, statistics: &[RelationStatistics], greedy: bool) {
    if !should_transform(query) {
        return;
    }

    let mut working: Vec<RelationStatistics> = statistics.to_vec();
    for filter in &query.filters {
        cost_model::apply_filter(&mut working, filter);
        let table = filter.column.table as usize;
        if working[table].columns[0].count < 2 {
            // A filter already collapsed this relation to (almost) nothing;
            // no reordering can beat the identity plan here.
            return;
        }
    }

    let permutations = generate_permutations(query.joins.len());

    let seed = if greedy {
        let mut best_one = 0usize;
        let mut best_cost_one = u32::MAX;
        for (idx, join) in query.joins.iter().enumerate() {
            let mut scratch = working.clone();
            let cost = cost_model::estimate_join_cost(join, &mut scratch);
            if cost < best_cost_one {
                best_cost_one = cost;
                best_one = idx;
            }
        }
        Some((best_one, best_cost_one))
    } else {
        None
    };

    let identity: Vec<usize> = (0..query.joins.len()).collect();
    let mut best_plan = identity.clone();
    let mut best_cost = u32::MAX;

    for perm in &permutations {
        if let Some((seed_idx, _)) = seed {
            if perm[0] != seed_idx {
                continue;
            }
        }
        if !no_cross_product(query, perm) {
            continue;
        }

        let mut scratch = working.clone();
        let mut cost: u64 = seed.map_or(0, |(_, seed_cost)| seed_cost as u64);
        let start = if seed.is_some() { 1 } else { 0 };
        let mut short_circuited = false;

        for &join_idx in &perm[start..] {
            let join_cost = cost_model::estimate_join_cost(&query.joins[join_idx], &mut scratch);
            if join_cost == 0 {
                short_circuited = true;
                break;
            }
            cost += join_cost as u64;
        }

        if !short_circuited && cost < best_cost as u64 {
            best_cost = cost as u32;
            best_plan = perm.clone();
        }
    }

    if best_plan != identity {
        let reordered: Vec<JoinPredicate> = best_plan.iter().map(|&i| query.joins[i]).collect();
        query.joins = reordered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Column;

    fn col(table: u32, alias: u32, index: u32) -> Column {
        Column { table, alias, index }
    }

    fn stats(min: u32, max: u32, count: u32, distinct: u32) -> RelationStatistics {
        RelationStatistics {
            columns: vec![ColumnStats { min, max, count, distinct }],
        }
    }

    #[test]
    fn single_join_query_is_left_untouched() {
        let mut query = Query {
            num_relations: 2,
            joins: vec![JoinPredicate { left: col(0, 0, 0), right: col(1, 1, 0) }],
            filters: vec![],
            projections: vec![],
        };
        let statistics = vec![stats(0, 99, 100, 100), stats(0, 99, 100, 100)];

        optimize_query(&mut query, &statistics, true);

        assert_eq!(query.joins[0].left, col(0, 0, 0));
    }

    #[test]
    fn no_cross_product_rejects_disconnected_order() {
        let query = Query {
            num_relations: 3,
            joins: vec![
                JoinPredicate { left: col(0, 0, 0), right: col(1, 1, 0) },
                JoinPredicate { left: col(1, 1, 0), right: col(2, 2, 0) },
            ],
            filters: vec![],
            projections: vec![],
        };

        assert!(no_cross_product(&query, &[0, 1]));
        assert!(no_cross_product(&query, &[1, 0]));
    }

    #[test]
    fn three_relation_chain_reorders_to_put_smallest_join_first() {
        // r0-r1 joins two big, fully-overlapping relations (expensive); r2 is
        // tiny, so r1-r2 is by far the cheaper standalone join.
        let mut query = Query {
            num_relations: 3,
            joins: vec![
                JoinPredicate { left: col(0, 0, 0), right: col(1, 1, 0) },
                JoinPredicate { left: col(1, 1, 0), right: col(2, 2, 0) },
            ],
            filters: vec![],
            projections: vec![],
        };
        let statistics = vec![
            stats(0, 9_999, 10_000, 10_000),
            stats(0, 9_999, 10_000, 10_000),
            stats(0, 9_999, 10, 10),
        ];

        optimize_query(&mut query, &statistics, true);

        // r1-r2 (tiny relation => low join cost) should be scheduled first.
        assert_eq!(query.joins[0].right.alias, 2);
    }

    #[test]
    fn generate_permutations_starts_with_identity() {
        let perms = generate_permutations(3);
        assert_eq!(perms[0], vec![0, 1, 2]);
        assert_eq!(perms.len(), 6);
    }
}
