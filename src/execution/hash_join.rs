//! Partitioned hash join: build a hopscotch index over the smaller side,
//! probe it with the larger side, in parallel partitions when the smaller
//! side doesn't fit in L2.
//!
//! The result is orientation-preserving: each output tuple's `key` always
//! holds a row id from `relation_r` and `payload` always holds a row id from
//! `relation_s`, regardless of which side actually ended up being the
//! "smallest" (build) side internally.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrent::{Job, JobScheduler};
use crate::config::EngineConfig;
use crate::execution::partition::{lsbits, partition};
use crate::index::HashTable;
use crate::storage::{JoinRelation, Tuple};

const NEIGHBOURHOOD_SIZE: u32 = 48;

fn gte_pow2(n: u32) -> u32 {
    let mut p = 1u32;
    while p < n.max(1) {
        p <<= 1;
    }
    p
}

pub fn hash_join(
    relation_r: &JoinRelation,
    relation_s: &JoinRelation,
    scheduler: &JobScheduler,
    config: &EngineConfig,
) -> JoinRelation {
    let r_is_smallest = relation_r.len() <= relation_s.len();
    let (smallest, largest) = if r_is_smallest {
        (relation_r, relation_s)
    } else {
        (relation_s, relation_r)
    };

    let mut num_partition_passes: u8 = 0;
    let smallest_partitioned;
    let smallest_ref: &JoinRelation =
        if smallest.len() * std::mem::size_of::<Tuple>() > config.l2_size {
            let (partitioned, passes) = partition(smallest, true, false, scheduler, config);
            num_partition_passes = passes;
            smallest_partitioned = partitioned;
            &smallest_partitioned
        } else {
            smallest
        };

    let total_nbits: u32 = (num_partition_passes != 0) as u32 * config.nbits1 as u32
        + (num_partition_passes == 2) as u32 * config.nbits2 as u32;

    let hist_smallest: Option<Vec<u32>> = if num_partition_passes != 0 {
        let mut hist = vec![0u32; 1usize << total_nbits];
        for tuple in &smallest_ref.tuples {
            hist[lsbits(tuple.payload, total_nbits, 0)] += 1;
        }
        Some(hist)
    } else {
        None
    };

    let num_htables = 1usize << total_nbits;
    let index: Vec<Option<Arc<Mutex<HashTable>>>> = (0..num_htables)
        .map(|i| {
            let exists = num_partition_passes == 0
                || hist_smallest.as_ref().map(|h| h[i] != 0).unwrap_or(false);
            exists.then(|| {
                Arc::new(Mutex::new(HashTable::new(
                    gte_pow2(smallest_ref.len() as u32),
                    NEIGHBOURHOOD_SIZE,
                )))
            })
        })
        .collect();

    let mut start = 0u32;
    let mut end = 0u32;
    for (i, slot) in index.iter().enumerate() {
        if num_partition_passes == 0 {
            end = smallest_ref.len() as u32;
        } else {
            let count = hist_smallest.as_ref().unwrap()[i];
            if count == 0 {
                start = end;
                continue;
            }
            end += count;
        }

        if let Some(table) = slot {
            let table = Arc::clone(table);
            let batch = smallest_ref.tuples[start as usize..end as usize].to_vec();
            scheduler.submit(Job::Building(Box::new(move || {
                let mut table = table.lock();
                for tuple in &batch {
                    table.insert(tuple);
                }
            })));
        }
        start = end;
    }
    scheduler.execute_all();
    scheduler.wait_all();

    let largest_partitioned;
    let largest_ref: &JoinRelation = if num_partition_passes != 0 {
        let (partitioned, _) = partition(largest, false, num_partition_passes == 2, scheduler, config);
        largest_partitioned = partitioned;
        &largest_partitioned
    } else {
        largest
    };

    let hist_largest: Option<Vec<u32>> = if num_partition_passes != 0 {
        let mut hist = vec![0u32; num_htables];
        for tuple in &largest_ref.tuples {
            hist[lsbits(tuple.payload, total_nbits, 0)] += 1;
        }
        Some(hist)
    } else {
        None
    };

    let results: Vec<Arc<Mutex<Vec<Tuple>>>> =
        (0..num_htables).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();

    let mut start = 0u32;
    let mut end = 0u32;
    for i in 0..num_htables {
        if num_partition_passes == 0 {
            end = largest_ref.len() as u32;
        } else {
            let count = hist_largest.as_ref().unwrap()[i];
            if count == 0 {
                start = end;
                continue;
            }
            end += count;
        }

        if let Some(table) = &index[i] {
            let table = Arc::clone(table);
            let result = Arc::clone(&results[i]);
            let batch = largest_ref.tuples[start as usize..end as usize].to_vec();

            scheduler.submit(Job::Probe(Box::new(move || {
                let table = table.lock();
                let mut out = result.lock();
                for tuple in &batch {
                    if let Some(matches) = table.search(tuple.payload) {
                        for matched_row in matches {
                            if r_is_smallest {
                                out.push(Tuple {
                                    key: matched_row,
                                    payload: tuple.key,
                                });
                            } else {
                                out.push(Tuple {
                                    key: tuple.key,
                                    payload: matched_row,
                                });
                            }
                        }
                    }
                }
            })));
        }
        start = end;
    }
    scheduler.execute_all();
    scheduler.wait_all();

    let mut merged = Vec::new();
    for result in results {
        merged.extend(Arc::try_unwrap(result).expect("no job outlives wait_all").into_inner());
    }

    JoinRelation::new(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(key: u32, payload: u32) -> Tuple {
        Tuple { key, payload }
    }

    #[test]
    fn orientation_preserving_equi_join() {
        let scheduler = JobScheduler::new(2);
        let config = EngineConfig {
            nbits1: 8,
            nbits2: 10,
            job_threads: 2,
            query_threads: 1,
            l2_size: usize::MAX,
        };

        let r = JoinRelation::new(vec![tuple(0, 10), tuple(1, 20), tuple(2, 10)]);
        let s = JoinRelation::new(vec![tuple(0, 10), tuple(1, 30), tuple(2, 10)]);

        let mut result = hash_join(&r, &s, &scheduler, &config)
            .tuples
            .into_iter()
            .map(|t| (t.key, t.payload))
            .collect::<Vec<_>>();
        result.sort();

        assert_eq!(result, vec![(0, 0), (0, 2), (2, 0), (2, 2)]);
    }

    #[test]
    fn no_matches_yields_empty_result() {
        let scheduler = JobScheduler::new(2);
        let config = EngineConfig {
            nbits1: 8,
            nbits2: 10,
            job_threads: 2,
            query_threads: 1,
            l2_size: usize::MAX,
        };

        let r = JoinRelation::new(vec![tuple(0, 1)]);
        let s = JoinRelation::new(vec![tuple(0, 2)]);

        let result = hash_join(&r, &s, &scheduler, &config);
        assert!(result.is_empty());
    }

    #[test]
    fn forces_partitioning_when_l2_is_tiny() {
        let scheduler = JobScheduler::new(2);
        let config = EngineConfig {
            nbits1: 2,
            nbits2: 2,
            job_threads: 2,
            query_threads: 1,
            l2_size: 1,
        };

        let r: Vec<Tuple> = (0..64u32).map(|i| tuple(i, i % 8)).collect();
        let s: Vec<Tuple> = (0..64u32).map(|i| tuple(i, i % 8)).collect();

        let result = hash_join(&JoinRelation::new(r), &JoinRelation::new(s), &scheduler, &config);
        assert_eq!(result.len(), 64 * 64 / 8);
    }
}
