//! Radix partitioning of a join input by the low bits of its payload.
//!
//! The smaller join side is partitioned only if it doesn't fit in the L2
//! cache; the larger side then always uses the same number of passes so the
//! two sides' partitions line up. A second pass only ever happens on top of a
//! first, extracting the next `nbits2` bits after right-shifting away the
//! first pass's `nbits1`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrent::{Job, JobScheduler};
use crate::config::EngineConfig;
use crate::storage::{JoinRelation, Tuple};

/// Extracts the `nbits` least-significant bits of `value`, after right
/// shifting by `shamt`.
pub(crate) fn lsbits(value: u32, nbits: u32, shamt: u32) -> usize {
    if nbits == 0 {
        return 0;
    }
    (((value >> shamt) as u64) & ((1u64 << nbits) - 1)) as usize
}

/// Partitions `relation`'s tuples by the low bits of their payload.
///
/// `is_smallest` selects the "does it fit in L2" decision; when partitioning
/// the larger side, `two_passes` instead carries over the smaller side's
/// pass count so both sides stay aligned. Returns the partitioned tuples and
/// the number of passes performed (0, 1, or 2).
pub fn partition(
    relation: &JoinRelation,
    is_smallest: bool,
    two_passes: bool,
    scheduler: &JobScheduler,
    config: &EngineConfig,
) -> (JoinRelation, u8) {
    let num_tuples = relation.tuples.len() as u32;
    let mut partitioned = vec![Tuple::default(); num_tuples as usize];

    let passes = partition_range(
        Arc::new(relation.tuples.clone()),
        &mut partitioned,
        0,
        num_tuples,
        false,
        is_smallest,
        two_passes,
        scheduler,
        config,
    );

    (JoinRelation::new(partitioned), passes)
}

#[allow(clippy::too_many_arguments)]
fn partition_range(
    src: Arc<Vec<Tuple>>,
    partitioned: &mut [Tuple],
    start: u32,
    end: u32,
    called_recursively: bool,
    is_smallest: bool,
    two_passes: bool,
    scheduler: &JobScheduler,
    config: &EngineConfig,
) -> u8 {
    let nbits = (if called_recursively { config.nbits2 } else { config.nbits1 }) as u32;
    let shamt = (if called_recursively { config.nbits1 } else { 0 }) as u32;
    let num_tuples = end - start;
    let hash_value_count = 1usize << nbits;

    let hist = build_histogram(&src, num_tuples, nbits, shamt, hash_value_count, scheduler, config);

    let max_tuples_in_partition = *hist.iter().max().unwrap_or(&0);
    let should_partition = if is_smallest {
        (max_tuples_in_partition as usize) * std::mem::size_of::<Tuple>() > config.l2_size
    } else {
        two_passes
    };

    // In-place prefix sum.
    let mut psum = hist;
    let mut counter = 0u32;
    for slot in psum.iter_mut() {
        let count = *slot;
        *slot = counter;
        counter += count;
    }

    let psum_copy = if should_partition { Some(psum.clone()) } else { None };

    for i in 0..num_tuples {
        let tuple = src[i as usize];
        let hv = lsbits(tuple.payload, nbits, shamt);
        let pos = start + psum[hv];
        partitioned[pos as usize] = tuple;
        psum[hv] += 1;
    }

    if let Some(psum_copy) = &psum_copy {
        if !called_recursively {
            for i in 0..hash_value_count {
                let partition_end = if i + 1 == hash_value_count {
                    end
                } else {
                    start + psum_copy[i + 1]
                };
                let partition_start = start + psum_copy[i];

                if partition_start == partition_end {
                    continue;
                }

                let sub = partitioned[partition_start as usize..partition_end as usize].to_vec();
                partition_range(
                    Arc::new(sub),
                    partitioned,
                    partition_start,
                    partition_end,
                    true,
                    is_smallest,
                    two_passes,
                    scheduler,
                    config,
                );
            }
        }
    }

    should_partition as u8 + 1
}

#[allow(clippy::too_many_arguments)]
fn build_histogram(
    src: &Arc<Vec<Tuple>>,
    num_tuples: u32,
    nbits: u32,
    shamt: u32,
    hash_value_count: usize,
    scheduler: &JobScheduler,
    config: &EngineConfig,
) -> Vec<u32> {
    let threads = config.job_threads.max(1);
    let tuples_per_thread = (num_tuples as usize) / threads;
    let partials: Arc<Mutex<Vec<Vec<u32>>>> = Arc::new(Mutex::new(vec![Vec::new(); threads]));

    for i in 0..threads {
        let start_ = (i * tuples_per_thread) as u32;
        let end_ = if i + 1 == threads {
            num_tuples
        } else {
            ((i + 1) * tuples_per_thread) as u32
        };

        let src = Arc::clone(src);
        let partials = Arc::clone(&partials);

        scheduler.submit(Job::Histogram(Box::new(move || {
            let mut hist = vec![0u32; hash_value_count];
            for idx in start_..end_ {
                let hv = lsbits(src[idx as usize].payload, nbits, shamt);
                hist[hv] += 1;
            }
            partials.lock()[i] = hist;
        })));
    }

    scheduler.execute_all();
    scheduler.wait_all();

    let partials = partials.lock();
    let mut hist = vec![0u32; hash_value_count];
    for partial in partials.iter() {
        for (i, count) in partial.iter().enumerate() {
            hist[i] += count;
        }
    }
    hist
}
