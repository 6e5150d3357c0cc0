//! `joiner` — a batch-mode CLI for the partitioned hash join engine.
//!
//! Speaks the same two-phase stdin protocol as
//! `original_source/programs/sigmod/joiner.c`: a relation-name phase
//! terminated by a literal `Done` line, followed by repeating query
//! batches, each terminated by a literal `F` line, with one query per line
//! in between. For each batch, checksums are printed to stdout in
//! submission order once every query in the batch has finished.

use std::io::{self, BufRead, Write};

use parking_lot::Mutex;

use sigmod_joiner::concurrent::JobScheduler;
use sigmod_joiner::config::EngineConfig;
use sigmod_joiner::execution::{
    apply_filters, apply_joins, calculate_checksums, format_checksums, gather_statistics,
    optimize_query, RelationStatistics,
};
use sigmod_joiner::parser::{self, Query};
use sigmod_joiner::storage::Relation;
use sigmod_joiner::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = stdout.lock();

    let relation_names = parser::read_relation_names(&mut input)?;

    let config = EngineConfig::default();
    tracing::info!(
        relations = relation_names.len(),
        job_threads = config.job_threads,
        query_threads = config.query_threads,
        l2_size = config.l2_size,
        "loaded workload"
    );

    let mut relations = Vec::with_capacity(relation_names.len());
    let mut statistics = Vec::with_capacity(relation_names.len());
    for name in &relation_names {
        let relation = Relation::load(name)?;
        statistics.push(gather_statistics(&relation));
        relations.push(relation);
    }

    let mut batch: Vec<Query> = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = input.read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);

        if trimmed == "F" {
            run_batch(&batch, &relations, &statistics, &config, &mut output)?;
            batch.clear();
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }

        batch.push(parser::parse_query(trimmed).map_err(|e| {
            log::warn!("aborting on malformed query line {trimmed:?}: {e}");
            e
        })?);
    }

    if !batch.is_empty() {
        run_batch(&batch, &relations, &statistics, &config, &mut output)?;
    }

    output.flush()?;
    Ok(())
}

/// Executes every query in `batch` over a bounded pool of `config.query_threads`
/// scoped worker threads, then prints all checksums in submission order.
///
/// The original C driver (`joiner.c`) hands queries to a fixed-size worker
/// pool through a hand-rolled ring buffer guarded by a mutex and two condvars,
/// tracking free workers with a `threads` counter read outside the lock on its
/// wait-loop fast path. A `std::thread::scope` over a shared `Mutex<VecDeque<..>>`
/// gets the same bounded-parallelism behaviour — each worker blocks only while
/// holding the lock, and the scope's join at the end replaces the
/// `full_pool`/`empty_pool` condvar handshake the batch boundary needed.
fn run_batch(
    batch: &[Query],
    relations: &[Relation],
    statistics: &[RelationStatistics],
    config: &EngineConfig,
    output: &mut impl Write,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let pending: Mutex<std::collections::VecDeque<(usize, Query)>> =
        Mutex::new(batch.iter().cloned().enumerate().collect());
    let results: Vec<Mutex<Option<Vec<u64>>>> = (0..batch.len()).map(|_| Mutex::new(None)).collect();

    let worker_count = config.query_threads.min(batch.len()).max(1);

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| loop {
                let next = pending.lock().pop_front();
                let Some((index, mut query)) = next else {
                    break;
                };

                let (filter_inters, empty_result) = apply_filters(relations, &query);

                let checksums = if empty_result {
                    calculate_checksums(&filter_inters, relations, &query, true)
                } else {
                    optimize_query(&mut query, statistics, true);
                    let scheduler = JobScheduler::new(config.job_threads);
                    let (join_inters, empty_result) =
                        apply_joins(relations, &filter_inters, &query, &scheduler, config);
                    calculate_checksums(&join_inters, relations, &query, empty_result)
                };

                *results[index].lock() = Some(checksums);
            });
        }
    });

    for result in &results {
        let checksums = result.lock().take().expect("every query produces a result");
        writeln!(output, "{}", format_checksums(&checksums))?;
    }

    Ok(())
}

