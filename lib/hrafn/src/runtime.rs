use std::path::Path;
use std::thread;
use std::time::Instant;

use anyhow::anyhow;
use tracing::{error, info};

use crate::constants::{DEFAULT_CUTOFF, DEFAULT_PAYLOAD_MAX};
use crate::distribute;
use crate::error::PipelineError;
use crate::gate::ProgressGate;
use crate::index::{self, IndexRec, RawIndex};
use crate::merge;
use crate::rewrite;
use crate::sort;
use crate::stats::{measure, PhaseTimings};
use crate::transport::{LocalMesh, Transport};
use crate::verify;

/// Run-time knobs. `threads == 0` selects the host's hardware
/// concurrency; `cutoff` trades task granularity against overhead and
/// has no effect on the result.
#[derive(Debug, Clone)]
pub struct SortConfig {
    pub records: u64,
    pub payload_max: u32,
    pub threads: usize,
    pub cutoff: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            records: 1_000_000,
            payload_max: DEFAULT_PAYLOAD_MAX,
            threads: 0,
            cutoff: DEFAULT_CUTOFF,
        }
    }
}

/// Runs the whole pipeline for one rank: distribute or receive, local
/// sort, pairwise merge, and on rank 0 the rewrite plus the final
/// verification scan. Any failure aborts the run.
pub fn run_rank<T: Transport>(
    cfg: &SortConfig,
    input: &Path,
    output: &Path,
    transport: &T,
) -> Result<PhaseTimings, PipelineError> {
    let rank = transport.rank();
    let size = transport.size();
    let n = cfg.records;
    let start = Instant::now();
    let mut timings = PhaseTimings { rank, ..Default::default() };

    let threads = if cfg.threads == 0 { num_cpus::get() } else { cfg.threads };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| PipelineError::Sort(e.into()))?;

    if rank == 0 && !input.exists() {
        return Err(PipelineError::Distribute(anyhow!(
            "input file {} does not exist",
            input.display()
        )));
    }

    info!(rank, size, records = n, threads, cutoff = cfg.cutoff, "pipeline starting");

    let mut local: Vec<IndexRec>;
    if size == 1 {
        // Single rank: the index build overlaps the gated sort, so the
        // first leaves start while the tail of the file is still being
        // scanned.
        let gate = ProgressGate::new();
        let mut recs = vec![IndexRec::default(); n as usize];
        let (built, elapsed) = measure("index_plus_sort", || {
            let raw = RawIndex::new(&mut recs);
            thread::scope(|s| -> anyhow::Result<()> {
                let builder = s.spawn(|| {
                    index::build_index_into(input, raw, n, Some((cfg.cutoff, &gate)))
                });
                pool.install(|| sort::merge_sort_overlapped(raw, cfg.cutoff, &gate));
                builder.join().map_err(|_| anyhow!("index builder panicked"))?
            })
        });
        built.map_err(PipelineError::from_scan)?;
        timings.sort_ms = elapsed.as_millis() as u64;
        local = recs;
    } else if rank == 0 {
        let (scattered, elapsed) =
            measure("distribute", || distribute::scatter_index(input, n, transport));
        local = scattered.map_err(PipelineError::from_scan)?;
        timings.distribute_ms = elapsed.as_millis() as u64;

        let (_, elapsed) =
            measure("local_sort", || pool.install(|| sort::merge_sort(&mut local, cfg.cutoff)));
        timings.sort_ms = elapsed.as_millis() as u64;
    } else {
        let (received, elapsed) =
            measure("receive_slice", || distribute::receive_slice(n, transport));
        local = received.map_err(|e| PipelineError::Distribute(e.into()))?;
        timings.distribute_ms = elapsed.as_millis() as u64;

        let (_, elapsed) =
            measure("local_sort", || pool.install(|| sort::merge_sort(&mut local, cfg.cutoff)));
        timings.sort_ms = elapsed.as_millis() as u64;
    }

    if size > 1 {
        let (merged, elapsed) =
            measure("pairwise_merge", || merge::pairwise_merge(local, n, transport));
        local = merged.map_err(|e| PipelineError::Merge(e.into()))?;
        timings.merge_ms = elapsed.as_millis() as u64;
    }

    if rank == 0 {
        if local.len() as u64 != n {
            return Err(PipelineError::Merge(anyhow!(
                "merge tree closed with {} records, expected {}",
                local.len(),
                n
            )));
        }

        let (rewritten, elapsed) =
            measure("rewrite_sorted", || rewrite::rewrite_sorted(input, output, &local));
        rewritten.map_err(PipelineError::Rewrite)?;
        timings.rewrite_ms = elapsed.as_millis() as u64;

        let (checked, elapsed) = measure("check_sorted", || verify::check_sorted(output, n));
        timings.verify_ms = elapsed.as_millis() as u64;
        if !checked.map_err(PipelineError::Verify)? {
            return Err(PipelineError::Verify(anyhow!(
                "output {} is not a sorted record file",
                output.display()
            )));
        }
    }

    timings.total_ms = start.elapsed().as_millis() as u64;
    info!(rank, total_ms = timings.total_ms, "pipeline finished");
    Ok(timings)
}

/// Runs the pipeline in one process with `ranks` in-process ranks over a
/// channel mesh, each with its own worker pool. Returns rank 0's
/// timings. The first failing rank wins; its poison unblocks any rank
/// still waiting on a partner.
pub fn run_local(
    cfg: &SortConfig,
    input: &Path,
    output: &Path,
    ranks: usize,
) -> Result<PhaseTimings, PipelineError> {
    let endpoints = LocalMesh::gang(ranks);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|mesh| {
                s.spawn(move || {
                    let out = run_rank(cfg, input, output, &mesh);
                    if let Err(e) = &out {
                        error!(rank = mesh.rank(), error = %e, "rank failed, aborting gang");
                        mesh.abort();
                    }
                    out
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let mut rank0 = None;
    for (rank, joined) in results.into_iter().enumerate() {
        match joined {
            Ok(Ok(timings)) => {
                timings.emit();
                if rank == 0 {
                    rank0 = Some(timings);
                }
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PipelineError::Sort(anyhow!("rank {} panicked", rank))),
        }
    }
    rank0.ok_or_else(|| PipelineError::Sort(anyhow!("gang produced no rank 0 result")))
}
