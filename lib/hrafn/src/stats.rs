use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

/// Runs `body` and reports its wall time under `label`.
pub fn measure<T>(label: &str, body: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let out = body();
    let elapsed = start.elapsed();
    info!(phase = label, elapsed_ms = elapsed.as_millis() as u64, "phase done");
    (out, elapsed)
}

/// Per-phase wall times for one rank, reported once at the end of a run.
/// Phases a rank did not execute stay at zero.
#[derive(Default, Clone, Debug, Serialize)]
pub struct PhaseTimings {
    pub rank: usize,
    pub distribute_ms: u64,
    pub sort_ms: u64,
    pub merge_ms: u64,
    pub rewrite_ms: u64,
    pub verify_ms: u64,
    pub total_ms: u64,
}

impl PhaseTimings {
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(line) => info!(target: "hrafn::stats", "{}", line),
            Err(e) => tracing::error!("stats serialization: {}", e),
        }
    }
}
