//! Message tags, environment variable names and tuning defaults.

// Message tags. Each pairwise-merge round gets its own tag so frames from
// different rounds can never be confused.
pub const TAG_SLICE: u32 = 650;
pub const TAG_MERGE_BASE: u32 = 700;

// Environment variable names
pub const ENV_HOSTS: &str = "HRAFN_HOSTS";

// Defaults
pub const DEFAULT_PAYLOAD_MAX: u32 = 256;
pub const DEFAULT_CUTOFF: usize = 10_000;

/// Buffer size for streamed file writes (large to amortize syscalls).
pub const WRITE_BUF_BYTES: usize = 32 * 1024 * 1024;

/// How long a connecting rank keeps retrying while its peer's listener
/// comes up. Covers launch skew only; established connections never retry.
pub const CONNECT_RETRY_WINDOW_MS: u64 = 10_000;
