use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::codec;
use crate::constants::WRITE_BUF_BYTES;

/// Fixed generator seed; the same (n, payload_max) yields the same file
/// on every host.
const GEN_SEED: u64 = 42;

pub fn input_path(dir: &Path, n: u64, payload_max: u32) -> PathBuf {
    dir.join(format!("unsorted_{n}_{payload_max}.bin"))
}

pub fn output_path(dir: &Path, n: u64, payload_max: u32) -> PathBuf {
    dir.join(format!("sorted_{n}_{payload_max}.bin"))
}

/// Returns the path of a valid unsorted input for (n, payload_max),
/// generating it on first use. Keys are uniform in [0, i32::MAX],
/// payload lengths uniform in [8, payload_max].
pub fn ensure_input(dir: &Path, n: u64, payload_max: u32) -> Result<PathBuf> {
    let path = input_path(dir, n, payload_max);
    if path.exists() {
        info!(path = %path.display(), "input present, skipping generation");
        return Ok(path);
    }
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let payload_max = payload_max.max(8);
    let file = fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::with_capacity(WRITE_BUF_BYTES, file);
    let mut rng = StdRng::seed_from_u64(GEN_SEED);
    let mut payload = vec![0u8; payload_max as usize];

    let mut bytes_out = 0u64;
    for _ in 0..n {
        let key: u64 = rng.gen_range(0..=i32::MAX as u64);
        let len: u32 = rng.gen_range(8..=payload_max);
        rng.fill(&mut payload[..len as usize]);
        out.write_all(&key.to_le_bytes())?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(&payload[..len as usize])?;
        bytes_out += codec::record_size(len);
    }
    out.flush().context("flush generated input")?;
    info!(path = %path.display(), records = n, bytes = bytes_out, "generated unsorted input");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index;

    #[test]
    fn generates_a_decodable_file_of_n_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = ensure_input(dir.path(), 50, 64).unwrap();

        let idx = index::build_index(&path, 50, None).unwrap();
        assert_eq!(idx.len(), 50);
        assert!(idx.iter().all(|r| (8..=64).contains(&r.len)));
        assert!(idx.iter().all(|r| r.key <= i32::MAX as u64));
    }

    #[test]
    fn generation_is_deterministic_and_skipped_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let first = ensure_input(dir.path(), 10, 32).unwrap();
        let bytes = fs::read(&first).unwrap();

        // Second call returns the same path without rewriting.
        let second = ensure_input(dir.path(), 10, 32).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&second).unwrap(), bytes);

        // A fresh directory reproduces the identical file.
        let other = tempfile::tempdir().unwrap();
        let third = ensure_input(other.path(), 10, 32).unwrap();
        assert_eq!(fs::read(&third).unwrap(), bytes);
    }

    #[test]
    fn zero_records_yields_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = ensure_input(dir.path(), 0, 16).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }
}
