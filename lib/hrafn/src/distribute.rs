use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::constants::TAG_SLICE;
use crate::index::{self, IndexRec};
use crate::io;
use crate::transport::{Transport, TransportError};

/// Root side of the one-shot distribution: a single pass over the source
/// file fills one exact-capacity vector per rank, and each non-root
/// slice ships with one non-blocking send the moment its last record is
/// decoded. Returns the root's own slice. All sends are awaited before
/// the mapping is dropped.
pub fn scatter_index<T: Transport>(path: &Path, n: u64, transport: &T) -> Result<Vec<IndexRec>> {
    let size = transport.size();
    let bounds: Vec<(u64, u64)> = (0..size).map(|r| index::slice_bounds(n, size, r)).collect();

    let map = io::open_ro_map(path)?;
    let bytes: &[u8] = map.as_deref().unwrap_or(&[]);

    let mut per_rank: Vec<Vec<IndexRec>> = bounds
        .iter()
        .map(|(start, end)| Vec::with_capacity((end - start) as usize))
        .collect();
    let mut pending = Vec::with_capacity(size.saturating_sub(1));
    let mut current = 0usize;

    index::scan_records(bytes, n, |i, rec| {
        // Slices are contiguous by record index, so the scan target only
        // ever moves forward (skipping any empty slices on the way).
        while i >= bounds[current].1 {
            current += 1;
        }
        per_rank[current].push(rec);
        if i + 1 == bounds[current].1 && current != 0 {
            debug!(rank = current, count = per_rank[current].len(), "slice complete, shipping");
            let slice = std::mem::take(&mut per_rank[current]);
            pending.push(
                transport
                    .send_nb(current, TAG_SLICE, &slice)
                    .with_context(|| format!("ship slice to rank {current}"))?,
            );
        }
        Ok(())
    })?;

    // Ranks whose slice is empty never hit the ship trigger above; they
    // still get their zero-element message.
    for rank in 1..size {
        if bounds[rank].0 == bounds[rank].1 {
            pending.push(
                transport
                    .send_nb(rank, TAG_SLICE, &[])
                    .with_context(|| format!("ship empty slice to rank {rank}"))?,
            );
        }
    }

    for p in pending {
        p.wait().context("complete outstanding slice send")?;
    }
    drop(map);

    Ok(std::mem::take(&mut per_rank[0]))
}

/// Non-root side: one receive of the deterministic slice size, no
/// handshake.
pub fn receive_slice<T: Transport>(n: u64, transport: &T) -> Result<Vec<IndexRec>, TransportError> {
    let expected = index::count_for_rank(n, transport.size(), transport.rank());
    transport.recv(0, TAG_SLICE, expected)
}
