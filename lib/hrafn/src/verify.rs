use std::path::Path;

use anyhow::Result;
use tracing::warn;

use crate::codec;
use crate::io;

/// Single scan over `path`: Ok(true) iff it frames exactly `n` records
/// with non-decreasing keys and no trailing bytes. Content problems
/// yield Ok(false) with a logged reason; I/O problems are errors.
pub fn check_sorted(path: &Path, n: u64) -> Result<bool> {
    let map = io::open_ro_map(path)?;
    let bytes: &[u8] = map.as_deref().unwrap_or(&[]);

    let mut pos = 0u64;
    let mut prev_key = 0u64;
    for i in 0..n {
        let hdr = match codec::decode_header(bytes, pos) {
            Ok(hdr) => hdr,
            Err(e) => {
                warn!(record = i, error = %e, "not sorted: bad framing");
                return Ok(false);
            }
        };
        if i > 0 && hdr.key < prev_key {
            warn!(record = i, key = hdr.key, prev_key, "not sorted: key regression");
            return Ok(false);
        }
        prev_key = hdr.key;
        pos += codec::record_size(hdr.len);
    }
    if pos != bytes.len() as u64 {
        warn!(
            consumed = pos,
            file_len = bytes.len() as u64,
            "not sorted: trailing bytes"
        );
        return Ok(false);
    }
    Ok(true)
}
