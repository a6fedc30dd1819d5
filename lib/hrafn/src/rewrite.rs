use std::path::Path;

use anyhow::{ensure, Context, Result};
use tracing::debug;

use crate::codec;
use crate::index::IndexRec;
use crate::io;

/// Materializes the sorted file: the output is pre-sized to the exact
/// byte total and each record's header plus payload is copied from the
/// input map through the sorted index. The index is only borrowed; the
/// caller keeps ownership.
pub fn rewrite_sorted(input: &Path, output: &Path, index: &[IndexRec]) -> Result<()> {
    let in_map = io::open_ro_map(input)?;
    let in_bytes: &[u8] = in_map.as_deref().unwrap_or(&[]);

    let out_size: u64 = index.iter().map(|r| codec::record_size(r.len)).sum();
    let mut out_map = io::create_rw_map(output, out_size)?;
    debug!(records = index.len(), bytes = out_size, "rewriting sorted output");

    if let Some(out_bytes) = out_map.as_deref_mut() {
        let mut cursor = 0usize;
        for rec in index {
            let n = codec::record_size(rec.len) as usize;
            let src = rec.offset as usize;
            ensure!(
                src + n <= in_bytes.len(),
                "index entry at offset {} overruns input of {} bytes",
                rec.offset,
                in_bytes.len()
            );
            out_bytes[cursor..cursor + n].copy_from_slice(&in_bytes[src..src + n]);
            cursor += n;
        }
    }

    if let Some(map) = &out_map {
        map.flush().with_context(|| format!("flush {}", output.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_records(path: &Path, records: &[(u64, Vec<u8>)]) -> Vec<IndexRec> {
        let mut file = std::fs::File::create(path).unwrap();
        let mut index = Vec::new();
        let mut offset = 0u64;
        for (key, payload) in records {
            file.write_all(&key.to_le_bytes()).unwrap();
            file.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            file.write_all(payload).unwrap();
            index.push(IndexRec { key: *key, offset, len: payload.len() as u32 });
            offset += codec::record_size(payload.len() as u32);
        }
        index
    }

    #[test]
    fn output_is_the_input_permuted_by_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");

        let records = vec![
            (5u64, vec![0xa0; 8]),
            (2, vec![0xb1; 12]),
            (9, vec![0xc2; 8]),
            (2, vec![0xd3; 9]),
        ];
        let mut index = write_records(&input, &records);
        index.sort_by_key(|r| r.key);

        rewrite_sorted(&input, &output, &index).unwrap();

        // Byte-level diff against the input permuted by the index.
        let in_bytes = std::fs::read(&input).unwrap();
        let mut expected = Vec::new();
        for rec in &index {
            let start = rec.offset as usize;
            let end = start + codec::record_size(rec.len) as usize;
            expected.extend_from_slice(&in_bytes[start..end]);
        }
        assert_eq!(std::fs::read(&output).unwrap(), expected);
    }

    #[test]
    fn output_size_matches_the_index_total() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");

        let records: Vec<(u64, Vec<u8>)> =
            (0..10u64).map(|i| (i, vec![i as u8; 8 + (i as usize % 5)])).collect();
        let index = write_records(&input, &records);

        rewrite_sorted(&input, &output, &index).unwrap();
        let expected: u64 = index.iter().map(|r| codec::record_size(r.len)).sum();
        assert_eq!(std::fs::metadata(&output).unwrap().len(), expected);
    }

    #[test]
    fn empty_index_produces_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        std::fs::File::create(&input).unwrap();

        rewrite_sorted(&input, &output, &[]).unwrap();
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 0);
    }

    #[test]
    fn stale_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        write_records(&input, &[(1, vec![0; 8])]);

        let bogus = [IndexRec { key: 1, offset: 500, len: 8 }];
        assert!(rewrite_sorted(&input, &output, &bogus).is_err());
    }
}
