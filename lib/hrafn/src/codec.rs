use thiserror::Error;

// On-disk record framing: key | len | payload, back to back, no padding.
// All integers little-endian; no alignment assumptions in the stream.
pub const KEY_SIZE: usize = 8;
pub const LEN_SIZE: usize = 4;
pub const HEADER_SIZE: usize = KEY_SIZE + LEN_SIZE;

/// Decoded record header. Payload bytes stay in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: u64,
    pub len: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record header at offset {offset} overruns file of {file_len} bytes")]
    ShortInput { offset: u64, file_len: u64 },
    #[error("payload of {len} bytes at offset {offset} overruns file of {file_len} bytes")]
    PayloadOverrun { offset: u64, len: u32, file_len: u64 },
    #[error("file ends after {found} records, expected {expected}")]
    TooFewRecords { expected: u64, found: u64 },
    #[error("{trailing} trailing bytes after record {expected}")]
    TrailingBytes { expected: u64, trailing: u64 },
}

/// Reads the record header at `offset`, bounds-checking both the header
/// and the payload it announces. No allocation.
pub fn decode_header(bytes: &[u8], offset: u64) -> Result<RecordHeader, DecodeError> {
    let file_len = bytes.len() as u64;
    if offset + HEADER_SIZE as u64 > file_len {
        return Err(DecodeError::ShortInput { offset, file_len });
    }
    let at = offset as usize;
    let key = u64::from_le_bytes(bytes[at..at + KEY_SIZE].try_into().unwrap());
    let len = u32::from_le_bytes(bytes[at + KEY_SIZE..at + HEADER_SIZE].try_into().unwrap());
    if offset + record_size(len) > file_len {
        return Err(DecodeError::PayloadOverrun { offset, len, file_len });
    }
    Ok(RecordHeader { key, len })
}

/// Total on-disk footprint of a record with payload length `len`.
pub fn record_size(len: u32) -> u64 {
    HEADER_SIZE as u64 + len as u64
}
