//! Memory range chunking.
//!
//! The wire protocol carries memory as base64 with a signed 32-bit count,
//! so oversized reads are split into protocol-legal chunks at increasing
//! offsets until the requested range is covered.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::{DapError, Result};

/// Largest single read the protocol can express.
pub const MAX_CHUNK: u64 = i32::MAX as u64;

/// Sub-ranges covering `[start, start + length)`, each at most `MAX_CHUNK`
/// bytes, contiguous and non-overlapping.
pub fn chunk_ranges(start: u64, length: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::with_capacity(chunk_count(length) as usize);
    let mut offset = 0u64;
    while offset < length {
        let size = (length - offset).min(MAX_CHUNK);
        ranges.push((start + offset, size));
        offset += size;
    }
    ranges
}

pub fn chunk_count(length: u64) -> u64 {
    length.div_ceil(MAX_CHUNK)
}

/// One decoded chunk: raw bytes paired with the sub-range they were read
/// from. `data` may be shorter than `length` when the tail was unreadable.
#[derive(Debug, Clone)]
pub struct MemoryChunk {
    pub start: u64,
    pub length: u64,
    pub data: Vec<u8>,
}

/// Decode a chunk's transport-encoded payload.
pub fn decode_chunk(start: u64, length: u64, payload: Option<&str>) -> Result<MemoryChunk> {
    let data = match payload {
        Some(encoded) => BASE64
            .decode(encoded)
            .map_err(|err| DapError::Protocol(format!("bad memory payload: {err}")))?,
        None => Vec::new(),
    };
    Ok(MemoryChunk {
        start,
        length,
        data,
    })
}

/// Encode bytes for a memory write.
pub fn encode_payload(data: &[u8]) -> String {
    BASE64.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_reads_need_one_chunk() {
        assert_eq!(chunk_ranges(0x1000, 16), vec![(0x1000, 16)]);
        assert_eq!(chunk_count(16), 1);
        assert_eq!(chunk_count(MAX_CHUNK), 1);
    }

    #[test]
    fn oversized_read_splits_into_contiguous_chunks() {
        let length = (1u64 << 31) + 10;
        let ranges = chunk_ranges(0, length);

        assert_eq!(ranges.len(), 2);
        assert_eq!(chunk_count(length), 2);
        assert_eq!(ranges[0], (0, MAX_CHUNK));
        assert_eq!(ranges[1], (MAX_CHUNK, 11));
        // Contiguous, non-overlapping, and covering the request exactly.
        assert_eq!(ranges[0].0 + ranges[0].1, ranges[1].0);
        assert_eq!(ranges.iter().map(|r| r.1).sum::<u64>(), length);
    }

    #[test]
    fn zero_length_read_is_empty() {
        assert!(chunk_ranges(0x4000, 0).is_empty());
        assert_eq!(chunk_count(0), 0);
    }

    #[test]
    fn payload_round_trip() {
        let chunk = decode_chunk(0x100, 4, Some(&encode_payload(&[1, 2, 3, 4]))).unwrap();
        assert_eq!(chunk.data, vec![1, 2, 3, 4]);
        assert_eq!(chunk.start, 0x100);

        assert!(decode_chunk(0, 4, Some("not base64!!")).is_err());
        assert!(decode_chunk(0, 4, None).unwrap().data.is_empty());
    }
}
