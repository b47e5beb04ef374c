//! Payload chunking.
//!
//! Payloads above the size cap are split into contiguous fixed-size chunks
//! (last one possibly smaller). A zero-length payload still yields one
//! empty chunk so every message has at least one frame on the wire.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub is_last: bool,
    pub payload: Vec<u8>,
}

pub fn chunk_payload(payload: &[u8], max_chunk_bytes: usize) -> Vec<Chunk> {
    debug_assert!(max_chunk_bytes > 0);
    if payload.is_empty() {
        return vec![Chunk {
            index: 0,
            is_last: true,
            payload: Vec::new(),
        }];
    }
    let count = payload.len().div_ceil(max_chunk_bytes);
    payload
        .chunks(max_chunk_bytes)
        .enumerate()
        .map(|(i, piece)| Chunk {
            index: i as u32,
            is_last: i + 1 == count,
            payload: piece.to_vec(),
        })
        .collect()
}
