//! Block Layout and Position Arithmetic
//!
//! A file is a sequence of 64 KiB blocks. Every block starts with a 24-byte
//! block header that lets a reader landing at an arbitrary offset find the
//! enclosing chunk boundaries:
//!
//! ```text
//! ┌────────────────────────────┬──────────────────────────┬──────────────┐
//! │ previous_chunk: u64 LE     │ next_chunk: u64 LE       │ hash: u64 LE │
//! │ distance back from this    │ distance forward from    │ hash of the  │
//! │ block start to the chunk   │ this block start to the  │ 16 preceding │
//! │ boundary at or before it   │ next chunk boundary      │ bytes        │
//! └────────────────────────────┴──────────────────────────┴──────────────┘
//! ```
//!
//! `previous_chunk == 0` means a chunk boundary coincides with the block
//! boundary. Chunks cross blocks transparently; positions in this module
//! are raw file offsets, and the `*_without_overhead` helpers convert
//! between file offsets and the logical data stream that excludes block
//! headers.
//!
//! All constants here are format constants.

use reclog_core::endian::{read_le64, write_le64};
use reclog_core::hash::hash_bytes;

/// Size of a block. Changing this breaks every existing file.
pub const BLOCK_SIZE: u64 = 1 << 16;

/// Size of a block header.
pub const BLOCK_HEADER_SIZE: u64 = 24;

/// Data bytes per block.
pub const USABLE_BLOCK_SIZE: u64 = BLOCK_SIZE - BLOCK_HEADER_SIZE;

/// Chunk boundaries are 8-aligned.
pub const CHUNK_ALIGNMENT: u64 = 8;

pub fn round_down_to_block_boundary(pos: u64) -> u64 {
    pos & !(BLOCK_SIZE - 1)
}

pub fn round_up_to_block_boundary(pos: u64) -> u64 {
    round_down_to_block_boundary(pos + (BLOCK_SIZE - 1))
}

pub fn is_block_boundary(pos: u64) -> bool {
    pos % BLOCK_SIZE == 0
}

/// Bytes until the next block boundary; 0 at a boundary.
pub fn remaining_in_block(pos: u64) -> u64 {
    (BLOCK_SIZE - pos % BLOCK_SIZE) % BLOCK_SIZE
}

/// Bytes of block header at or after `pos` within its block; 0 outside the
/// header region.
pub fn remaining_in_block_header(pos: u64) -> u64 {
    BLOCK_HEADER_SIZE.saturating_sub(pos % BLOCK_SIZE)
}

/// True for positions where a chunk may begin: 8-aligned and not inside a
/// block header. A block boundary itself is a possible chunk boundary (the
/// chunk's bytes then start right after the block header).
pub fn is_possible_chunk_boundary(pos: u64) -> bool {
    pos % CHUNK_ALIGNMENT == 0 && (is_block_boundary(pos) || pos % BLOCK_SIZE >= BLOCK_HEADER_SIZE)
}

/// Block-header bytes in `[0, pos)`.
fn header_bytes_before(pos: u64) -> u64 {
    BLOCK_HEADER_SIZE * (pos / BLOCK_SIZE) + (pos % BLOCK_SIZE).min(BLOCK_HEADER_SIZE)
}

/// Offset of `pos` in the logical data stream (file offset minus block
/// headers).
pub fn data_offset(pos: u64) -> u64 {
    pos - header_bytes_before(pos)
}

/// Data bytes in `[begin, end)`, excluding block headers.
pub fn distance_without_overhead(begin: u64, end: u64) -> u64 {
    data_offset(end) - data_offset(begin)
}

/// File offset at which the logical data stream reaches `offset`. Offsets
/// landing exactly on a block's worth of data map to the block boundary,
/// the canonical form of that position.
fn file_pos_for_data_offset(offset: u64) -> u64 {
    let block = offset / USABLE_BLOCK_SIZE;
    let within = offset % USABLE_BLOCK_SIZE;
    if within == 0 {
        block * BLOCK_SIZE
    } else {
        block * BLOCK_SIZE + BLOCK_HEADER_SIZE + within
    }
}

/// The file position `length` data bytes after `pos`, accounting for block
/// headers in between.
pub fn add_with_overhead(pos: u64, length: u64) -> u64 {
    file_pos_for_data_offset(data_offset(pos) + length)
}

/// A decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    bytes: [u8; BLOCK_HEADER_SIZE as usize],
}

impl BlockHeader {
    /// Builds a header for a block whose nearest chunk boundaries are
    /// `previous_chunk` bytes back and `next_chunk` bytes forward from the
    /// block start.
    pub fn new(previous_chunk: u64, next_chunk: u64) -> Self {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE as usize];
        write_le64(previous_chunk, &mut bytes[0..8]);
        write_le64(next_chunk, &mut bytes[8..16]);
        let hash = hash_bytes(&bytes[0..16]);
        write_le64(hash, &mut bytes[16..24]);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; BLOCK_HEADER_SIZE as usize]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; BLOCK_HEADER_SIZE as usize] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; BLOCK_HEADER_SIZE as usize] {
        &mut self.bytes
    }

    pub fn previous_chunk(&self) -> u64 {
        read_le64(&self.bytes[0..8])
    }

    pub fn next_chunk(&self) -> u64 {
        read_le64(&self.bytes[8..16])
    }

    pub fn stored_hash(&self) -> u64 {
        read_le64(&self.bytes[16..24])
    }

    pub fn computed_hash(&self) -> u64 {
        hash_bytes(&self.bytes[0..16])
    }

    pub fn is_valid(&self) -> bool {
        self.computed_hash() == self.stored_hash()
    }
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            bytes: [0u8; BLOCK_HEADER_SIZE as usize],
        }
    }
}
