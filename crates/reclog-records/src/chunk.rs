//! Chunk Format
//!
//! A chunk is a 40-byte header followed by opaque data, padded to 8-byte
//! alignment in the logical data stream:
//!
//! ```text
//! ┌──────────────────┬───────────────┬───────────────┬────────────┐
//! │ header_hash: u64 │ data_size:u64 │ data_hash:u64 │ type: u8   │
//! ├──────────────────┴──────┬────────┴───────────────┴────────────┤
//! │ num_records: u56        │ decoded_data_size: u64              │
//! └─────────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! All fields little-endian. `header_hash` covers the remaining 32 header
//! bytes; `data_hash` covers the chunk data. The type byte values are
//! format constants.
//!
//! The mandatory first chunk of a file is the signature: type `0x73` with
//! all sizes zero. Its header (together with the first block header) forms
//! the fixed 64-byte file prefix that identifies the format.

use crate::block::{add_with_overhead, CHUNK_ALIGNMENT};
use reclog_core::endian::{read_le64, write_le64};
use reclog_core::hash::{hash_bytes, hash_chain};
use reclog_core::{Chain, Error, Result};

/// Size of a chunk header on disk.
pub const CHUNK_HEADER_SIZE: u64 = 40;

/// Largest representable record count (56-bit field).
pub const MAX_NUM_RECORDS: u64 = (1 << 56) - 1;

/// Chunk type byte. The values are stable on-disk constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    FileSignature = 0x73,
    FileMetadata = 0x6d,
    Padding = 0x70,
    Simple = 0x72,
    Transpose = 0x74,
}

impl ChunkType {
    pub fn from_byte(byte: u8) -> Option<ChunkType> {
        match byte {
            0x73 => Some(ChunkType::FileSignature),
            0x6d => Some(ChunkType::FileMetadata),
            0x70 => Some(ChunkType::Padding),
            0x72 => Some(ChunkType::Simple),
            0x74 => Some(ChunkType::Transpose),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The fixed 40-byte chunk header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    bytes: [u8; CHUNK_HEADER_SIZE as usize],
}

impl ChunkHeader {
    /// Computes a header for `data`, including both hashes.
    pub fn new(
        data: &Chain,
        chunk_type: ChunkType,
        num_records: u64,
        decoded_data_size: u64,
    ) -> Result<Self> {
        if num_records > MAX_NUM_RECORDS {
            return Err(Error::resource_exhausted(format!(
                "too many records in chunk: {num_records}"
            )));
        }
        let mut bytes = [0u8; CHUNK_HEADER_SIZE as usize];
        write_le64(data.len(), &mut bytes[8..16]);
        write_le64(hash_chain(data), &mut bytes[16..24]);
        bytes[24] = chunk_type.as_byte();
        bytes[25..32].copy_from_slice(&num_records.to_le_bytes()[..7]);
        write_le64(decoded_data_size, &mut bytes[32..40]);
        let header_hash = hash_bytes(&bytes[8..40]);
        write_le64(header_hash, &mut bytes[0..8]);
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; CHUNK_HEADER_SIZE as usize]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; CHUNK_HEADER_SIZE as usize] {
        &self.bytes
    }

    pub fn stored_header_hash(&self) -> u64 {
        read_le64(&self.bytes[0..8])
    }

    pub fn computed_header_hash(&self) -> u64 {
        hash_bytes(&self.bytes[8..40])
    }

    pub fn data_size(&self) -> u64 {
        read_le64(&self.bytes[8..16])
    }

    pub fn data_hash(&self) -> u64 {
        read_le64(&self.bytes[16..24])
    }

    /// The raw type byte; may name a type this build does not know.
    pub fn chunk_type_byte(&self) -> u8 {
        self.bytes[24]
    }

    pub fn chunk_type(&self) -> Option<ChunkType> {
        ChunkType::from_byte(self.bytes[24])
    }

    pub fn num_records(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw[..7].copy_from_slice(&self.bytes[25..32]);
        u64::from_le_bytes(raw)
    }

    pub fn decoded_data_size(&self) -> u64 {
        read_le64(&self.bytes[32..40])
    }

    pub fn is_valid(&self) -> bool {
        self.computed_header_hash() == self.stored_header_hash()
    }

    /// Position just past this chunk (header, data, alignment padding and
    /// any block headers in between) when the chunk begins at `chunk_begin`.
    pub fn chunk_end(&self, chunk_begin: u64) -> u64 {
        let size = CHUNK_HEADER_SIZE + self.data_size();
        let rounded = size.div_ceil(CHUNK_ALIGNMENT) * CHUNK_ALIGNMENT;
        add_with_overhead(chunk_begin, rounded)
    }
}

impl Default for ChunkHeader {
    fn default() -> Self {
        Self {
            bytes: [0u8; CHUNK_HEADER_SIZE as usize],
        }
    }
}

impl std::fmt::Debug for ChunkHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkHeader")
            .field("chunk_type", &self.chunk_type_byte())
            .field("data_size", &self.data_size())
            .field("num_records", &self.num_records())
            .field("decoded_data_size", &self.decoded_data_size())
            .finish()
    }
}

/// A chunk: header plus data.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub data: Chain,
}

impl Chunk {
    pub fn new(
        data: Chain,
        chunk_type: ChunkType,
        num_records: u64,
        decoded_data_size: u64,
    ) -> Result<Self> {
        let header = ChunkHeader::new(&data, chunk_type, num_records, decoded_data_size)?;
        Ok(Self { header, data })
    }

    /// The file-signature chunk: empty, fixed type, at position 0.
    pub fn file_signature() -> Self {
        Self::new(Chain::new(), ChunkType::FileSignature, 0, 0)
            .expect("signature chunk is always representable")
    }

    /// A padding chunk with `len` bytes of zero data.
    pub fn padding(len: u64) -> Result<Self> {
        Self::new(Chain::zeros(len), ChunkType::Padding, 0, 0)
    }

    pub fn reset(&mut self) {
        self.header = ChunkHeader::default();
        self.data.clear();
    }
}
