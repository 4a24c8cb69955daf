//! Per-chunk-type Encoding Dispatch
//!
//! One encoder accumulates the records of the chunk being built and turns
//! them into a finished [`Chunk`] of the matching type.

use crate::chunk::{Chunk, ChunkType};
use crate::simple::SimpleEncoder;
use crate::transpose::TransposeEncoder;
use reclog_core::{CompressionType, Result};

pub enum ChunkEncoder {
    Simple(SimpleEncoder),
    Transpose(TransposeEncoder),
}

impl ChunkEncoder {
    pub fn simple(compression: CompressionType, level: i32) -> Self {
        ChunkEncoder::Simple(SimpleEncoder::new(compression, level))
    }

    pub fn transpose(compression: CompressionType, level: i32, bucket_size: u64) -> Self {
        ChunkEncoder::Transpose(TransposeEncoder::new(compression, level, bucket_size))
    }

    pub fn add_record(&mut self, record: &[u8]) {
        match self {
            ChunkEncoder::Simple(encoder) => encoder.add_record(record),
            ChunkEncoder::Transpose(encoder) => encoder.add_record(record),
        }
    }

    pub fn num_records(&self) -> u64 {
        match self {
            ChunkEncoder::Simple(encoder) => encoder.num_records(),
            ChunkEncoder::Transpose(encoder) => encoder.num_records(),
        }
    }

    pub fn decoded_data_size(&self) -> u64 {
        match self {
            ChunkEncoder::Simple(encoder) => encoder.decoded_data_size(),
            ChunkEncoder::Transpose(encoder) => encoder.decoded_data_size(),
        }
    }

    /// Finishes the chunk.
    pub fn encode(self) -> Result<Chunk> {
        let (chunk_type, (data, num_records, decoded_data_size)) = match self {
            ChunkEncoder::Simple(encoder) => (ChunkType::Simple, encoder.encode()?),
            ChunkEncoder::Transpose(encoder) => (ChunkType::Transpose, encoder.encode()?),
        };
        Chunk::new(data, chunk_type, num_records, decoded_data_size)
    }
}
