//! File Metadata Chunk
//!
//! An optional chunk right after the file signature carrying serialized,
//! application-defined metadata (typically a descriptor of the record
//! type). The payload is opaque to the container. On disk the chunk
//! advertises zero records, but its payload travels through the transpose
//! codec as a single logical record so metadata compresses like any other
//! message.

use crate::chunk::{Chunk, ChunkType};
use crate::compress::DEFAULT_ZSTD_LEVEL;
use crate::projection::FieldProjection;
use crate::transpose::{TransposeDecoder, TransposeEncoder};
use reclog_bytes::ChainBackwardWriter;
use reclog_core::{Chain, CompressionType, Error, Result};

/// Builds the file-metadata chunk for `serialized` metadata bytes.
pub fn encode_metadata_chunk(
    serialized: &[u8],
    compression: CompressionType,
) -> Result<Chunk> {
    let mut encoder = TransposeEncoder::new(compression, DEFAULT_ZSTD_LEVEL, u64::MAX);
    encoder.add_record(serialized);
    let (data, num_records, decoded_data_size) = encoder.encode()?;
    debug_assert_eq!(num_records, 1);
    Chunk::new(data, ChunkType::FileMetadata, 0, decoded_data_size)
}

/// Extracts the serialized metadata bytes from a file-metadata chunk.
pub fn decode_metadata_chunk(chunk: &Chunk) -> Result<Chain> {
    if chunk.header.chunk_type() != Some(ChunkType::FileMetadata) {
        return Err(Error::invalid_data("not a file metadata chunk"));
    }
    if chunk.header.num_records() != 0 {
        return Err(Error::invalid_data(format!(
            "invalid file metadata chunk: number of records is not zero: {}",
            chunk.header.num_records()
        )));
    }
    let decoded_data_size = chunk.header.decoded_data_size();
    let mut dest = ChainBackwardWriter::with_size_hint(decoded_data_size.min(1 << 30) as usize);
    let limits = TransposeDecoder::decode(
        1,
        decoded_data_size,
        &FieldProjection::all(),
        chunk.data.clone(),
        &mut dest,
    )?;
    let metadata = dest.into_chain();
    debug_assert_eq!(limits.len(), 1);
    debug_assert_eq!(limits[0], metadata.len());
    Ok(metadata)
}
