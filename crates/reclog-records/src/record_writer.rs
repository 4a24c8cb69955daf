//! Record Writer - The Write Facade
//!
//! Accepts records (raw bytes or protobuf messages), groups them into
//! chunks, and writes the chunks through a [`ChunkWriter`] to any byte
//! sink. The first chunk of a fresh file is always the signature; an
//! optional metadata chunk follows it.
//!
//! ## Positions
//!
//! `pos()` is the position the next written record will get; `last_pos()`
//! is the position of the most recently written record. Both are exact
//! because chunks are encoded synchronously when they fill up.
//!
//! ## Flushing
//!
//! `flush` closes the open chunk (so everything written so far becomes
//! readable) and forwards the flush level to the sink. `FromProcess` makes
//! the data visible to other processes; `FromMachine` additionally asks for
//! durability across power loss.

use crate::chunk_encoder::ChunkEncoder;
use crate::chunk_writer::ChunkWriter;
use crate::compress::{DEFAULT_BROTLI_QUALITY, DEFAULT_ZSTD_LEVEL};
use crate::metadata::encode_metadata_chunk;
use crate::record_position::RecordPosition;
use bytes::Bytes;
use reclog_bytes::{FlushType, Writer};
use reclog_core::{CompressionType, Result};
use tracing::debug;

#[derive(Clone)]
pub struct RecordWriterOptions {
    /// Target uncompressed size of one chunk.
    pub chunk_size: u64,
    /// Store records transposed (columnar, for protobuf records) instead of
    /// concatenated.
    pub transpose: bool,
    pub compression: CompressionType,
    /// Codec-specific level; the default fits zstd and brotli alike.
    pub compression_level: i32,
    /// Fraction of `chunk_size` that one transpose data bucket may hold
    /// uncompressed. Smaller fractions give finer projection granularity.
    pub bucket_fraction: f64,
    /// Serialized metadata to store right after the file signature.
    pub metadata: Option<Bytes>,
    /// Begin and end the file on block boundaries so files can be
    /// concatenated.
    pub pad_to_block_boundary: bool,
}

impl Default for RecordWriterOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1 << 20,
            transpose: false,
            compression: CompressionType::Zstd,
            compression_level: DEFAULT_ZSTD_LEVEL,
            bucket_fraction: 1.0,
            metadata: None,
            pad_to_block_boundary: false,
        }
    }
}

impl RecordWriterOptions {
    pub fn brotli() -> Self {
        Self {
            compression: CompressionType::Brotli,
            compression_level: DEFAULT_BROTLI_QUALITY,
            ..Self::default()
        }
    }

    fn bucket_size(&self) -> u64 {
        ((self.chunk_size as f64) * self.bucket_fraction.clamp(0.0, 1.0)).max(1.0) as u64
    }
}

pub struct RecordWriter<W: Writer> {
    chunk_writer: ChunkWriter<W>,
    options: RecordWriterOptions,
    encoder: ChunkEncoder,
    last_record: Option<RecordPosition>,
}

impl<W: Writer> RecordWriter<W> {
    /// Starts writing to `dest`. At position 0 the signature chunk (and the
    /// metadata chunk, when configured) is written immediately; at any
    /// other position the writer appends.
    pub fn new(dest: W, options: RecordWriterOptions) -> Result<Self> {
        let mut chunk_writer = ChunkWriter::new(dest)?;
        if chunk_writer.pos() == 0 {
            chunk_writer.write_chunk(&crate::chunk::Chunk::file_signature())?;
            if let Some(metadata) = &options.metadata {
                let chunk = encode_metadata_chunk(metadata, options.compression)?;
                chunk_writer.write_chunk(&chunk)?;
            }
            debug!(metadata = options.metadata.is_some(), "started record file");
        }
        let encoder = Self::new_encoder(&options);
        Ok(Self {
            chunk_writer,
            options,
            encoder,
            last_record: None,
        })
    }

    fn new_encoder(options: &RecordWriterOptions) -> ChunkEncoder {
        if options.transpose {
            ChunkEncoder::transpose(
                options.compression,
                options.compression_level,
                options.bucket_size(),
            )
        } else {
            ChunkEncoder::simple(options.compression, options.compression_level)
        }
    }

    /// Writes one record and returns its position.
    pub fn write_record(&mut self, record: &[u8]) -> Result<RecordPosition> {
        let position = self.pos();
        self.encoder.add_record(record);
        self.last_record = Some(position);
        if self.encoder.decoded_data_size() >= self.options.chunk_size {
            self.finish_chunk()?;
        }
        Ok(position)
    }

    /// Serializes and writes a protobuf message.
    pub fn write_message<M: prost::Message>(&mut self, message: &M) -> Result<RecordPosition> {
        self.write_record(&message.encode_to_vec())
    }

    /// Position the next record will be written at.
    pub fn pos(&self) -> RecordPosition {
        RecordPosition::new(self.chunk_writer.pos(), self.encoder.num_records())
    }

    /// Position of the most recently written record.
    pub fn last_pos(&self) -> Option<RecordPosition> {
        self.last_record
    }

    /// Ends the open chunk so that everything written so far is readable.
    fn finish_chunk(&mut self) -> Result<()> {
        if self.encoder.num_records() == 0 {
            return Ok(());
        }
        let encoder = std::mem::replace(&mut self.encoder, Self::new_encoder(&self.options));
        let chunk = encoder.encode()?;
        debug!(
            chunk_begin = self.chunk_writer.pos(),
            num_records = chunk.header.num_records(),
            data_size = chunk.header.data_size(),
            "finishing chunk"
        );
        self.chunk_writer.write_chunk(&chunk)
    }

    /// Closes the open chunk and flushes the sink to the requested level.
    pub fn flush(&mut self, flush_type: FlushType) -> Result<()> {
        self.finish_chunk()?;
        if self.options.pad_to_block_boundary {
            self.chunk_writer.pad_to_block_boundary()?;
        }
        self.chunk_writer.flush(flush_type)
    }

    /// Pads with a padding chunk up to the next block boundary.
    pub fn pad_to_block_boundary(&mut self) -> Result<()> {
        self.finish_chunk()?;
        self.chunk_writer.pad_to_block_boundary()
    }

    /// Finishes writing and returns the sink.
    pub fn close(mut self, flush_type: FlushType) -> Result<W> {
        self.finish_chunk()?;
        if self.options.pad_to_block_boundary {
            self.chunk_writer.pad_to_block_boundary()?;
        }
        self.chunk_writer.close(flush_type)
    }
}
