//! Record container format.
//!
//! Records are grouped into chunks, chunks are laid out in 64 KiB blocks
//! whose headers make any byte offset resynchronizable, and every header
//! and payload is hashed so corruption is detected and skippable. Two chunk
//! codecs are provided: `simple` (concatenated records with a size table)
//! and `transpose` (columnar re-encoding of protobuf records).
//!
//! The public surface is [`RecordWriter`] and [`RecordReader`]; the chunk
//! and block layers underneath are exported for tools that need them.

pub mod block;
pub mod chunk;
pub mod chunk_decoder;
pub mod chunk_encoder;
pub mod chunk_reader;
pub mod chunk_writer;
pub mod compress;
pub mod metadata;
pub mod pool;
pub mod projection;
pub mod record_position;
pub mod record_reader;
pub mod record_writer;
pub mod simple;
pub mod skipped_region;
pub mod transpose;
pub mod wire;

pub use chunk::{Chunk, ChunkHeader, ChunkType};
pub use chunk_reader::ChunkReader;
pub use chunk_writer::ChunkWriter;
pub use projection::{Field, FieldProjection};
pub use record_position::RecordPosition;
pub use record_reader::{RecordReader, RecordReaderOptions};
pub use record_writer::{RecordWriter, RecordWriterOptions};
pub use skipped_region::SkippedRegion;

pub use reclog_core::{Chain, CompressionType, Error, Result};
