//! Chunk-section Compression
//!
//! Every compressed section of a chunk (the simple codec's size table and
//! values, the transpose codec's header, buckets and transition stream)
//! uses the same framing: when the chunk's compression type is not `None`,
//! a varint of the uncompressed size precedes the codec bitstream. The
//! size prefix lets a reader allocate exactly once and lets projection
//! decide whether a bucket is worth decompressing at all.
//!
//! Codec calls are one-shot over whole sections. Zstd contexts are
//! recycled through a process-wide [`pool`](crate::pool) keyed by
//! compression level.

use crate::pool::RecyclingPool;
use bytes::Bytes;
use reclog_bytes::{ChainReader, ChainWriter, Reader, Writer};
use reclog_core::varint;
use reclog_core::{Chain, CompressionType, Error, Result};
use std::sync::LazyLock;

/// Hadoop-snappy sections compress at most this much per block.
const HADOOP_SNAPPY_BLOCK_SIZE: usize = 1 << 16;

static ZSTD_COMPRESSORS: LazyLock<RecyclingPool<i32, zstd::bulk::Compressor<'static>>> =
    LazyLock::new(RecyclingPool::new);

static ZSTD_DECOMPRESSORS: LazyLock<RecyclingPool<(), zstd::bulk::Decompressor<'static>>> =
    LazyLock::new(RecyclingPool::new);

/// Default zstd compression level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Default brotli quality.
pub const DEFAULT_BROTLI_QUALITY: i32 = 6;

/// Uncompressed size of a compressed section: the section length itself for
/// `None`, otherwise the varint prefix.
pub fn uncompressed_size(compressed: &Chain, compression: CompressionType) -> Option<u64> {
    if compression == CompressionType::None {
        return Some(compressed.len());
    }
    let head = compressed.subrange(0, compressed.len().min(10)).to_vec();
    varint::read_varint64(&head).map(|(value, _)| value)
}

/// Stages uncompressed bytes and emits one compressed section.
pub struct Compressor {
    compression: CompressionType,
    level: i32,
    staged: ChainWriter,
}

impl Compressor {
    pub fn new(compression: CompressionType, level: i32) -> Self {
        Self {
            compression,
            level,
            staged: ChainWriter::new(),
        }
    }

    /// The sink to write uncompressed data into.
    pub fn writer(&mut self) -> &mut ChainWriter {
        &mut self.staged
    }

    /// Compresses everything staged and writes the section to `dest`.
    pub fn encode(self, dest: &mut dyn Writer) -> Result<()> {
        let staged = self.staged.into_chain();
        if self.compression == CompressionType::None {
            return dest.write_chain(&staged);
        }
        let data = staged.flatten();
        let mut prefix = Vec::with_capacity(varint::MAX_LEN_VARINT64);
        varint::write_varint64(data.len() as u64, &mut prefix);
        dest.write(&prefix)?;
        let compressed = compress_all(&data, self.compression, self.level)?;
        dest.write(&compressed)
    }
}

fn compress_all(data: &[u8], compression: CompressionType, level: i32) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => unreachable!("uncompressed sections are written directly"),
        CompressionType::Zstd => {
            let mut ctx = ZSTD_COMPRESSORS
                .get(level, || zstd::bulk::Compressor::new(level))
                .map_err(|e| Error::io("zstd context", e))?;
            ctx.compress(data).map_err(|e| Error::io("zstd compress", e))
        }
        CompressionType::Brotli => {
            let params = brotli::enc::BrotliEncoderParams {
                quality: level,
                ..Default::default()
            };
            let mut out = Vec::new();
            brotli::BrotliCompress(&mut &data[..], &mut out, &params)
                .map_err(|e| Error::io("brotli compress", e))?;
            Ok(out)
        }
        CompressionType::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::invalid_data(format!("snappy compress: {e}"))),
        CompressionType::HadoopSnappy => {
            let mut out = Vec::new();
            let mut encoder = snap::raw::Encoder::new();
            for block in data.chunks(HADOOP_SNAPPY_BLOCK_SIZE) {
                let compressed = encoder
                    .compress_vec(block)
                    .map_err(|e| Error::invalid_data(format!("snappy compress: {e}")))?;
                out.extend_from_slice(&(block.len() as u32).to_be_bytes());
                out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
                out.extend_from_slice(&compressed);
            }
            Ok(out)
        }
    }
}

fn decompress_all(data: &[u8], compression: CompressionType, size: u64) -> Result<Vec<u8>> {
    if size > usize::MAX as u64 {
        return Err(Error::resource_exhausted(format!(
            "uncompressed section of {size} bytes does not fit in memory"
        )));
    }
    let size = size as usize;
    let out = match compression {
        CompressionType::None => unreachable!("uncompressed sections are read directly"),
        CompressionType::Zstd => {
            let mut ctx = ZSTD_DECOMPRESSORS
                .get((), zstd::bulk::Decompressor::new)
                .map_err(|e| Error::io("zstd context", e))?;
            ctx.decompress(data, size)
                .map_err(|e| Error::invalid_data(format!("zstd decompress: {e}")))?
        }
        CompressionType::Brotli => {
            let mut out = Vec::with_capacity(size);
            brotli::BrotliDecompress(&mut &data[..], &mut out)
                .map_err(|e| Error::invalid_data(format!("brotli decompress: {e}")))?;
            out
        }
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::invalid_data(format!("snappy decompress: {e}")))?,
        CompressionType::HadoopSnappy => {
            let mut out = Vec::with_capacity(size);
            let mut decoder = snap::raw::Decoder::new();
            let mut rest = data;
            while !rest.is_empty() {
                if rest.len() < 8 {
                    return Err(Error::invalid_data("truncated hadoop-snappy block header"));
                }
                let uncompressed_len =
                    u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
                let compressed_len =
                    u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
                rest = &rest[8..];
                if rest.len() < compressed_len {
                    return Err(Error::invalid_data("truncated hadoop-snappy block"));
                }
                let block = decoder
                    .decompress_vec(&rest[..compressed_len])
                    .map_err(|e| Error::invalid_data(format!("snappy decompress: {e}")))?;
                if block.len() != uncompressed_len {
                    return Err(Error::invalid_data(
                        "hadoop-snappy block length does not match its header",
                    ));
                }
                out.extend_from_slice(&block);
                rest = &rest[compressed_len..];
            }
            out
        }
    };
    if out.len() != size {
        return Err(Error::invalid_data(format!(
            "uncompressed size mismatch: expected {size}, got {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Reads one compressed section back as a stream of uncompressed bytes.
pub struct Decompressor {
    reader: ChainReader,
}

impl Decompressor {
    pub fn new(compressed: Chain, compression: CompressionType) -> Result<Self> {
        if compression == CompressionType::None {
            return Ok(Self {
                reader: ChainReader::new(compressed),
            });
        }
        let mut src = ChainReader::new(compressed);
        let size = reclog_bytes::varint_io::read_varint64(&mut src)
            .map_err(|_| Error::invalid_data("reading uncompressed size failed"))?;
        let mut body = Chain::new();
        let remaining = src.size()? - src.pos();
        src.read_chain(remaining, &mut body)?;
        let decompressed = decompress_all(&body.flatten(), compression, size)?;
        Ok(Self {
            reader: ChainReader::new(Chain::from_block(Bytes::from(decompressed))),
        })
    }

    /// The reader over the uncompressed bytes.
    pub fn reader(&mut self) -> &mut ChainReader {
        &mut self.reader
    }

    /// Fails unless the uncompressed stream was fully consumed.
    pub fn verify_end(mut self) -> Result<()> {
        self.reader.verify_end()
    }
}
