//! Chunk Writer - Framing Chunks into Blocks
//!
//! Accepts whole chunks and writes them to a byte sink, inserting a block
//! header whenever the position crosses a 64 KiB boundary and zero-padding
//! each chunk to 8-byte alignment. The writer owns the position bookkeeping;
//! the sink only ever sees plain `write` calls.
//!
//! `pad_to_block_boundary` emits a padding chunk so that a following chunk
//! begins exactly at a block boundary, which makes files concatenable.

use crate::block::{
    is_block_boundary, is_possible_chunk_boundary, remaining_in_block, BlockHeader,
    USABLE_BLOCK_SIZE,
};
use crate::chunk::{Chunk, CHUNK_HEADER_SIZE};
use reclog_bytes::{FlushType, Writer};
use reclog_core::Result;
use tracing::trace;

pub struct ChunkWriter<W: Writer> {
    dest: W,
    pos: u64,
}

impl<W: Writer> ChunkWriter<W> {
    /// Starts writing at the sink's current position. A position that is
    /// not a possible chunk boundary (appending to a foreign tail) is
    /// zero-padded up to the next block boundary first.
    pub fn new(mut dest: W) -> Result<Self> {
        let mut pos = dest.pos();
        if !is_possible_chunk_boundary(pos) {
            let padding = remaining_in_block(pos);
            dest.write_zeros(padding)?;
            pos += padding;
        }
        Ok(Self { dest, pos })
    }

    /// Position of the next chunk to be written.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn dest(&mut self) -> &mut W {
        &mut self.dest
    }

    /// Writes one chunk, interleaving block headers and alignment padding.
    pub fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        debug_assert_eq!(
            chunk.header.data_hash(),
            reclog_core::hash::hash_chain(&chunk.data),
            "chunk data hash does not match its data"
        );
        let chunk_begin = self.pos;
        let chunk_end = chunk.header.chunk_end(chunk_begin);
        trace!(chunk_begin, chunk_end, chunk_type = chunk.header.chunk_type_byte(), "writing chunk");
        self.write_section(chunk.header.bytes(), chunk_begin, chunk_end)?;
        for block in chunk.data.blocks() {
            self.write_section(block, chunk_begin, chunk_end)?;
        }
        self.write_chunk_padding(chunk_begin, chunk_end)?;
        debug_assert_eq!(self.pos, chunk_end, "chunk framing ended off position");
        Ok(())
    }

    /// Pads with a padding chunk so the next chunk begins at a block
    /// boundary. When the remainder of the block cannot hold a chunk
    /// header, the padding spills into the next block.
    pub fn pad_to_block_boundary(&mut self) -> Result<()> {
        let mut length = remaining_in_block(self.pos);
        if length == 0 {
            return Ok(());
        }
        if length < CHUNK_HEADER_SIZE {
            length += USABLE_BLOCK_SIZE;
        }
        let chunk = Chunk::padding(length - CHUNK_HEADER_SIZE)?;
        self.write_chunk(&chunk)
    }

    pub fn flush(&mut self, flush_type: FlushType) -> Result<()> {
        self.dest.flush(flush_type)
    }

    /// Flushes and hands the sink back.
    pub fn close(mut self, flush_type: FlushType) -> Result<W> {
        self.dest.flush(flush_type)?;
        Ok(self.dest)
    }

    fn write_block_header(&mut self, chunk_begin: u64, chunk_end: u64) -> Result<()> {
        let header = BlockHeader::new(self.pos - chunk_begin, chunk_end - self.pos);
        self.dest.write(header.bytes())?;
        self.pos += header.bytes().len() as u64;
        Ok(())
    }

    fn write_section(&mut self, mut src: &[u8], chunk_begin: u64, chunk_end: u64) -> Result<()> {
        while !src.is_empty() {
            if is_block_boundary(self.pos) {
                self.write_block_header(chunk_begin, chunk_end)?;
            }
            let take = remaining_in_block(self.pos).min(src.len() as u64) as usize;
            self.dest.write(&src[..take])?;
            self.pos += take as u64;
            src = &src[take..];
        }
        Ok(())
    }

    fn write_chunk_padding(&mut self, chunk_begin: u64, chunk_end: u64) -> Result<()> {
        while self.pos < chunk_end {
            if is_block_boundary(self.pos) {
                self.write_block_header(chunk_begin, chunk_end)?;
            }
            let length = (chunk_end - self.pos).min(remaining_in_block(self.pos));
            self.dest.write_zeros(length)?;
            self.pos += length;
        }
        Ok(())
    }
}

/// Serializes a sequence of chunks to a byte vector; a convenience used by
/// tests and tools.
pub fn chunks_to_bytes(chunks: &[Chunk]) -> Result<Vec<u8>> {
    let mut writer = ChunkWriter::new(reclog_bytes::VecWriter::new())?;
    for chunk in chunks {
        writer.write_chunk(chunk)?;
    }
    Ok(writer.close(FlushType::FromObject)?.into_vec())
}
