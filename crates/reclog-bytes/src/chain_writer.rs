//! Writer into a Chain
//!
//! Small writes accumulate in a mutable tail block; large or already-shared
//! inputs become blocks of the chain without copying. This is the sink the
//! chunk encoders write into.

use crate::writer::{FlushType, Writer, MAX_BYTES_TO_COPY};
use bytes::BytesMut;
use reclog_core::{Chain, Result};

/// Size of freshly allocated tail blocks.
const TAIL_BLOCK_SIZE: usize = 4096;

#[derive(Default)]
pub struct ChainWriter {
    dest: Chain,
    tail: BytesMut,
}

impl ChainWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes the first tail block for an expected total size.
    pub fn with_size_hint(size_hint: usize) -> Self {
        Self {
            dest: Chain::new(),
            tail: BytesMut::with_capacity(size_hint.min(1 << 20)),
        }
    }

    fn seal_tail(&mut self) {
        if !self.tail.is_empty() {
            self.dest.append(self.tail.split().freeze());
        }
    }

    /// Finishes writing and returns the accumulated chain.
    pub fn into_chain(mut self) -> Chain {
        self.seal_tail();
        self.dest
    }
}

impl Writer for ChainWriter {
    fn pos(&self) -> u64 {
        self.dest.len() + self.tail.len() as u64
    }

    fn write(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > MAX_BYTES_TO_COPY && self.tail.capacity() - self.tail.len() < src.len() {
            self.seal_tail();
            self.dest.append_slice(src);
            return Ok(());
        }
        if self.tail.capacity() == self.tail.len() {
            self.seal_tail();
            self.tail.reserve(TAIL_BLOCK_SIZE.max(src.len()));
        }
        self.tail.extend_from_slice(src);
        Ok(())
    }

    fn write_chain(&mut self, src: &Chain) -> Result<()> {
        if src.len() as usize <= MAX_BYTES_TO_COPY {
            for block in src.blocks() {
                self.write(block)?;
            }
            return Ok(());
        }
        self.seal_tail();
        self.dest.append_chain(src.clone());
        Ok(())
    }

    fn prefers_copying(&self) -> bool {
        false
    }

    fn flush(&mut self, _flush_type: FlushType) -> Result<()> {
        self.seal_tail();
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.pos())
    }
}
