//! Backward Writer into a Chain
//!
//! Builds a chain back to front. One block is filled from its end towards
//! its start; when it fills up (or a larger contiguous slot is needed) the
//! filled part is sealed off and prepended to the chain, and filling
//! continues in a fresh block.
//!
//! The region below the fill point is untouched, zero-initialized memory,
//! which is what lets `prepend_slot` hand out pre-zeroed slices and
//! `write_zeros` just move the fill point.
//!
//! A size hint sizes the first block; the chunk decoders know the decoded
//! size up front, so decoding a whole chunk lands in a single allocation.

use crate::backward_writer::BackwardWriter;
use bytes::BytesMut;
use reclog_core::{Chain, Result};

/// Size of freshly allocated blocks when no hint applies.
const BLOCK_SIZE: usize = 4096;

pub struct ChainBackwardWriter {
    /// Sealed blocks; a suffix of the final output.
    dest: Chain,
    /// Current block, filled from the end. `buf[front..]` is written,
    /// `buf[..front]` is pristine zeros.
    buf: BytesMut,
    front: usize,
    written: u64,
}

impl Default for ChainBackwardWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBackwardWriter {
    pub fn new() -> Self {
        Self {
            dest: Chain::new(),
            buf: BytesMut::new(),
            front: 0,
            written: 0,
        }
    }

    /// Pre-sizes the first block for an expected total size.
    pub fn with_size_hint(size_hint: usize) -> Self {
        let capacity = size_hint.min(1 << 26);
        Self {
            dest: Chain::new(),
            buf: BytesMut::zeroed(capacity),
            front: capacity,
            written: 0,
        }
    }

    /// Seals `buf[front..]` onto the front of the chain. The zeroed region
    /// below `front` stays available for further writes.
    fn seal(&mut self) {
        if self.front < self.buf.len() {
            let sealed = self.buf.split_off(self.front).freeze();
            self.dest.prepend(sealed);
        }
    }

    /// Replaces the current block with a fresh zeroed one of at least
    /// `min_len` bytes. Any unfilled remainder of the old block is dropped.
    fn grow(&mut self, min_len: usize) {
        self.seal();
        let capacity = BLOCK_SIZE.max(min_len);
        self.buf = BytesMut::zeroed(capacity);
        self.front = capacity;
    }

    /// Finishes writing and returns the chain.
    pub fn into_chain(mut self) -> Chain {
        self.seal();
        self.dest
    }
}

impl BackwardWriter for ChainBackwardWriter {
    fn pos(&self) -> u64 {
        self.written
    }

    fn write(&mut self, src: &[u8]) -> Result<()> {
        self.written += src.len() as u64;
        let mut rest = src;
        while !rest.is_empty() {
            if self.front == 0 {
                self.grow(rest.len());
            }
            let take = rest.len().min(self.front);
            let (head, tail) = rest.split_at(rest.len() - take);
            self.buf[self.front - take..self.front].copy_from_slice(tail);
            self.front -= take;
            rest = head;
        }
        Ok(())
    }

    fn prepend_slot(&mut self, len: usize) -> Result<&mut [u8]> {
        if self.front < len {
            self.grow(len);
        }
        self.front -= len;
        self.written += len as u64;
        Ok(&mut self.buf[self.front..self.front + len])
    }

    fn write_chain(&mut self, src: &Chain) -> Result<()> {
        if src.len() as usize > crate::writer::MAX_BYTES_TO_COPY {
            self.seal();
            self.written += src.len();
            self.dest.prepend_chain(src.clone());
            return Ok(());
        }
        let blocks: Vec<_> = src.blocks().collect();
        for block in blocks.into_iter().rev() {
            self.write(block)?;
        }
        Ok(())
    }

    fn write_zeros(&mut self, len: u64) -> Result<()> {
        let mut remaining = len;
        self.written += len;
        while remaining > 0 {
            if self.front == 0 {
                self.grow(remaining.min(1 << 20) as usize);
            }
            let take = (self.front as u64).min(remaining) as usize;
            // buf[..front] is already zeros.
            self.front -= take;
            remaining -= take as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_appear_in_reverse_order() {
        let mut writer = ChainBackwardWriter::new();
        writer.write(b"world").unwrap();
        writer.write(b"hello ").unwrap();
        assert_eq!(writer.pos(), 11);
        assert_eq!(writer.into_chain().to_vec(), b"hello world");
    }

    #[test]
    fn test_two_writes_compose() {
        let mut writer = ChainBackwardWriter::new();
        writer.write(b"a").unwrap();
        writer.write(b"b").unwrap();
        assert_eq!(writer.into_chain().to_vec(), b"ba");
    }

    #[test]
    fn test_write_larger_than_block() {
        let big = vec![9u8; BLOCK_SIZE * 3 + 17];
        let mut writer = ChainBackwardWriter::new();
        writer.write(b"tail").unwrap();
        writer.write(&big).unwrap();
        writer.write(b"head").unwrap();
        let mut expected = b"head".to_vec();
        expected.extend_from_slice(&big);
        expected.extend_from_slice(b"tail");
        assert_eq!(writer.into_chain().to_vec(), expected);
    }

    #[test]
    fn test_prepend_slot_composes_in_place() {
        let mut writer = ChainBackwardWriter::new();
        writer.write(b" payload").unwrap();
        let slot = writer.prepend_slot(3).unwrap();
        assert!(slot.iter().all(|&b| b == 0));
        slot.copy_from_slice(b"tag");
        assert_eq!(writer.pos(), 11);
        assert_eq!(writer.into_chain().to_vec(), b"tag payload");
    }

    #[test]
    fn test_prepend_slot_larger_than_remaining_space() {
        let mut writer = ChainBackwardWriter::with_size_hint(4);
        writer.write(b"abcd").unwrap();
        let slot = writer.prepend_slot(10).unwrap();
        slot.copy_from_slice(b"0123456789");
        assert_eq!(writer.into_chain().to_vec(), b"0123456789abcd");
    }

    #[test]
    fn test_write_zeros() {
        let mut writer = ChainBackwardWriter::new();
        writer.write(b"end").unwrap();
        writer.write_zeros(BLOCK_SIZE as u64 + 100).unwrap();
        writer.write(b"start").unwrap();
        let out = writer.into_chain().to_vec();
        assert_eq!(&out[..5], b"start");
        assert!(out[5..5 + BLOCK_SIZE + 100].iter().all(|&b| b == 0));
        assert_eq!(&out[5 + BLOCK_SIZE + 100..], b"end");
    }

    #[test]
    fn test_write_chain_shares_large_blocks() {
        let mut writer = ChainBackwardWriter::new();
        writer.write(b"tail").unwrap();
        let big = Chain::from(vec![5u8; 10_000]);
        writer.write_chain(&big).unwrap();
        writer.write(b"head").unwrap();
        let chain = writer.into_chain();
        assert_eq!(chain.len(), 10_008);
        assert!(chain.blocks().any(|b| b.len() == 10_000));
        let out = chain.to_vec();
        assert_eq!(&out[..4], b"head");
        assert_eq!(&out[10_004..], b"tail");
    }

    #[test]
    fn test_size_hint_single_allocation() {
        let mut writer = ChainBackwardWriter::with_size_hint(64);
        for chunk in [&b"ghi"[..], b"def", b"abc"] {
            writer.write(chunk).unwrap();
        }
        let chain = writer.into_chain();
        assert_eq!(chain.to_vec(), b"abcdefghi");
        assert_eq!(chain.num_blocks(), 1);
    }

    #[test]
    fn test_empty() {
        let writer = ChainBackwardWriter::new();
        assert_eq!(writer.pos(), 0);
        assert!(writer.into_chain().is_empty());
    }
}
