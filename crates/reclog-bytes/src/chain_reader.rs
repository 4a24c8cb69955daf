//! Reader over a Chain
//!
//! The window is the current block of the chain - reading within one block
//! is zero-copy. When a `pull` asks for more contiguous bytes than the
//! current block still holds, the requested range is assembled into a
//! scratch window covering the same logical range; callers cannot tell the
//! difference (same bytes, same positions), scratch is purely a detail of
//! how a contiguous view is produced over fragmented storage.
//!
//! Whole-range operations (`read_chain`, `copy_to`) bypass the window and
//! share blocks with the source chain.

use crate::reader::Reader;
use crate::writer::Writer;
use bytes::Bytes;
use reclog_core::{Chain, Result};

pub struct ChainReader {
    chain: Chain,
    /// Current window: either one block of `chain` or a scratch assembly.
    window: Bytes,
    /// Logical position of `window[0]`.
    window_start: u64,
    /// Next unread byte within `window`.
    cursor: usize,
    /// Block index and start position of the block the window came from;
    /// keeps sequential refills linear in total size.
    block_hint: (usize, u64),
}

impl ChainReader {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            window: Bytes::new(),
            window_start: 0,
            cursor: 0,
            block_hint: (0, 0),
        }
    }

    /// The underlying chain.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    fn remaining(&self) -> u64 {
        self.chain.len() - self.pos()
    }

    /// Drops the window so the next access recomputes it at `pos`.
    fn reset_window_at(&mut self, pos: u64) {
        self.window = Bytes::new();
        self.window_start = pos;
        self.cursor = 0;
        if pos < self.block_hint.1 {
            self.block_hint = (0, 0);
        }
    }

    /// Finds the block containing `pos` and its start position. `pos` must
    /// be within the chain.
    fn find_block(&mut self, pos: u64) -> (usize, u64) {
        let (mut index, mut start) = self.block_hint;
        if pos < start {
            index = 0;
            start = 0;
        }
        let blocks: Vec<u64> = self
            .chain
            .blocks()
            .skip(index)
            .map(|b| b.len() as u64)
            .collect();
        for len in blocks {
            if pos < start + len {
                break;
            }
            start += len;
            index += 1;
        }
        self.block_hint = (index, start);
        (index, start)
    }
}

impl Reader for ChainReader {
    fn pos(&self) -> u64 {
        self.window_start + self.cursor as u64
    }

    fn buffer(&self) -> &[u8] {
        &self.window[self.cursor..]
    }

    fn consume(&mut self, len: usize) {
        assert!(
            len <= self.window.len() - self.cursor,
            "consume past the window: {len} > {}",
            self.window.len() - self.cursor
        );
        self.cursor += len;
    }

    fn pull(&mut self, min_len: usize, recommended_len: usize) -> Result<bool> {
        if self.window.len() - self.cursor >= min_len {
            return Ok(true);
        }
        let pos = self.pos();
        let remaining = self.chain.len() - pos;
        if remaining == 0 {
            self.reset_window_at(pos);
            return Ok(min_len == 0);
        }
        let (index, block_start) = self.find_block(pos);
        let block = self
            .chain
            .blocks()
            .nth(index)
            .expect("position within chain has a block")
            .clone();
        let within = (pos - block_start) as usize;
        if block.len() - within >= min_len || index + 1 == self.chain.num_blocks() {
            // The current (or last) block is the window; no assembly needed.
            self.window_start = block_start;
            self.cursor = within;
            let enough = block.len() - within >= min_len;
            self.window = block;
            return Ok(enough);
        }
        // Scratch: assemble a contiguous window spanning blocks.
        let want = (min_len.max(recommended_len) as u64).min(remaining);
        self.window = Bytes::from(self.chain.subrange(pos, want).to_vec());
        self.window_start = pos;
        self.cursor = 0;
        Ok(want >= min_len as u64)
    }

    fn read_chain(&mut self, len: u64, dest: &mut Chain) -> Result<bool> {
        let pos = self.pos();
        let take = len.min(self.remaining());
        dest.append_chain(self.chain.subrange(pos, take));
        self.reset_window_at(pos + take);
        Ok(take == len)
    }

    fn copy_to(&mut self, len: u64, dest: &mut dyn Writer) -> Result<bool> {
        let pos = self.pos();
        let take = len.min(self.remaining());
        dest.write_chain(&self.chain.subrange(pos, take))?;
        self.reset_window_at(pos + take);
        Ok(take == len)
    }

    fn seek(&mut self, new_pos: u64) -> Result<bool> {
        let clamped = new_pos.min(self.chain.len());
        self.reset_window_at(clamped);
        Ok(new_pos <= self.chain.len())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.chain.len())
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn supports_rewind(&self) -> bool {
        true
    }

    fn supports_size(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragmented(parts: &[&[u8]]) -> ChainReader {
        let mut chain = Chain::new();
        for part in parts {
            chain.append(Bytes::copy_from_slice(part));
        }
        ChainReader::new(chain)
    }

    // ---------------------------------------------------------------
    // Window behavior
    // ---------------------------------------------------------------

    #[test]
    fn test_read_within_block_is_window_direct() {
        let mut reader = fragmented(&[b"abcdef"]);
        assert!(reader.pull(3, 3).unwrap());
        assert_eq!(&reader.buffer()[..3], b"abc");
        reader.consume(3);
        assert_eq!(reader.pos(), 3);
        assert_eq!(reader.buffer(), b"def");
    }

    #[test]
    fn test_pull_across_blocks_uses_scratch() {
        let mut reader = fragmented(&[b"ab", b"cd", b"ef"]);
        reader.consume(0);
        assert!(reader.pull(5, 5).unwrap());
        assert!(reader.available() >= 5);
        assert_eq!(&reader.buffer()[..5], b"abcde");
        reader.consume(5);
        assert_eq!(reader.pos(), 5);
        // Back on plain block windows afterwards.
        assert!(reader.pull(1, 1).unwrap());
        assert_eq!(reader.buffer(), b"f");
    }

    #[test]
    fn test_scratch_is_transparent() {
        // Reading the same stream with and without boundary-spanning pulls
        // yields identical bytes and positions.
        let mut direct = fragmented(&[b"hello world, hello records"]);
        let mut split = fragmented(&[b"hello", b" world", b", hel", b"lo rec", b"ords"]);
        let mut a = [0u8; 26];
        let mut b = [0u8; 26];
        assert!(direct.read(&mut a).unwrap());
        for chunk in b.chunks_mut(7) {
            assert!(split.pull(chunk.len(), chunk.len()).unwrap());
            assert!(split.read(chunk).unwrap());
        }
        assert_eq!(a, b);
        assert_eq!(direct.pos(), split.pos());
    }

    #[test]
    fn test_pull_more_than_remaining() {
        let mut reader = fragmented(&[b"ab", b"cd"]);
        assert!(!reader.pull(5, 5).unwrap());
        assert_eq!(reader.buffer(), b"abcd");
        assert!(reader.pull(4, 4).unwrap());
    }

    #[test]
    fn test_pull_at_eof() {
        let mut reader = fragmented(&[b"ab"]);
        assert!(reader.skip(2).unwrap());
        assert!(!reader.pull(1, 1).unwrap());
        assert_eq!(reader.pos(), 2);
        reader.verify_end().unwrap();
    }

    // ---------------------------------------------------------------
    // Whole-range operations
    // ---------------------------------------------------------------

    #[test]
    fn test_read_chain_shares_blocks() {
        let mut reader = fragmented(&[b"abc", b"defgh"]);
        let mut out = Chain::new();
        assert!(reader.read_chain(6, &mut out).unwrap());
        assert_eq!(out.to_vec(), b"abcdef");
        assert_eq!(reader.pos(), 6);
    }

    #[test]
    fn test_read_chain_past_end() {
        let mut reader = fragmented(&[b"abc"]);
        let mut out = Chain::new();
        assert!(!reader.read_chain(5, &mut out).unwrap());
        assert_eq!(out.to_vec(), b"abc");
        assert_eq!(reader.pos(), 3);
    }

    #[test]
    fn test_read_byte_sequence() {
        let mut reader = fragmented(&[b"a", b"b"]);
        assert_eq!(reader.read_byte().unwrap(), Some(b'a'));
        assert_eq!(reader.read_byte().unwrap(), Some(b'b'));
        assert_eq!(reader.read_byte().unwrap(), None);
    }

    // ---------------------------------------------------------------
    // Seeking
    // ---------------------------------------------------------------

    #[test]
    fn test_seek_forward_and_back() {
        let mut reader = fragmented(&[b"abcd", b"efgh"]);
        assert!(reader.seek(6).unwrap());
        assert_eq!(reader.read_byte().unwrap(), Some(b'g'));
        assert!(reader.seek(1).unwrap());
        assert_eq!(reader.read_byte().unwrap(), Some(b'b'));
    }

    #[test]
    fn test_seek_past_end() {
        let mut reader = fragmented(&[b"abcd"]);
        assert!(!reader.seek(10).unwrap());
        assert_eq!(reader.pos(), 4);
    }

    #[test]
    fn test_size() {
        let mut reader = fragmented(&[b"abc", b"de"]);
        assert_eq!(reader.size().unwrap(), 5);
        assert!(reader.supports_random_access());
    }

    #[test]
    fn test_empty_chain() {
        let mut reader = ChainReader::new(Chain::new());
        assert!(!reader.pull(1, 1).unwrap());
        assert_eq!(reader.read_byte().unwrap(), None);
        assert_eq!(reader.size().unwrap(), 0);
        reader.verify_end().unwrap();
    }
}
