//! Chain - Fragmented Byte Container
//!
//! A `Chain` is an ordered sequence of immutable, reference-counted byte
//! blocks. It is the buffer type the whole I/O stack is built on:
//!
//! - **O(1) append/prepend** of a block or another chain (no copying)
//! - **Zero-copy slicing**: `subrange` shares blocks with the source
//! - **Cheap clones**: blocks are `bytes::Bytes`, so a clone bumps refcounts
//! - **External memory**: a memory-mapped region adopted via
//!   `Bytes::from_owner` becomes an ordinary block and is released when the
//!   last chain referring to it drops
//!
//! Equality and ordering compare content, not block boundaries: two chains
//! holding the same bytes split differently are equal.
//!
//! Invariant: `len()` equals the sum of block lengths; an empty chain has no
//! blocks (blocks are never empty).

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

#[derive(Clone, Default)]
pub struct Chain {
    blocks: VecDeque<Bytes>,
    len: u64,
}

impl Chain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain holding one block.
    pub fn from_block(block: Bytes) -> Self {
        let mut chain = Chain::new();
        chain.append(block);
        chain
    }

    /// Creates a chain of `len` zero bytes.
    pub fn zeros(len: u64) -> Self {
        // Zero blocks share one static allocation for common sizes.
        const ZEROS: &[u8] = &[0u8; 4096];
        let mut chain = Chain::new();
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(ZEROS.len() as u64) as usize;
            chain.append(Bytes::from_static(&ZEROS[..take]));
            remaining -= take as u64;
        }
        chain
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a block; empty blocks are dropped.
    pub fn append(&mut self, block: Bytes) {
        if block.is_empty() {
            return;
        }
        self.len += block.len() as u64;
        self.blocks.push_back(block);
    }

    /// Prepends a block; empty blocks are dropped.
    pub fn prepend(&mut self, block: Bytes) {
        if block.is_empty() {
            return;
        }
        self.len += block.len() as u64;
        self.blocks.push_front(block);
    }

    /// Appends all blocks of `other`.
    pub fn append_chain(&mut self, other: Chain) {
        self.len += other.len;
        self.blocks.extend(other.blocks);
    }

    /// Prepends all blocks of `other`.
    pub fn prepend_chain(&mut self, other: Chain) {
        self.len += other.len;
        for block in other.blocks.into_iter().rev() {
            self.blocks.push_front(block);
        }
    }

    pub fn append_slice(&mut self, data: &[u8]) {
        self.append(Bytes::copy_from_slice(data));
    }

    /// Removes all blocks.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.len = 0;
    }

    /// Iterates over the blocks in order.
    pub fn blocks(&self) -> impl Iterator<Item = &Bytes> {
        self.blocks.iter()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the chain's bytes in `[offset, offset + len)`, sharing blocks
    /// with `self` wherever the range covers whole or partial blocks.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the end of the chain.
    pub fn subrange(&self, offset: u64, len: u64) -> Chain {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "subrange [{offset}, {offset}+{len}) out of bounds of chain of length {}",
            self.len
        );
        let mut result = Chain::new();
        if len == 0 {
            return result;
        }
        let mut skip = offset;
        let mut remaining = len;
        for block in &self.blocks {
            let block_len = block.len() as u64;
            if skip >= block_len {
                skip -= block_len;
                continue;
            }
            let start = skip as usize;
            let take = (block_len - skip).min(remaining) as usize;
            result.append(block.slice(start..start + take));
            remaining -= take as u64;
            skip = 0;
            if remaining == 0 {
                break;
            }
        }
        result
    }

    /// Returns the content as one contiguous `Bytes`, copying only when the
    /// chain has more than one block.
    pub fn flatten(&self) -> Bytes {
        match self.blocks.len() {
            0 => Bytes::new(),
            1 => self.blocks[0].clone(),
            _ => {
                let mut flat = BytesMut::with_capacity(self.len as usize);
                for block in &self.blocks {
                    flat.extend_from_slice(block);
                }
                flat.freeze()
            }
        }
    }

    /// Copies the content into a fresh `Vec`.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len as usize);
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }
}

impl PartialEq for Chain {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        // Compare content across differing block boundaries.
        let mut left = self.blocks.iter().map(|b| b.as_ref());
        let mut right = other.blocks.iter().map(|b| b.as_ref());
        let (mut a, mut b): (&[u8], &[u8]) = (&[], &[]);
        loop {
            if a.is_empty() {
                a = match left.next() {
                    Some(block) => block,
                    None => return b.is_empty() && right.next().is_none(),
                };
            }
            if b.is_empty() {
                b = match right.next() {
                    Some(block) => block,
                    None => return false,
                };
            }
            let common = a.len().min(b.len());
            if a[..common] != b[..common] {
                return false;
            }
            a = &a[common..];
            b = &b[common..];
        }
    }
}

impl Eq for Chain {}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.len)
            .field("num_blocks", &self.blocks.len())
            .finish()
    }
}

impl From<Bytes> for Chain {
    fn from(block: Bytes) -> Self {
        Chain::from_block(block)
    }
}

impl From<Vec<u8>> for Chain {
    fn from(data: Vec<u8>) -> Self {
        Chain::from_block(Bytes::from(data))
    }
}

impl From<&[u8]> for Chain {
    fn from(data: &[u8]) -> Self {
        Chain::from_block(Bytes::copy_from_slice(data))
    }
}
