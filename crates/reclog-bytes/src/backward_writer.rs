//! The BackwardWriter Trait - Byte Sink That Grows Towards the Front
//!
//! Successive writes appear in reverse call order in the output:
//! `write(a); write(b)` produces `b ++ a`. That is exactly the shape of
//! length-prefixed framing - write a body, then prepend its length - which
//! is why the transpose decoder and the chunk decoders are written against
//! this trait instead of simulating it with buffering.
//!
//! `prepend_slot` is the contiguous fast path: it reserves `len` bytes
//! immediately before the current front and hands them out as a mutable,
//! zero-initialized slice, so a caller can compose a tag and payload in
//! place without an intermediate buffer.

use reclog_core::{Chain, Result};

pub trait BackwardWriter {
    /// Number of bytes written so far.
    fn pos(&self) -> u64;

    /// Prepends all of `src` to the output.
    fn write(&mut self, src: &[u8]) -> Result<()>;

    /// Reserves `len` bytes directly before the current front and returns
    /// them for in-place filling. The slice starts out zeroed.
    fn prepend_slot(&mut self, len: usize) -> Result<&mut [u8]>;

    /// Prepends the content of a chain.
    fn write_chain(&mut self, src: &Chain) -> Result<()> {
        // Blocks must be prepended back to front so the chain's own order
        // is preserved in the output.
        let blocks: Vec<_> = src.blocks().collect();
        for block in blocks.into_iter().rev() {
            self.write(block)?;
        }
        Ok(())
    }

    /// Prepends `len` zero bytes.
    fn write_zeros(&mut self, len: u64) -> Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(4096) as usize;
            self.prepend_slot(take)?;
            remaining -= take as u64;
        }
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }
}

impl<W: BackwardWriter + ?Sized> BackwardWriter for &mut W {
    fn pos(&self) -> u64 {
        (**self).pos()
    }

    fn write(&mut self, src: &[u8]) -> Result<()> {
        (**self).write(src)
    }

    fn prepend_slot(&mut self, len: usize) -> Result<&mut [u8]> {
        (**self).prepend_slot(len)
    }

    fn write_chain(&mut self, src: &Chain) -> Result<()> {
        (**self).write_chain(src)
    }

    fn write_zeros(&mut self, len: u64) -> Result<()> {
        (**self).write_zeros(len)
    }
}
