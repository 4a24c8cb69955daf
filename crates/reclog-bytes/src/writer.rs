//! The Writer Trait - Byte Sink with an Explicit Flush Ladder
//!
//! Writers accept slices and chains. `write_chain` is ownership-aware: a
//! sink that stores chains (`ChainWriter`) splices large inputs as shared
//! blocks, while byte-stream sinks copy. `MAX_BYTES_TO_COPY` is the
//! threshold below which copying beats sharing; it is a performance knob,
//! not part of the file format.
//!
//! ## Flush levels
//!
//! Strictly ordered in guarantee:
//! - `FromObject`: data leaves this writer's own buffers. Enough when the
//!   sink object itself is what the next reader will look at.
//! - `FromProcess`: additionally pushed to the operating system, so another
//!   process opening the file afterwards sees it.
//! - `FromMachine`: additionally made durable against power loss (fsync).
//!
//! A backend that cannot honor a level degrades to the strongest one it can.

use reclog_core::{Chain, Error, Result};

/// Writes of at most this many bytes are copied into the sink's buffer even
/// when the sink could share the allocation instead.
pub const MAX_BYTES_TO_COPY: usize = 255;

/// How far a flush must propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlushType {
    FromObject,
    FromProcess,
    FromMachine,
}

pub trait Writer {
    /// Position of the next byte to be written, in the logical stream.
    fn pos(&self) -> u64;

    /// Writes all of `src`.
    fn write(&mut self, src: &[u8]) -> Result<()>;

    /// Writes the content of a chain. Sinks that can adopt blocks override
    /// this; the default copies block by block.
    fn write_chain(&mut self, src: &Chain) -> Result<()> {
        for block in src.blocks() {
            self.write(block)?;
        }
        Ok(())
    }

    /// Writes `len` zero bytes.
    fn write_zeros(&mut self, len: u64) -> Result<()> {
        const ZEROS: &[u8] = &[0u8; 4096];
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(ZEROS.len() as u64) as usize;
            self.write(&ZEROS[..take])?;
            remaining -= take as u64;
        }
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    /// True when producers should hand this sink copies rather than shared
    /// blocks (byte-stream sinks copy anyway, so sharing only adds refcount
    /// traffic).
    fn prefers_copying(&self) -> bool {
        true
    }

    fn flush(&mut self, flush_type: FlushType) -> Result<()> {
        let _ = flush_type;
        Ok(())
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn seek(&mut self, new_pos: u64) -> Result<()> {
        Err(Error::unsupported(format!(
            "cannot seek to {new_pos} on this sink"
        )))
    }

    fn size(&mut self) -> Result<u64> {
        Err(Error::unsupported("sink size not available"))
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        Err(Error::unsupported(format!(
            "cannot truncate to {new_size} on this sink"
        )))
    }
}

impl<W: Writer + ?Sized> Writer for &mut W {
    fn pos(&self) -> u64 {
        (**self).pos()
    }

    fn write(&mut self, src: &[u8]) -> Result<()> {
        (**self).write(src)
    }

    fn write_chain(&mut self, src: &Chain) -> Result<()> {
        (**self).write_chain(src)
    }

    fn write_zeros(&mut self, len: u64) -> Result<()> {
        (**self).write_zeros(len)
    }

    fn prefers_copying(&self) -> bool {
        (**self).prefers_copying()
    }

    fn flush(&mut self, flush_type: FlushType) -> Result<()> {
        (**self).flush(flush_type)
    }

    fn supports_random_access(&self) -> bool {
        (**self).supports_random_access()
    }

    fn seek(&mut self, new_pos: u64) -> Result<()> {
        (**self).seek(new_pos)
    }

    fn size(&mut self) -> Result<u64> {
        (**self).size()
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        (**self).truncate(new_size)
    }
}
