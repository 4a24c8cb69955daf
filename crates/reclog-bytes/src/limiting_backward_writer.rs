//! Length-capped Backward Writer
//!
//! Wraps another backward writer and fails any write that would push the
//! total past a fixed limit. The chunk decoders wrap their destination in
//! one of these sized to the declared decoded size, so a corrupt chunk
//! cannot make a decoder allocate without bound.

use crate::backward_writer::BackwardWriter;
use reclog_core::{Chain, Error, Result};

pub struct LimitingBackwardWriter<'a> {
    dest: &'a mut dyn BackwardWriter,
    limit: u64,
}

impl<'a> LimitingBackwardWriter<'a> {
    /// Caps `dest` at `limit` bytes written through this wrapper, counting
    /// bytes already written to `dest`.
    pub fn new(dest: &'a mut dyn BackwardWriter, limit: u64) -> Self {
        Self { dest, limit }
    }

    fn check(&self, len: u64) -> Result<()> {
        if self.dest.pos() + len > self.limit {
            return Err(Error::resource_exhausted(format!(
                "write limit exceeded: {} + {len} > {}",
                self.dest.pos(),
                self.limit
            )));
        }
        Ok(())
    }
}

impl BackwardWriter for LimitingBackwardWriter<'_> {
    fn pos(&self) -> u64 {
        self.dest.pos()
    }

    fn write(&mut self, src: &[u8]) -> Result<()> {
        self.check(src.len() as u64)?;
        self.dest.write(src)
    }

    fn prepend_slot(&mut self, len: usize) -> Result<&mut [u8]> {
        self.check(len as u64)?;
        self.dest.prepend_slot(len)
    }

    fn write_chain(&mut self, src: &Chain) -> Result<()> {
        self.check(src.len())?;
        self.dest.write_chain(src)
    }

    fn write_zeros(&mut self, len: u64) -> Result<()> {
        self.check(len)?;
        self.dest.write_zeros(len)
    }
}
