//! Writer into a Vec
//!
//! The simplest sink: everything is copied into one growable allocation.
//! Supports random access, which makes it the in-memory stand-in for a
//! seekable file in tests.

use crate::writer::{FlushType, Writer};
use reclog_core::{Error, Result};

#[derive(Default)]
pub struct VecWriter {
    dest: Vec<u8>,
    cursor: usize,
}

impl VecWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.dest
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.dest
    }
}

impl Writer for VecWriter {
    fn pos(&self) -> u64 {
        self.cursor as u64
    }

    fn write(&mut self, src: &[u8]) -> Result<()> {
        if self.cursor == self.dest.len() {
            self.dest.extend_from_slice(src);
        } else {
            let overlap = (self.dest.len() - self.cursor).min(src.len());
            self.dest[self.cursor..self.cursor + overlap].copy_from_slice(&src[..overlap]);
            self.dest.extend_from_slice(&src[overlap..]);
        }
        self.cursor += src.len();
        Ok(())
    }

    fn flush(&mut self, _flush_type: FlushType) -> Result<()> {
        Ok(())
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn seek(&mut self, new_pos: u64) -> Result<()> {
        if new_pos > self.dest.len() as u64 {
            return Err(Error::out_of_range(format!(
                "seek to {new_pos} past end of sink of size {}",
                self.dest.len()
            )));
        }
        self.cursor = new_pos as usize;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.dest.len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        if new_size > self.dest.len() as u64 {
            return Err(Error::out_of_range(format!(
                "truncate to {new_size} past end of sink of size {}",
                self.dest.len()
            )));
        }
        self.dest.truncate(new_size as usize);
        self.cursor = self.cursor.min(self.dest.len());
        Ok(())
    }
}
