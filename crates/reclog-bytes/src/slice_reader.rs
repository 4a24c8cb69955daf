//! Reader over Flat Memory
//!
//! The whole source is one contiguous allocation (a `Bytes`), so the window
//! is always the entire remainder and `pull` never copies. Used for decoded
//! buffers, memory-mapped files and tests.

use crate::reader::Reader;
use crate::writer::Writer;
use bytes::Bytes;
use reclog_core::{Chain, Result};

pub struct SliceReader {
    data: Bytes,
    cursor: usize,
}

impl SliceReader {
    pub fn new(data: Bytes) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// The complete underlying data, independent of the cursor.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl Reader for SliceReader {
    fn pos(&self) -> u64 {
        self.cursor as u64
    }

    fn buffer(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    fn consume(&mut self, len: usize) {
        assert!(
            len <= self.data.len() - self.cursor,
            "consume past the end: {len} > {}",
            self.data.len() - self.cursor
        );
        self.cursor += len;
    }

    fn pull(&mut self, min_len: usize, _recommended_len: usize) -> Result<bool> {
        Ok(self.data.len() - self.cursor >= min_len)
    }

    fn read_chain(&mut self, len: u64, dest: &mut Chain) -> Result<bool> {
        let take = (len.min((self.data.len() - self.cursor) as u64)) as usize;
        dest.append(self.data.slice(self.cursor..self.cursor + take));
        self.cursor += take;
        Ok(take as u64 == len)
    }

    fn copy_to(&mut self, len: u64, dest: &mut dyn Writer) -> Result<bool> {
        let take = (len.min((self.data.len() - self.cursor) as u64)) as usize;
        if take > crate::writer::MAX_BYTES_TO_COPY && !dest.prefers_copying() {
            dest.write_chain(&Chain::from_block(
                self.data.slice(self.cursor..self.cursor + take),
            ))?;
        } else {
            dest.write(&self.data[self.cursor..self.cursor + take])?;
        }
        self.cursor += take;
        Ok(take as u64 == len)
    }

    fn seek(&mut self, new_pos: u64) -> Result<bool> {
        self.cursor = new_pos.min(self.data.len() as u64) as usize;
        Ok(new_pos <= self.data.len() as u64)
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
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
