//! Reader over a Memory-mapped File
//!
//! Maps the whole file and serves it as flat memory. The mapping is adopted
//! as an external chain block, so ranges read out of it (and any chains
//! built from them) share the mapping, which is unmapped when the last
//! reference drops.

use crate::reader::Reader;
use crate::slice_reader::SliceReader;
use crate::writer::Writer;
use bytes::Bytes;
use memmap2::Mmap;
use reclog_core::{Chain, Error, Result};
use std::fs::File;
use std::path::Path;
use tracing::debug;

pub struct MmapReader {
    inner: SliceReader,
}

impl MmapReader {
    /// Maps an open file.
    pub fn new(file: &File) -> Result<Self> {
        let metadata = file.metadata().map_err(|e| Error::io("stat", e))?;
        if metadata.len() > usize::MAX as u64 {
            return Err(Error::out_of_range(format!(
                "file of {} bytes does not fit the address space",
                metadata.len()
            )));
        }
        // Safety: the mapping is read-only and its lifetime is tied to the
        // Bytes refcount; mutation of the underlying file while mapped is
        // outside this type's contract, as with any mmap-based reader.
        let mmap = unsafe { Mmap::map(file) }.map_err(|e| Error::io("mmap", e))?;
        debug!(len = mmap.len(), "mapped file");
        Ok(Self {
            inner: SliceReader::new(Bytes::from_owner(mmap)),
        })
    }

    /// Opens and maps `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io_at("open", path, e))?;
        Self::new(&file)
    }

    /// The mapped content as shared bytes.
    pub fn data(&self) -> &Bytes {
        self.inner.data()
    }
}

impl Reader for MmapReader {
    fn pos(&self) -> u64 {
        self.inner.pos()
    }

    fn buffer(&self) -> &[u8] {
        self.inner.buffer()
    }

    fn consume(&mut self, len: usize) {
        self.inner.consume(len)
    }

    fn pull(&mut self, min_len: usize, recommended_len: usize) -> Result<bool> {
        self.inner.pull(min_len, recommended_len)
    }

    fn read_chain(&mut self, len: u64, dest: &mut Chain) -> Result<bool> {
        self.inner.read_chain(len, dest)
    }

    fn copy_to(&mut self, len: u64, dest: &mut dyn Writer) -> Result<bool> {
        self.inner.copy_to(len, dest)
    }

    fn seek(&mut self, new_pos: u64) -> Result<bool> {
        self.inner.seek(new_pos)
    }

    fn size(&mut self) -> Result<u64> {
        self.inner.size()
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
