//! Buffered Writer over a File
//!
//! A single flat buffer in front of a `std::fs::File`. Writes that would
//! need more than one buffer's worth of staging bypass the buffer and go to
//! the file directly, so bulk copies do not pay double.
//!
//! ## Flush levels
//!
//! - `FromObject` / `FromProcess`: the buffer is written out; the data is in
//!   the kernel, visible to any process that opens the file afterwards.
//! - `FromMachine`: additionally `fsync`s for durability across power loss.
//!
//! ## Independent position
//!
//! With `independent_pos`, writes use positioned I/O (`write_at`) and the
//! shared descriptor offset is never moved. Ordering between two writers on
//! the same file is not defined either way.

use crate::writer::{FlushType, Writer};
use reclog_core::{Error, Result};
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default I/O buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct FdWriterOptions {
    /// Size of the write buffer.
    pub buffer_size: usize,
    /// Write via positioned I/O starting at this offset.
    pub independent_pos: Option<u64>,
    /// Truncate the file on open.
    pub truncate: bool,
    /// Expected total write size; a small hint shrinks the buffer. Missing
    /// the hint only costs performance.
    pub size_hint: Option<u64>,
}

impl Default for FdWriterOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            independent_pos: None,
            truncate: false,
            size_hint: None,
        }
    }
}

pub struct FdWriter {
    file: File,
    path: Option<PathBuf>,
    buf: Vec<u8>,
    buffer_size: usize,
    /// File offset of `buf[0]` (the next flush target).
    start_pos: u64,
    independent: bool,
    random_access: bool,
}

impl FdWriter {
    /// Wraps an already-open file; writing starts at the descriptor's
    /// current offset (or `independent_pos`).
    pub fn new(file: File, options: FdWriterOptions) -> Result<Self> {
        Self::with_path(file, None, options)
    }

    /// Creates or opens `path` for writing.
    pub fn open(path: impl AsRef<Path>, options: FdWriterOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(options.truncate)
            .open(path)
            .map_err(|e| Error::io_at("open", path, e))?;
        Self::with_path(file, Some(path.to_path_buf()), options)
    }

    fn with_path(mut file: File, path: Option<PathBuf>, options: FdWriterOptions) -> Result<Self> {
        let probed = file.stream_position().ok();
        let random_access = probed.is_some();
        let start_pos = match options.independent_pos {
            Some(pos) => {
                if !random_access {
                    return Err(Error::unsupported(
                        "independent position requires a seekable file",
                    ));
                }
                pos
            }
            None => probed.unwrap_or(0),
        };
        debug!(?path, random_access, start_pos, "opening file writer");
        let buffer_size = match options.size_hint {
            Some(hint) => (options.buffer_size as u64).min(hint.max(1)) as usize,
            None => options.buffer_size,
        }
        .max(1);
        Ok(Self {
            file,
            path,
            buf: Vec::with_capacity(buffer_size),
            buffer_size,
            start_pos,
            independent: options.independent_pos.is_some(),
            random_access,
        })
    }

    fn io_error(&self, op: &'static str, source: std::io::Error) -> Error {
        match &self.path {
            Some(path) => Error::io_at(op, path.clone(), source),
            None => Error::io(op, source),
        }
    }

    fn write_direct(&mut self, src: &[u8]) -> Result<()> {
        if self.independent {
            use std::os::unix::fs::FileExt;
            self.file
                .write_all_at(src, self.start_pos)
                .map_err(|e| self.io_error("write", e))?;
        } else {
            self.file
                .write_all(src)
                .map_err(|e| self.io_error("write", e))?;
        }
        self.start_pos += src.len() as u64;
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let data = std::mem::take(&mut self.buf);
        let result = self.write_direct(&data);
        self.buf = data;
        self.buf.clear();
        result
    }

    /// Writes at least this long skip the buffer. With a partially filled
    /// buffer, staging would cost two flushes, so the bar is what still fits
    /// plus one full buffer.
    fn length_to_write_directly(&self) -> usize {
        if self.buf.is_empty() {
            self.buffer_size
        } else {
            (self.buffer_size - self.buf.len()) + self.buffer_size
        }
    }
}

impl Writer for FdWriter {
    fn pos(&self) -> u64 {
        self.start_pos + self.buf.len() as u64
    }

    fn write(&mut self, src: &[u8]) -> Result<()> {
        if src.len() >= self.length_to_write_directly() {
            self.flush_buffer()?;
            return self.write_direct(src);
        }
        if self.buf.len() + src.len() > self.buffer_size {
            self.flush_buffer()?;
        }
        self.buf.extend_from_slice(src);
        Ok(())
    }

    fn flush(&mut self, flush_type: FlushType) -> Result<()> {
        self.flush_buffer()?;
        if flush_type == FlushType::FromMachine {
            self.file
                .sync_all()
                .map_err(|e| self.io_error("fsync", e))?;
        }
        Ok(())
    }

    fn supports_random_access(&self) -> bool {
        self.random_access
    }

    fn seek(&mut self, new_pos: u64) -> Result<()> {
        if !self.random_access {
            return Err(Error::unsupported("cannot seek a non-seekable sink"));
        }
        self.flush_buffer()?;
        if !self.independent {
            self.file
                .seek(std::io::SeekFrom::Start(new_pos))
                .map_err(|e| self.io_error("seek", e))?;
        }
        self.start_pos = new_pos;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        if !self.random_access {
            return Err(Error::unsupported("size of a non-seekable sink"));
        }
        self.flush_buffer()?;
        let metadata = self
            .file
            .metadata()
            .map_err(|e| self.io_error("stat", e))?;
        Ok(metadata.len().max(self.pos()))
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        if !self.random_access {
            return Err(Error::unsupported("cannot truncate a non-seekable sink"));
        }
        self.flush_buffer()?;
        self.file
            .set_len(new_size)
            .map_err(|e| self.io_error("truncate", e))?;
        if self.start_pos > new_size {
            self.seek(new_size)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FdWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdWriter")
            .field("path", &self.path)
            .field("pos", &self.pos())
            .finish()
    }
}

impl Drop for FdWriter {
    fn drop(&mut self) {
        // Last-resort flush; errors surface only through an explicit flush.
        let _ = self.flush_buffer();
    }
}
