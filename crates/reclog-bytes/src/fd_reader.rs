//! Buffered Reader over a File
//!
//! Bridges a `std::fs::File` to the cursor protocol with a single flat
//! buffer (64 KiB by default). Random-access capability is detected at open
//! time by probing the stream position - pipes and sockets fail the probe
//! and become sequential-only sources.
//!
//! ## Independent position
//!
//! With `independent_pos`, all reads use positioned I/O (`read_at`) and the
//! kernel offset of the descriptor is never touched, so several readers can
//! share one open file. Without it the descriptor's own offset belongs to
//! this reader for its lifetime.

use crate::reader::Reader;
use reclog_core::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default I/O buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct FdReaderOptions {
    /// Size of the read buffer.
    pub buffer_size: usize,
    /// Read via positioned I/O starting at this offset, leaving the shared
    /// descriptor offset alone.
    pub independent_pos: Option<u64>,
    /// Expected total read size; a small hint shrinks the buffer so short
    /// streams do not pay for a full one. Missing the hint only costs
    /// performance.
    pub size_hint: Option<u64>,
}

impl Default for FdReaderOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            independent_pos: None,
            size_hint: None,
        }
    }
}

pub struct FdReader {
    file: File,
    path: Option<PathBuf>,
    /// Buffered window; `buf[cursor..filled]` is unread.
    buf: Vec<u8>,
    filled: usize,
    cursor: usize,
    /// Stream position of `buf[0]`.
    window_start: u64,
    /// File offset of the next byte to fetch.
    read_pos: u64,
    independent: bool,
    random_access: bool,
}

impl FdReader {
    /// Wraps an already-open file. With `independent_pos` unset, reading
    /// starts at the descriptor's current offset.
    pub fn new(file: File, options: FdReaderOptions) -> Result<Self> {
        Self::with_path(file, None, options)
    }

    /// Opens `path` for reading.
    pub fn open(path: impl AsRef<Path>, options: FdReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io_at("open", path, e))?;
        Self::with_path(file, Some(path.to_path_buf()), options)
    }

    fn with_path(mut file: File, path: Option<PathBuf>, options: FdReaderOptions) -> Result<Self> {
        // A failing position probe means a pipe-like source.
        let probed = file.stream_position().ok();
        let random_access = probed.is_some();
        let start = match options.independent_pos {
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
        debug!(
            ?path,
            random_access,
            independent = options.independent_pos.is_some(),
            "opening file reader"
        );
        let buffer_size = match options.size_hint {
            Some(hint) => (options.buffer_size as u64).min(hint.max(1)) as usize,
            None => options.buffer_size,
        };
        Ok(Self {
            file,
            path,
            buf: vec![0u8; buffer_size.max(1)],
            filled: 0,
            cursor: 0,
            window_start: start,
            read_pos: start,
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

    fn fetch(&mut self) -> Result<usize> {
        let dest = &mut self.buf[self.filled..];
        loop {
            let read = if self.independent {
                use std::os::unix::fs::FileExt;
                self.file.read_at(dest, self.read_pos)
            } else {
                self.file.read(dest)
            };
            match read {
                Ok(n) => {
                    self.filled += n;
                    self.read_pos += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error("read", e)),
            }
        }
    }

    /// Drops buffered data and repositions the next fetch at `pos`.
    fn reset_window_at(&mut self, pos: u64) -> Result<()> {
        self.filled = 0;
        self.cursor = 0;
        self.window_start = pos;
        if !self.independent {
            self.file
                .seek(std::io::SeekFrom::Start(pos))
                .map_err(|e| self.io_error("seek", e))?;
        }
        self.read_pos = pos;
        Ok(())
    }
}

impl Reader for FdReader {
    fn pos(&self) -> u64 {
        self.window_start + self.cursor as u64
    }

    fn buffer(&self) -> &[u8] {
        &self.buf[self.cursor..self.filled]
    }

    fn consume(&mut self, len: usize) {
        assert!(
            len <= self.filled - self.cursor,
            "consume past the window: {len} > {}",
            self.filled - self.cursor
        );
        self.cursor += len;
    }

    fn pull(&mut self, min_len: usize, recommended_len: usize) -> Result<bool> {
        if self.filled - self.cursor >= min_len {
            return Ok(true);
        }
        // Realign the unread remainder to the front of the buffer.
        if self.cursor > 0 {
            self.buf.copy_within(self.cursor..self.filled, 0);
            self.window_start += self.cursor as u64;
            self.filled -= self.cursor;
            self.cursor = 0;
        }
        let want = min_len.max(recommended_len.min(self.buf.len()));
        if want > self.buf.len() {
            self.buf.resize(want, 0);
        }
        while self.filled < min_len {
            if self.fetch()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn seek(&mut self, new_pos: u64) -> Result<bool> {
        // A target inside the buffered window only moves the cursor.
        if new_pos >= self.window_start && new_pos <= self.window_start + self.filled as u64 {
            self.cursor = (new_pos - self.window_start) as usize;
            return Ok(true);
        }
        if !self.random_access {
            let pos = self.pos();
            if new_pos >= pos {
                return self.skip(new_pos - pos);
            }
            return Err(Error::unsupported(format!(
                "cannot seek backwards from {pos} to {new_pos} on a non-seekable source"
            )));
        }
        let size = self.size()?;
        let clamped = new_pos.min(size);
        self.reset_window_at(clamped)?;
        Ok(new_pos <= size)
    }

    fn size(&mut self) -> Result<u64> {
        if !self.random_access {
            return Err(Error::unsupported("size of a non-seekable source"));
        }
        let metadata = self
            .file
            .metadata()
            .map_err(|e| self.io_error("stat", e))?;
        Ok(metadata.len())
    }

    fn supports_random_access(&self) -> bool {
        self.random_access
    }

    fn supports_rewind(&self) -> bool {
        self.random_access
    }

    fn supports_size(&self) -> bool {
        self.random_access
    }
}

impl std::fmt::Debug for FdReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdReader")
            .field("path", &self.path)
            .field("pos", &self.pos())
            .field("random_access", &self.random_access)
            .finish()
    }
}
