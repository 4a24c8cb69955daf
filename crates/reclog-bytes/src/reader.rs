//! The Reader Trait - Cursor-protocol Byte Source
//!
//! A `Reader` exposes a window of already-buffered bytes plus a position in
//! the logical stream. Callers read the window directly (`buffer()` /
//! `consume()`), and call `pull()` only when they need more than is
//! buffered, so per-byte costs stay out of the common path.
//!
//! ## EOF vs failure
//!
//! Operations that can hit end-of-stream return `Result<bool>`:
//! - `Ok(true)`  - the request was satisfied in full
//! - `Ok(false)` - the source ended first; the position truthfully reflects
//!   how far reading got, which is what truncation detection needs
//! - `Err(_)`    - an environmental or parse failure
//!
//! ## Capabilities
//!
//! `supports_random_access` / `supports_rewind` / `supports_size` default
//! to false; backends opt in. `seek` on a non-seekable source still accepts
//! forward targets (it skips).

use crate::backward_writer::BackwardWriter;
use crate::writer::Writer;
use reclog_core::{Chain, Error, Result};

pub trait Reader {
    /// Position of the next byte to be read, in the logical stream.
    fn pos(&self) -> u64;

    /// The unread part of the in-memory window. May be empty even when the
    /// stream has more data; `pull` refills it.
    fn buffer(&self) -> &[u8];

    /// Consumes `len` bytes of `buffer()`.
    ///
    /// # Panics
    ///
    /// Panics if `len > buffer().len()`.
    fn consume(&mut self, len: usize);

    /// Ensures at least `min_len` bytes are buffered, reading further ahead
    /// up to `recommended_len` when that is free. Returns `Ok(false)` if the
    /// source ends before `min_len` bytes are available; whatever remains is
    /// still buffered.
    fn pull(&mut self, min_len: usize, recommended_len: usize) -> Result<bool>;

    /// Bytes currently available in the window.
    fn available(&self) -> usize {
        self.buffer().len()
    }

    /// Reads one byte; `Ok(None)` at end of stream.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.available() == 0 && !self.pull(1, 1)? {
            return Ok(None);
        }
        let byte = self.buffer()[0];
        self.consume(1);
        Ok(Some(byte))
    }

    /// Reads exactly `dest.len()` bytes into `dest`.
    fn read(&mut self, dest: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < dest.len() {
            if self.available() == 0 && !self.pull(1, dest.len() - filled)? {
                return Ok(false);
            }
            let take = self.available().min(dest.len() - filled);
            dest[filled..filled + take].copy_from_slice(&self.buffer()[..take]);
            self.consume(take);
            filled += take;
        }
        Ok(true)
    }

    /// Reads `len` bytes, appending them to `dest`. Chain-backed readers
    /// override this to share blocks instead of copying.
    fn read_chain(&mut self, len: u64, dest: &mut Chain) -> Result<bool> {
        let mut remaining = len;
        while remaining > 0 {
            if self.available() == 0 {
                let want = remaining.min(1 << 16) as usize;
                if !self.pull(1, want)? {
                    return Ok(false);
                }
            }
            let take = (self.available() as u64).min(remaining) as usize;
            dest.append_slice(&self.buffer()[..take]);
            self.consume(take);
            remaining -= take as u64;
        }
        Ok(true)
    }

    /// Copies `len` bytes to a writer.
    fn copy_to(&mut self, len: u64, dest: &mut dyn Writer) -> Result<bool> {
        let mut remaining = len;
        while remaining > 0 {
            if self.available() == 0 {
                let want = remaining.min(1 << 16) as usize;
                if !self.pull(1, want)? {
                    return Ok(false);
                }
            }
            let take = (self.available() as u64).min(remaining) as usize;
            dest.write(&self.buffer()[..take])?;
            self.consume(take);
            remaining -= take as u64;
        }
        Ok(true)
    }

    /// Copies `len` bytes to a backward writer, preserving their order.
    fn copy_to_backward(&mut self, len: usize, dest: &mut dyn BackwardWriter) -> Result<bool> {
        // The bytes must land as one prepended unit, so they are gathered
        // first.
        let mut gathered = Chain::new();
        if !self.read_chain(len as u64, &mut gathered)? {
            return Ok(false);
        }
        dest.write_chain(&gathered)?;
        Ok(true)
    }

    /// Skips `len` bytes.
    fn skip(&mut self, len: u64) -> Result<bool> {
        let mut remaining = len;
        while remaining > 0 {
            if self.available() == 0 {
                let want = remaining.min(1 << 16) as usize;
                if !self.pull(1, want)? {
                    return Ok(false);
                }
            }
            let take = (self.available() as u64).min(remaining) as usize;
            self.consume(take);
            remaining -= take as u64;
        }
        Ok(true)
    }

    /// Moves to an absolute position. Returns `Ok(false)` when the source
    /// ends before `new_pos` (the position is then the end). Sources without
    /// random access accept only forward targets.
    fn seek(&mut self, new_pos: u64) -> Result<bool> {
        let pos = self.pos();
        if new_pos >= pos {
            return self.skip(new_pos - pos);
        }
        Err(Error::unsupported(format!(
            "cannot seek backwards from {pos} to {new_pos} on this source"
        )))
    }

    /// Total stream size, where the backend knows it.
    fn size(&mut self) -> Result<u64> {
        Err(Error::unsupported("stream size not available"))
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn supports_rewind(&self) -> bool {
        false
    }

    fn supports_size(&self) -> bool {
        false
    }

    /// Fails unless the stream ends exactly at the current position.
    fn verify_end(&mut self) -> Result<()> {
        if self.pull(1, 1)? {
            return Err(Error::invalid_data(format!(
                "end of data expected at position {}",
                self.pos()
            )));
        }
        Ok(())
    }
}

impl<R: Reader + ?Sized> Reader for &mut R {
    fn pos(&self) -> u64 {
        (**self).pos()
    }

    fn buffer(&self) -> &[u8] {
        (**self).buffer()
    }

    fn consume(&mut self, len: usize) {
        (**self).consume(len)
    }

    fn pull(&mut self, min_len: usize, recommended_len: usize) -> Result<bool> {
        (**self).pull(min_len, recommended_len)
    }

    fn read_chain(&mut self, len: u64, dest: &mut Chain) -> Result<bool> {
        (**self).read_chain(len, dest)
    }

    fn copy_to(&mut self, len: u64, dest: &mut dyn Writer) -> Result<bool> {
        (**self).copy_to(len, dest)
    }

    fn seek(&mut self, new_pos: u64) -> Result<bool> {
        (**self).seek(new_pos)
    }

    fn size(&mut self) -> Result<u64> {
        (**self).size()
    }

    fn supports_random_access(&self) -> bool {
        (**self).supports_random_access()
    }

    fn supports_rewind(&self) -> bool {
        (**self).supports_rewind()
    }

    fn supports_size(&self) -> bool {
        (**self).supports_size()
    }
}
