//! Chunk Reader - Framing, Verification and Recovery
//!
//! Reads chunks back out of the block structure, verifying every hash on
//! the way: each block header crossed is checked against the chunk
//! boundaries it implies, the chunk header hash guards the header, the data
//! hash guards the payload.
//!
//! ## Failure and recovery
//!
//! A parse-level failure leaves the reader unhealthy with a sticky error
//! and a recovery plan:
//!
//! - `HaveChunk`: the damage is confined and the next chunk boundary is
//!   known (e.g. a data hash mismatch under a valid header). Recovery jumps
//!   straight there.
//! - `FindChunk`: the boundary itself is untrusted. Recovery walks forward
//!   block by block; the first block header that validates supplies the
//!   next chunk boundary.
//!
//! `recover` clears the failure and reports the skipped byte range with the
//! message that caused it. A truncated final chunk is not an error until
//! `close`, because the file may still be growing; if the source grows past
//! a previously observed end, reading resumes through the same recovery
//! path.

use crate::block::{
    distance_without_overhead, is_possible_chunk_boundary, remaining_in_block,
    remaining_in_block_header, round_down_to_block_boundary, BlockHeader, BLOCK_HEADER_SIZE,
    BLOCK_SIZE,
};
use crate::chunk::{Chunk, ChunkHeader, ChunkType, CHUNK_HEADER_SIZE};
use crate::skipped_region::SkippedRegion;
use reclog_bytes::Reader;
use reclog_core::{Chain, Error, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recoverable {
    No,
    /// Resync by scanning block headers forward from `recoverable_pos`.
    FindChunk,
    /// The next chunk boundary is `recoverable_pos`.
    HaveChunk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailKind {
    Invalid,
    DataLoss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Which {
    Containing,
    Before,
    After,
}

pub struct ChunkReader<R: Reader> {
    src: R,
    /// Boundary of the chunk currently being read.
    pos: u64,
    /// Partially read chunk header bytes; valid up to the data distance
    /// between `pos` and `src.pos()`.
    header_bytes: [u8; CHUNK_HEADER_SIZE as usize],
    /// Partially read chunk data.
    data: Chain,
    block_header: BlockHeader,
    /// The source ended inside the current chunk.
    truncated: bool,
    recoverable: Recoverable,
    recoverable_pos: u64,
    failed: Option<(FailKind, String)>,
}

impl<R: Reader> ChunkReader<R> {
    /// Starts reading at the source's current position, which must be a
    /// chunk boundary (position 0 for a whole file).
    pub fn new(src: R) -> Self {
        let pos = src.pos();
        let mut reader = Self {
            src,
            pos,
            header_bytes: [0u8; CHUNK_HEADER_SIZE as usize],
            data: Chain::new(),
            block_header: BlockHeader::default(),
            truncated: false,
            recoverable: Recoverable::No,
            recoverable_pos: 0,
            failed: None,
        };
        if !is_possible_chunk_boundary(pos) {
            let _ = reader.fail(
                Recoverable::FindChunk,
                pos,
                FailKind::Invalid,
                format!("invalid chunk boundary: {pos}"),
            );
        }
        reader
    }

    /// Position of the current chunk boundary.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn src(&self) -> &R {
        &self.src
    }

    pub fn src_mut(&mut self) -> &mut R {
        &mut self.src
    }

    pub fn supports_random_access(&self) -> bool {
        self.src.supports_random_access()
    }

    /// Whether the source ended in the middle of the current chunk.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn size(&mut self) -> Result<u64> {
        self.check_healthy()?;
        self.src.size()
    }

    fn fail(
        &mut self,
        recoverable: Recoverable,
        recoverable_pos: u64,
        kind: FailKind,
        message: String,
    ) -> Error {
        warn!(pos = self.pos, recoverable_pos, %message, "chunk reader failed");
        self.recoverable = recoverable;
        self.recoverable_pos = recoverable_pos;
        self.failed = Some((kind, message.clone()));
        match kind {
            FailKind::Invalid => Error::invalid_data(message),
            FailKind::DataLoss => Error::data_loss(message),
        }
    }

    fn check_healthy(&self) -> Result<()> {
        match &self.failed {
            None => Ok(()),
            Some((FailKind::Invalid, message)) => Err(Error::invalid_data(message.clone())),
            Some((FailKind::DataLoss, message)) => Err(Error::data_loss(message.clone())),
        }
    }

    fn reset_partial(&mut self) {
        self.header_bytes = [0u8; CHUNK_HEADER_SIZE as usize];
        self.data.clear();
    }

    /// Notes a clean end-of-source hit while inside the current chunk.
    fn note_eof(&mut self) {
        if self.src.pos() > self.pos {
            self.truncated = true;
        }
    }

    /// Validates that the file starts with a signature chunk. `Ok(false)`
    /// means the source ended before a verdict was possible.
    pub fn check_file_format(&mut self) -> Result<bool> {
        Ok(self.pull_chunk_header()?.is_some())
    }

    /// Makes the next chunk's header available without consuming the chunk.
    /// `Ok(None)` at a clean end of the stream.
    pub fn pull_chunk_header(&mut self) -> Result<Option<ChunkHeader>> {
        self.check_healthy()?;
        self.truncated = false;

        if self.src.pos() < self.pos {
            // A previous recovery placed the boundary past the end of the
            // source. If the source has grown since, skip up to it again.
            if !self.src.pull(1, 1)? {
                return Ok(None);
            }
            let resume_at = self.pos;
            self.pos = self.src.pos();
            return Err(self.fail(
                Recoverable::HaveChunk,
                resume_at,
                FailKind::Invalid,
                format!(
                    "file ended at {} but has grown and will be skipped until {resume_at}",
                    self.pos
                ),
            ));
        }

        let header_read = distance_without_overhead(self.pos, self.src.pos());
        if header_read < CHUNK_HEADER_SIZE && !self.read_chunk_header()? {
            return Ok(None);
        }
        Ok(Some(ChunkHeader::from_bytes(self.header_bytes)))
    }

    /// Reads one whole chunk, verifying both hashes. `Ok(None)` at a clean
    /// end of the stream (possibly a truncated tail; see `close`).
    pub fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        let header = match self.pull_chunk_header()? {
            Some(header) => header,
            None => return Ok(None),
        };
        let chunk_end = header.chunk_end(self.pos);

        while self.data.len() < header.data_size() {
            if remaining_in_block_header(self.src.pos()) > 0 {
                let block_begin = round_down_to_block_boundary(self.src.pos());
                if !self.read_block_header()? {
                    return Ok(None);
                }
                self.validate_block_header_previous(block_begin)?;
                if self.block_header.next_chunk() != chunk_end - block_begin {
                    let recoverable_pos = self.src.pos();
                    return Err(self.fail(
                        Recoverable::FindChunk,
                        recoverable_pos,
                        FailKind::Invalid,
                        format!(
                            "invalid record file: chunk boundary is {chunk_end} but block \
                             header at {block_begin} implies a different next chunk boundary: {}",
                            block_begin + self.block_header.next_chunk()
                        ),
                    ));
                }
            }
            let take = (header.data_size() - self.data.len())
                .min(remaining_in_block(self.src.pos()));
            if !self.src.read_chain(take, &mut self.data)? {
                self.note_eof();
                return Ok(None);
            }
        }

        if !self.src.seek(chunk_end)? {
            self.note_eof();
            return Ok(None);
        }

        let computed = reclog_core::hash::hash_chain(&self.data);
        if computed != header.data_hash() {
            return Err(self.fail(
                // The header hash was correct, so the next chunk boundary
                // is trusted even though the data is not.
                Recoverable::HaveChunk,
                chunk_end,
                FailKind::Invalid,
                format!(
                    "corrupted record file: chunk data hash mismatch \
                     (computed {computed:#018x}, stored {:#018x}), chunk at {} with length {}",
                    header.data_hash(),
                    self.pos,
                    chunk_end - self.pos
                ),
            ));
        }

        let chunk = Chunk {
            header,
            data: std::mem::take(&mut self.data),
        };
        self.pos = chunk_end;
        self.reset_partial();
        Ok(Some(chunk))
    }

    fn validate_block_header_previous(&mut self, block_begin: u64) -> Result<()> {
        if self.block_header.previous_chunk() == block_begin - self.pos {
            return Ok(());
        }
        let (recoverable, recoverable_pos) = if self.block_header.next_chunk() <= BLOCK_SIZE {
            // The rest of the block header still looks sane; trust its next
            // chunk pointer.
            (
                Recoverable::HaveChunk,
                block_begin + self.block_header.next_chunk(),
            )
        } else {
            (Recoverable::FindChunk, self.src.pos())
        };
        let implied = if block_begin >= self.block_header.previous_chunk() {
            format!("{}", block_begin - self.block_header.previous_chunk())
        } else {
            format!("-{}", self.block_header.previous_chunk() - block_begin)
        };
        Err(self.fail(
            recoverable,
            recoverable_pos,
            FailKind::Invalid,
            format!(
                "invalid record file: chunk boundary is {} but block header at {block_begin} \
                 implies a different previous chunk boundary: {implied}",
                self.pos
            ),
        ))
    }

    /// Reads the chunk header at `pos`, crossing block headers as needed.
    /// `Ok(false)` when the source ends first.
    fn read_chunk_header(&mut self) -> Result<bool> {
        loop {
            if remaining_in_block_header(self.src.pos()) > 0 {
                let block_begin = round_down_to_block_boundary(self.src.pos());
                if !self.read_block_header()? {
                    return Ok(false);
                }
                self.validate_block_header_previous(block_begin)?;
            }
            let header_read = distance_without_overhead(self.pos, self.src.pos()) as usize;
            let remaining_len = CHUNK_HEADER_SIZE as usize - header_read;
            let to_read = remaining_len.min(remaining_in_block(self.src.pos()) as usize);
            if !self
                .src
                .read(&mut self.header_bytes[header_read..header_read + to_read])?
            {
                // What was read stays in place so a growing file can resume.
                self.note_eof();
                return Ok(false);
            }
            if to_read == remaining_len {
                break;
            }
        }

        let header = ChunkHeader::from_bytes(self.header_bytes);
        if !header.is_valid() {
            let recoverable_pos = self.src.pos();
            return Err(self.fail(
                Recoverable::FindChunk,
                recoverable_pos,
                FailKind::Invalid,
                format!(
                    "corrupted record file: chunk header hash mismatch \
                     (computed {:#018x}, stored {:#018x}), chunk at {}",
                    header.computed_header_hash(),
                    header.stored_header_hash(),
                    self.pos
                ),
            ));
        }

        if remaining_in_block(self.pos) < CHUNK_HEADER_SIZE {
            // The header was interrupted by a block header (or the chunk
            // starts at a block boundary); both were read, so cross-check.
            let block_begin = self.pos + remaining_in_block(self.pos);
            let chunk_end = header.chunk_end(self.pos);
            if self.block_header.next_chunk() != chunk_end - block_begin {
                let recoverable_pos = self.src.pos();
                return Err(self.fail(
                    Recoverable::FindChunk,
                    recoverable_pos,
                    FailKind::Invalid,
                    format!(
                        "invalid record file: chunk boundary is {chunk_end} but block header \
                         at {block_begin} implies a different next chunk boundary: {}",
                        block_begin + self.block_header.next_chunk()
                    ),
                ));
            }
        }

        if self.pos == 0 {
            // The first chunk must be the file signature.
            if header.data_size() != 0
                || header.chunk_type() != Some(ChunkType::FileSignature)
                || header.num_records() != 0
                || header.decoded_data_size() != 0
            {
                let recoverable_pos = self.src.pos();
                return Err(self.fail(
                    Recoverable::FindChunk,
                    recoverable_pos,
                    FailKind::Invalid,
                    "invalid record file: missing file signature".to_string(),
                ));
            }
        }
        Ok(true)
    }

    /// Reads the remainder of the block header at the source's position.
    /// `Ok(false)` when the source ends first.
    fn read_block_header(&mut self) -> Result<bool> {
        let remaining = remaining_in_block_header(self.src.pos()) as usize;
        debug_assert!(remaining > 0, "not before nor inside a block header");
        let offset = BLOCK_HEADER_SIZE as usize - remaining;
        if !self.src.read(&mut self.block_header.bytes_mut()[offset..])? {
            self.note_eof();
            return Ok(false);
        }
        if !self.block_header.is_valid() {
            let recoverable_pos = self.src.pos();
            let block_begin = round_down_to_block_boundary(recoverable_pos - 1);
            return Err(self.fail(
                Recoverable::FindChunk,
                recoverable_pos,
                FailKind::Invalid,
                format!(
                    "corrupted record file: block header hash mismatch \
                     (computed {:#018x}, stored {:#018x}), block at {block_begin}",
                    self.block_header.computed_hash(),
                    self.block_header.stored_hash()
                ),
            ));
        }
        Ok(true)
    }

    /// Seeks to `new_pos`, which must be a chunk boundary.
    pub fn seek(&mut self, new_pos: u64) -> Result<()> {
        self.check_healthy()?;
        if self.pos == new_pos {
            return Ok(());
        }
        self.truncated = false;
        self.pos = new_pos;
        self.reset_partial();
        if !self.src.seek(new_pos)? {
            return Err(self.fail_seeking(new_pos));
        }
        if !is_possible_chunk_boundary(new_pos) {
            return Err(self.fail(
                Recoverable::FindChunk,
                new_pos,
                FailKind::Invalid,
                format!("invalid chunk boundary: {new_pos}"),
            ));
        }
        Ok(())
    }

    fn fail_seeking(&mut self, new_pos: u64) -> Error {
        let recoverable_pos = self.src.pos();
        self.fail(
            Recoverable::FindChunk,
            recoverable_pos,
            FailKind::Invalid,
            format!("position {new_pos} exceeds file size: {recoverable_pos}"),
        )
    }

    /// Seeks to the chunk containing numeric record position `new_pos`.
    pub fn seek_to_chunk_containing(&mut self, new_pos: u64) -> Result<()> {
        self.seek_to_chunk(Which::Containing, new_pos)
    }

    /// Seeks to the last chunk boundary at or before `new_pos`.
    pub fn seek_to_chunk_before(&mut self, new_pos: u64) -> Result<()> {
        self.seek_to_chunk(Which::Before, new_pos)
    }

    /// Seeks to the first chunk boundary at or after `new_pos`.
    pub fn seek_to_chunk_after(&mut self, new_pos: u64) -> Result<()> {
        self.seek_to_chunk(Which::After, new_pos)
    }

    fn seek_to_chunk(&mut self, which: Which, new_pos: u64) -> Result<()> {
        self.check_healthy()?;
        if self.pos == new_pos {
            return Ok(());
        }
        self.truncated = false;
        let block_begin = round_down_to_block_boundary(new_pos);

        let mut chunk_begin: u64;
        let mut check_current_first = false;
        if self.pos < new_pos {
            // The current chunk begins before the target; if it also ends
            // at or after the target's block, searching onward from here
            // beats seeking back to the block boundary.
            let header = match self.pull_chunk_header()? {
                Some(header) => header,
                None => {
                    self.truncated = false;
                    return Err(self.fail_seeking(new_pos));
                }
            };
            if which == Which::Containing && self.pos + header.num_records() > new_pos {
                return Ok(());
            }
            let chunk_end = header.chunk_end(self.pos);
            if which == Which::Before && chunk_end > new_pos {
                return Ok(());
            }
            if chunk_end < block_begin {
                chunk_begin = self.locate_from_block_header(which, new_pos, block_begin)?;
                check_current_first = chunk_begin == self.pos && self.src.pos() > self.pos;
            } else {
                chunk_begin = chunk_end;
                self.reset_partial();
            }
        } else {
            chunk_begin = self.locate_from_block_header(which, new_pos, block_begin)?;
            check_current_first = chunk_begin == self.pos && self.src.pos() > self.pos;
        }

        loop {
            if !check_current_first {
                self.pos = chunk_begin;
                self.reset_partial();
                if !self.src.seek(chunk_begin)? {
                    return Err(self.fail_seeking(new_pos));
                }
            }
            check_current_first = false;
            if self.pos >= new_pos {
                return Ok(());
            }
            if !self.read_chunk_header()? {
                self.truncated = false;
                return Err(self.fail_seeking(new_pos));
            }
            let header = ChunkHeader::from_bytes(self.header_bytes);
            if which == Which::Containing && self.pos + header.num_records() > new_pos {
                return Ok(());
            }
            let chunk_end = header.chunk_end(self.pos);
            if which == Which::Before && chunk_end > new_pos {
                return Ok(());
            }
            chunk_begin = chunk_end;
        }
    }

    /// Positions at `block_begin`, reads its block header and derives the
    /// chunk boundary to start searching from. When a chunk boundary
    /// coincides with the block boundary the search starts right there with
    /// the source already past the block header.
    fn locate_from_block_header(
        &mut self,
        which: Which,
        new_pos: u64,
        block_begin: u64,
    ) -> Result<u64> {
        self.pos = block_begin;
        self.reset_partial();
        if !self.src.seek(block_begin)? {
            return Err(self.fail_seeking(new_pos));
        }
        match self.read_block_header() {
            Err(e) => return Err(e),
            Ok(false) => {
                if !self.truncated && self.pos >= new_pos {
                    // The file ends at this block boundary, so a chunk ends
                    // here too.
                    return Ok(self.pos);
                }
                self.truncated = false;
                return Err(self.fail_seeking(new_pos));
            }
            Ok(true) => {}
        }
        if self.block_header.previous_chunk() == 0 {
            // A chunk boundary coincides with the block boundary; continue
            // from here without seeking back.
            return Ok(block_begin);
        }
        let mut chunk_begin = block_begin + self.block_header.next_chunk();
        if which != Which::After && chunk_begin > new_pos {
            // The target is inside the chunk that contains this block
            // boundary; start from that chunk instead.
            if self.block_header.previous_chunk() > block_begin {
                let recoverable_pos = self.src.pos();
                return Err(self.fail(
                    Recoverable::FindChunk,
                    recoverable_pos,
                    FailKind::Invalid,
                    format!(
                        "invalid record file: block header at {block_begin} implies a negative \
                         previous chunk boundary: -{}",
                        self.block_header.previous_chunk() - block_begin
                    ),
                ));
            }
            chunk_begin = block_begin - self.block_header.previous_chunk();
        }
        if !is_possible_chunk_boundary(chunk_begin) {
            let recoverable_pos = self.src.pos();
            return Err(self.fail(
                Recoverable::FindChunk,
                recoverable_pos,
                FailKind::Invalid,
                format!(
                    "invalid record file: block header at {block_begin} implies an invalid \
                     chunk boundary: {chunk_begin}"
                ),
            ));
        }
        Ok(chunk_begin)
    }

    /// After a failure, resynchronizes to the next plausible chunk boundary
    /// and reports the byte range skipped together with the failure that
    /// caused it. `Ok(None)` when there is nothing to recover from.
    pub fn recover(&mut self) -> Result<Option<SkippedRegion>> {
        if self.recoverable == Recoverable::No {
            return Ok(None);
        }
        let region_begin = self.pos;
        let mut recoverable = std::mem::replace(&mut self.recoverable, Recoverable::No);
        let mut recoverable_pos = std::mem::take(&mut self.recoverable_pos);
        let mut saved = match self.failed.take() {
            Some((_, message)) => message,
            None => String::new(),
        };
        self.reset_partial();

        loop {
            match recoverable {
                Recoverable::No => unreachable!("handled above"),
                Recoverable::HaveChunk => {
                    self.pos = recoverable_pos;
                    if !self.src.seek(self.pos)? {
                        let end = self.src.pos();
                        debug!(region_begin, end, "recovered to end of source");
                        return Ok(Some(SkippedRegion::new(region_begin, end, saved)));
                    }
                    if !is_possible_chunk_boundary(self.pos) {
                        recoverable = Recoverable::FindChunk;
                        recoverable_pos = self.pos;
                        continue;
                    }
                    debug!(region_begin, end = self.pos, "recovered to known chunk boundary");
                    return Ok(Some(SkippedRegion::new(region_begin, self.pos, saved)));
                }
                Recoverable::FindChunk => {
                    self.pos = recoverable_pos;
                    loop {
                        self.pos += remaining_in_block(self.pos);
                        if !self.src.seek(self.pos)? {
                            let end = self.src.pos();
                            return Ok(Some(SkippedRegion::new(region_begin, end, saved)));
                        }
                        match self.read_block_header() {
                            Err(_) if self.recoverable != Recoverable::No => {
                                recoverable =
                                    std::mem::replace(&mut self.recoverable, Recoverable::No);
                                recoverable_pos = std::mem::take(&mut self.recoverable_pos);
                                if let Some((_, message)) = self.failed.take() {
                                    saved = message;
                                }
                                break; // restart the outer match
                            }
                            Err(e) => return Err(e),
                            Ok(false) => {
                                // Source ends at or inside this block; the
                                // skipped region runs to the end.
                                return Ok(Some(SkippedRegion::new(
                                    region_begin,
                                    self.pos,
                                    saved,
                                )));
                            }
                            Ok(true) => {}
                        }
                        if self.block_header.previous_chunk() == 0 {
                            // A chunk boundary coincides with the block
                            // boundary; recovery is done.
                            return Ok(Some(SkippedRegion::new(region_begin, self.pos, saved)));
                        }
                        let candidate = self.pos + self.block_header.next_chunk();
                        if !is_possible_chunk_boundary(candidate) {
                            // Walk on to the next block header after the
                            // implausible boundary.
                            self.pos = candidate;
                            continue;
                        }
                        self.pos = candidate;
                        if !self.src.seek(self.pos)? {
                            let end = self.src.pos();
                            return Ok(Some(SkippedRegion::new(region_begin, end, saved)));
                        }
                        return Ok(Some(SkippedRegion::new(region_begin, self.pos, saved)));
                    }
                }
            }
        }
    }

    /// Verifies the stream did not end mid-chunk. On truncation the reader
    /// becomes recoverable so a caller may still resync (e.g. a file being
    /// appended to concurrently).
    pub fn close(&mut self) -> Result<()> {
        self.recoverable = Recoverable::No;
        self.recoverable_pos = 0;
        if self.truncated {
            let end = self.src.pos();
            return Err(self.fail(
                Recoverable::HaveChunk,
                end,
                FailKind::DataLoss,
                format!(
                    "truncated record file: incomplete chunk at {} with length {}",
                    self.pos,
                    end - self.pos
                ),
            ));
        }
        Ok(())
    }

    pub fn into_src(self) -> R {
        self.src
    }
}
