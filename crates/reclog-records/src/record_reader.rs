//! Record Reader - The Read Facade
//!
//! Iterates, seeks and searches over records. Chunks come from a
//! [`ChunkReader`]; one decoded chunk at a time is held in a
//! [`ChunkDecoder`].
//!
//! ## Recovery
//!
//! Failures carry one of two recovery levels:
//!
//! - **chunk reader**: the byte stream is damaged; recovery resyncs via
//!   block headers and reports the skipped file range.
//! - **chunk decoder**: one chunk's content is undecodable; recovery skips
//!   the remainder of that chunk and reports the skipped numeric-position
//!   range.
//!
//! `recover` is explicit, or a recovery callback can be installed to keep
//! `read_record` iterating across damage (returning `false` from the
//! callback stops iteration without an error).
//!
//! ## Search
//!
//! `search` runs a binary search by record content over the whole file:
//! chunk-granular first (each probe tests the first record of a chunk),
//! then record-granular within the last chunk that still contained a
//! smaller record. Skipped or truncated regions are declared unordered so
//! the search converges even across corruption.

use crate::chunk_decoder::ChunkDecoder;
use crate::chunk_reader::ChunkReader;
use crate::chunk::ChunkType;
use crate::metadata::decode_metadata_chunk;
use crate::projection::FieldProjection;
use crate::record_position::RecordPosition;
use crate::skipped_region::SkippedRegion;
use bytes::Bytes;
use reclog_bytes::Reader;
use reclog_core::{Chain, Error, Result};
use tracing::warn;

/// Outcome of one search probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOrdering {
    /// The probed record is before the target.
    Less,
    /// The probed record matches the target.
    Equivalent,
    /// The probed record is after the target.
    Greater,
    /// The probed record cannot be classified (damaged or unparsable);
    /// the search skips past it.
    Unordered,
}

/// Callback invoked with each skipped region; returning `true` resumes
/// iteration.
pub type RecoveryFn = Box<dyn FnMut(&SkippedRegion) -> bool + Send>;

#[derive(Default)]
pub struct RecordReaderOptions {
    pub field_projection: Option<FieldProjection>,
    pub recovery: Option<RecoveryFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recoverable {
    No,
    ChunkReader,
    ChunkDecoder,
}

pub struct RecordReader<R: Reader> {
    chunk_reader: ChunkReader<R>,
    /// Position of the chunk held in the decoder.
    chunk_begin: u64,
    chunk_decoder: ChunkDecoder,
    last_record_is_valid: bool,
    recoverable: Recoverable,
    /// Message of the failure that set `recoverable == ChunkDecoder`.
    decoder_error: Option<String>,
    recovery: Option<RecoveryFn>,
    /// The recovery callback asked iteration to stop.
    recovery_cancelled: bool,
}

impl<R: Reader> RecordReader<R> {
    pub fn new(src: R, options: RecordReaderOptions) -> Self {
        let chunk_reader = ChunkReader::new(src);
        let chunk_begin = chunk_reader.pos();
        let projection = options.field_projection.unwrap_or_else(FieldProjection::all);
        Self {
            chunk_reader,
            chunk_begin,
            chunk_decoder: ChunkDecoder::new(projection),
            last_record_is_valid: false,
            recoverable: Recoverable::No,
            decoder_error: None,
            recovery: options.recovery,
            recovery_cancelled: false,
        }
    }

    /// Position of the next record to be read.
    pub fn pos(&self) -> RecordPosition {
        RecordPosition::new(self.chunk_begin, self.chunk_decoder.index())
    }

    /// Position of the last record read, if the last read succeeded.
    pub fn last_pos(&self) -> Option<RecordPosition> {
        if !self.last_record_is_valid {
            return None;
        }
        debug_assert!(self.chunk_decoder.index() > 0);
        Some(RecordPosition::new(
            self.chunk_begin,
            self.chunk_decoder.index() - 1,
        ))
    }

    pub fn supports_random_access(&self) -> bool {
        self.chunk_reader.supports_random_access()
    }

    /// Total file size; the supremum of numeric record positions.
    pub fn size(&mut self) -> Result<u64> {
        self.chunk_reader.size()
    }

    /// Validates that the stream begins like a record file without
    /// consuming records. `Ok(false)` means the stream ended first.
    pub fn check_file_format(&mut self) -> Result<bool> {
        if self.chunk_decoder.num_records() > 0 {
            return Ok(true);
        }
        match self.chunk_reader.check_file_format() {
            Ok(ok) => Ok(ok),
            Err(e) => {
                self.chunk_decoder.clear();
                self.recoverable = Recoverable::ChunkReader;
                Err(e)
            }
        }
    }

    /// Reads the serialized file metadata. Must be called at the beginning
    /// of the file; `Ok(None)` when the file has no metadata chunk.
    pub fn read_metadata(&mut self) -> Result<Option<Chain>> {
        if self.chunk_reader.pos() != 0 {
            return Err(Error::invalid_data(
                "metadata can only be read at the beginning of the file",
            ));
        }
        self.chunk_begin = self.chunk_reader.pos();
        let signature = match self.read_chunk_raw()? {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        debug_assert_eq!(
            signature.header.chunk_type(),
            Some(ChunkType::FileSignature)
        );
        self.chunk_begin = self.chunk_reader.pos();
        let is_metadata = match self.pull_chunk_header_raw()? {
            Some(header) => header.chunk_type() == Some(ChunkType::FileMetadata),
            None => false,
        };
        if !is_metadata {
            return Ok(None);
        }
        let chunk = match self.read_chunk_raw()? {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        match decode_metadata_chunk(&chunk) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                self.recoverable = Recoverable::ChunkDecoder;
                self.decoder_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Reads the next record. `Ok(None)` at the end of the stream.
    pub fn read_record(&mut self) -> Result<Option<Bytes>> {
        self.last_record_is_valid = false;
        loop {
            if let Some(record) = self.chunk_decoder.read_record() {
                self.last_record_is_valid = true;
                return Ok(Some(record));
            }
            match self.read_chunk() {
                Ok(true) => continue,
                Ok(false) => return Ok(None),
                Err(e) => {
                    if !self.try_recovery(&e)? {
                        return Err(e);
                    }
                    if self.recovery_stopped() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Reads and parses the next record as a protobuf message.
    pub fn read_message<M: prost::Message + Default>(&mut self) -> Result<Option<M>> {
        match self.read_record()? {
            None => Ok(None),
            Some(record) => match M::decode(record.as_ref()) {
                Ok(message) => Ok(Some(message)),
                Err(e) => {
                    // A record that does not parse is chunk-decoder-level
                    // recoverable: the remaining records are intact.
                    self.recoverable = Recoverable::ChunkDecoder;
                    let error = Error::invalid_data(format!("record does not parse: {e}"));
                    self.decoder_error = Some(error.to_string());
                    Err(error)
                }
            },
        }
    }

    /// Re-reads the current chunk with a different projection, keeping the
    /// read position.
    pub fn set_field_projection(&mut self, field_projection: FieldProjection) -> Result<()> {
        let record_index = self.chunk_decoder.index();
        self.chunk_decoder.set_projection(field_projection);
        if let Err(e) = self.chunk_reader.seek(self.chunk_begin) {
            self.recoverable = Recoverable::ChunkReader;
            return Err(e);
        }
        if record_index > 0 {
            if !self.read_chunk_for_seek()? {
                return Ok(());
            }
            self.chunk_decoder.set_index(record_index);
        }
        Ok(())
    }

    /// Seeks to a record position.
    pub fn seek(&mut self, new_pos: RecordPosition) -> Result<()> {
        self.last_record_is_valid = false;
        if new_pos.chunk_begin() == self.chunk_begin {
            if new_pos.record_index() == 0 || self.chunk_reader.pos() > self.chunk_begin {
                // Either no chunk content is needed, or the chunk is
                // already decoded.
                self.chunk_decoder.set_index(new_pos.record_index());
                return Ok(());
            }
        } else {
            if let Err(e) = self.chunk_reader.seek(new_pos.chunk_begin()) {
                return self.fail_seeking(e);
            }
            self.chunk_begin = self.chunk_reader.pos();
            if new_pos.record_index() == 0 {
                // The chunk need not exist yet (end of file).
                self.chunk_decoder.clear();
                return Ok(());
            }
        }
        if !self.read_chunk_for_seek()? {
            return Ok(());
        }
        self.chunk_decoder.set_index(new_pos.record_index());
        Ok(())
    }

    /// Seeks to a numeric position in `[0, size]`.
    pub fn seek_numeric(&mut self, new_pos: u64) -> Result<()> {
        self.last_record_is_valid = false;
        if new_pos >= self.chunk_begin && new_pos <= self.chunk_reader.pos() {
            // Within the current chunk (or exactly at its boundaries).
        } else {
            if let Err(e) = self.chunk_reader.seek_to_chunk_containing(new_pos) {
                return self.fail_seeking(e);
            }
            self.chunk_begin = self.chunk_reader.pos();
            if self.chunk_begin >= new_pos {
                // Seeking to the beginning of a chunk does not need its
                // content.
                self.chunk_decoder.clear();
                return Ok(());
            }
            if !self.read_chunk_for_seek()? {
                return Ok(());
            }
        }
        self.chunk_decoder.set_index(new_pos - self.chunk_begin);
        Ok(())
    }

    /// Steps back to the previous record, crossing chunk boundaries.
    pub fn seek_back(&mut self) -> Result<bool> {
        self.last_record_is_valid = false;
        if self.chunk_decoder.index() > 0 {
            self.chunk_decoder.set_index(self.chunk_decoder.index() - 1);
            return Ok(true);
        }
        let mut chunk_pos = self.chunk_begin;
        while chunk_pos > 0 {
            if let Err(e) = self.chunk_reader.seek_to_chunk_before(chunk_pos - 1) {
                // If recovery succeeds, continue searching back from before
                // the skipped region; always make progress backwards.
                let resume_at = self.chunk_reader.pos();
                if !self.try_recovery(&e)? {
                    return Err(e);
                }
                chunk_pos = resume_at.min(chunk_pos - 1);
                if self.recovery_stopped() {
                    return Ok(false);
                }
                continue;
            }
            self.chunk_begin = self.chunk_reader.pos();
            chunk_pos = self.chunk_begin;
            match self.read_chunk() {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) => {
                    if !self.try_recovery(&e)? {
                        return Err(e);
                    }
                    if self.recovery_stopped() {
                        return Ok(false);
                    }
                    continue;
                }
            }
            if self.chunk_decoder.num_records() > 0 {
                self.chunk_decoder
                    .set_index(self.chunk_decoder.num_records() - 1);
                return Ok(true);
            }
            // The chunk has no records; continue searching backwards.
        }
        Ok(false)
    }

    /// After a failure, skips the damaged region and reports it.
    /// `Ok(None)` when there is nothing to recover from.
    pub fn recover(&mut self) -> Result<Option<SkippedRegion>> {
        match std::mem::replace(&mut self.recoverable, Recoverable::No) {
            Recoverable::No => Ok(None),
            Recoverable::ChunkReader => {
                let region = self.chunk_reader.recover()?;
                if let Some(region) = &region {
                    warn!(%region, "skipped damaged file region");
                    self.chunk_begin = self.chunk_reader.pos();
                    self.chunk_decoder.clear();
                }
                Ok(region)
            }
            Recoverable::ChunkDecoder => {
                let index_before = self.chunk_decoder.index();
                self.chunk_decoder.recover();
                let region = SkippedRegion::new(
                    self.chunk_begin + index_before,
                    self.pos().numeric(),
                    self.decoder_error.take().unwrap_or_default(),
                );
                warn!(%region, "skipped undecodable records");
                Ok(Some(region))
            }
        }
    }

    /// Chunk-granular binary search by record content. Seeks to the
    /// smallest record position whose probe is not `Less` (the end of the
    /// file when every record is `Less`) and returns it.
    pub fn search<F>(&mut self, mut test: F) -> Result<RecordPosition>
    where
        F: FnMut(&mut Self) -> Result<SearchOrdering>,
    {
        self.last_record_is_valid = false;
        let size = self.size()?;

        struct ChunkSuffix {
            chunk_begin: u64,
            record_index: u64,
            num_records: u64,
        }
        let mut less_found: Option<ChunkSuffix> = None;
        let mut greater_chunk_begin = size;
        let mut greater_record_index = 0u64;

        let mut low = 0u64;
        let mut high = size;
        'search: while low < high {
            // Locate a chunk boundary in the middle.
            let target = low + (high - low) / 2;
            if let Err(e) = self.chunk_reader.seek_to_chunk_before(target) {
                if !self.plain_recover(&e)? {
                    return Err(e);
                }
                // The skipped region is unordered; retry from its end, or
                // from `low` if it covers the rest of the range.
                if self.chunk_reader.pos() >= high {
                    if let Err(e) = self.chunk_reader.seek(low) {
                        if !self.plain_recover(&e)? {
                            return Err(e);
                        }
                    }
                    if self.chunk_reader.pos() >= high {
                        break 'search;
                    }
                }
            }

            // Probe forward from here until a chunk yields an ordering.
            let mut probe_pos = self.chunk_reader.pos();
            loop {
                if probe_pos >= high {
                    // Everything between the middle and `high` is
                    // unordered; narrow from the right.
                    high = target.min(probe_pos);
                    if high <= low {
                        break 'search;
                    }
                    continue 'search;
                }
                self.chunk_begin = probe_pos;
                match self.probe_chunk(&mut test)? {
                    Probe::Less { end } => {
                        less_found = Some(ChunkSuffix {
                            chunk_begin: self.chunk_begin,
                            record_index: 1,
                            num_records: self.chunk_decoder.num_records(),
                        });
                        low = end;
                        continue 'search;
                    }
                    // Equivalent still narrows left so duplicates collapse
                    // to the smallest matching position.
                    Probe::Equivalent { record_index } | Probe::Greater { record_index } => {
                        greater_chunk_begin = self.chunk_begin;
                        greater_record_index = record_index;
                        high = self.chunk_begin;
                        continue 'search;
                    }
                    Probe::Unordered { end } => {
                        probe_pos = end;
                    }
                    Probe::End => break 'search,
                }
            }
        }

        let mut position = RecordPosition::new(greater_chunk_begin, greater_record_index);
        if let Some(suffix) = less_found {
            // Record-granular refinement inside the last chunk that still
            // held a smaller record.
            let mut low = suffix.record_index;
            let mut high = suffix.num_records;
            while low < high {
                let middle = low + (high - low) / 2;
                self.seek(RecordPosition::new(suffix.chunk_begin, middle))?;
                match test(self)? {
                    SearchOrdering::Less => low = middle + 1,
                    SearchOrdering::Unordered => low = middle + 1,
                    SearchOrdering::Equivalent | SearchOrdering::Greater => high = middle,
                }
            }
            if low < suffix.num_records {
                position = RecordPosition::new(suffix.chunk_begin, low);
            }
        }
        self.seek(position)?;
        Ok(position)
    }

    /// Verifies the stream did not end mid-chunk.
    pub fn close(&mut self) -> Result<()> {
        self.last_record_is_valid = false;
        match self.chunk_reader.close() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.recoverable = Recoverable::ChunkReader;
                Err(e)
            }
        }
    }

    pub fn into_src(self) -> R {
        self.chunk_reader.into_src()
    }

    // ----- internals -----

    /// Reads and decodes the next chunk. `Ok(false)` at a clean end of the
    /// stream.
    fn read_chunk(&mut self) -> Result<bool> {
        self.chunk_begin = self.chunk_reader.pos();
        let chunk = match self.chunk_reader.read_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                self.chunk_decoder.clear();
                return Ok(false);
            }
            Err(e) => {
                self.chunk_decoder.clear();
                self.recoverable = Recoverable::ChunkReader;
                return Err(e);
            }
        };
        match self.chunk_decoder.decode(&chunk) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.recoverable = Recoverable::ChunkDecoder;
                self.decoder_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// `read_chunk` for seek paths: attempts automatic recovery; returns
    /// `Ok(false)` when the target chunk cannot be decoded (the position
    /// ends up at the recovery point).
    fn read_chunk_for_seek(&mut self) -> Result<bool> {
        match self.read_chunk() {
            Ok(ok) => Ok(ok),
            Err(e) => {
                if !self.try_recovery(&e)? {
                    return Err(e);
                }
                Ok(false)
            }
        }
    }

    fn read_chunk_raw(&mut self) -> Result<Option<crate::chunk::Chunk>> {
        match self.chunk_reader.read_chunk() {
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                self.recoverable = Recoverable::ChunkReader;
                Err(e)
            }
        }
    }

    fn pull_chunk_header_raw(&mut self) -> Result<Option<crate::chunk::ChunkHeader>> {
        match self.chunk_reader.pull_chunk_header() {
            Ok(header) => Ok(header),
            Err(e) => {
                self.recoverable = Recoverable::ChunkReader;
                Err(e)
            }
        }
    }

    fn fail_seeking(&mut self, error: Error) -> Result<()> {
        self.chunk_begin = self.chunk_reader.pos();
        self.chunk_decoder.clear();
        self.recoverable = Recoverable::ChunkReader;
        Err(error)
    }

    /// Runs the recovery callback if one is installed. `Ok(true)` when
    /// iteration may continue.
    fn try_recovery(&mut self, _error: &Error) -> Result<bool> {
        if self.recovery.is_none() {
            return Ok(false);
        }
        let region = match self.recover()? {
            Some(region) => region,
            None => return Ok(false),
        };
        match self.recovery.as_mut() {
            Some(callback) => {
                if !callback(&region) {
                    self.recovery_cancelled = true;
                }
            }
            None => return Ok(false),
        }
        Ok(true)
    }

    fn recovery_stopped(&mut self) -> bool {
        std::mem::replace(&mut self.recovery_cancelled, false)
    }

    /// Recovery without consulting the callback, used inside `search`.
    fn plain_recover(&mut self, _error: &Error) -> Result<bool> {
        self.recoverable = Recoverable::ChunkReader;
        Ok(self.recover()?.is_some())
    }

    /// Tests the first readable record of the chunk at `chunk_begin`.
    fn probe_chunk<F>(&mut self, test: &mut F) -> Result<Probe>
    where
        F: FnMut(&mut Self) -> Result<SearchOrdering>,
    {
        if let Err(e) = self.chunk_reader.seek(self.chunk_begin) {
            if !self.plain_recover(&e)? {
                return Err(e);
            }
            return Ok(Probe::Unordered {
                end: self.chunk_reader.pos(),
            });
        }
        match self.read_chunk() {
            Ok(true) => {}
            Ok(false) => return Ok(Probe::End),
            Err(e) => {
                if !self.try_plain_recovery(&e)? {
                    return Err(e);
                }
                return Ok(Probe::Unordered {
                    end: self.chunk_reader.pos().max(self.chunk_begin),
                });
            }
        }
        // Recovery may have moved the chunk forward.
        let chunk_begin = self.chunk_begin;
        let num_records = self.chunk_decoder.num_records();
        if num_records == 0 {
            return Ok(Probe::Unordered {
                end: self.chunk_reader.pos(),
            });
        }
        self.seek(RecordPosition::new(chunk_begin, 0))?;
        match test(self)? {
            SearchOrdering::Less => Ok(Probe::Less {
                end: self.chunk_reader.pos(),
            }),
            SearchOrdering::Equivalent => Ok(Probe::Equivalent { record_index: 0 }),
            SearchOrdering::Greater => Ok(Probe::Greater { record_index: 0 }),
            SearchOrdering::Unordered => Ok(Probe::Unordered {
                end: self.chunk_reader.pos(),
            }),
        }
    }

    /// Recovery for probe failures: either level, without the callback.
    fn try_plain_recovery(&mut self, _error: &Error) -> Result<bool> {
        Ok(self.recover()?.is_some())
    }
}

enum Probe {
    Less { end: u64 },
    Equivalent { record_index: u64 },
    Greater { record_index: u64 },
    Unordered { end: u64 },
    End,
}
