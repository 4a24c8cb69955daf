//! Record Positions
//!
//! A record's canonical position is the pair (chunk begin, record index
//! within the chunk). Two encodings exist, both strictly monotonic in
//! record order:
//!
//! - `RecordPosition`, the pair itself: fastest for seeking.
//! - `numeric()`, a single integer scaled between 0 and the file size:
//!   fits APIs that want one number and supports interpolated seeks, at
//!   the cost of one chunk-locating step when seeking.
//!
//! The 16-byte binary form stores both halves big-endian so serialized
//! positions sort byte-wise in record order.

use reclog_core::endian::{read_be64, write_be64};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordPosition {
    chunk_begin: u64,
    record_index: u64,
}

impl RecordPosition {
    /// Position of the given record of the chunk at `chunk_begin`.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_begin + record_index` overflows, which no valid
    /// file can produce.
    pub fn new(chunk_begin: u64, record_index: u64) -> Self {
        assert!(
            record_index <= u64::MAX - chunk_begin,
            "record position overflow: {chunk_begin} + {record_index}"
        );
        Self {
            chunk_begin,
            record_index,
        }
    }

    /// File position of the chunk containing the record.
    pub fn chunk_begin(&self) -> u64 {
        self.chunk_begin
    }

    /// Index of the record within its chunk.
    pub fn record_index(&self) -> u64 {
        self.record_index
    }

    /// The position as one integer in `[0, file_size]`. Distinct positions
    /// of a valid file have distinct numeric values.
    pub fn numeric(&self) -> u64 {
        self.chunk_begin + self.record_index
    }

    /// 16-byte big-endian serialization ordering the same as the position.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        write_be64(self.chunk_begin, &mut bytes[0..8]);
        write_be64(self.record_index, &mut bytes[8..16]);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 16 {
            return None;
        }
        let chunk_begin = read_be64(&bytes[0..8]);
        let record_index = read_be64(&bytes[8..16]);
        if record_index > u64::MAX - chunk_begin {
            return None;
        }
        Some(Self {
            chunk_begin,
            record_index,
        })
    }
}

impl PartialOrd for RecordPosition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordPosition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.chunk_begin, self.record_index).cmp(&(other.chunk_begin, other.record_index))
    }
}

impl std::fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.chunk_begin, self.record_index)
    }
}

impl std::str::FromStr for RecordPosition {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (chunk_begin, record_index) = text.split_once('/').ok_or(())?;
        let chunk_begin: u64 = chunk_begin.parse().map_err(|_| ())?;
        let record_index: u64 = record_index.parse().map_err(|_| ())?;
        if record_index > u64::MAX - chunk_begin {
            return Err(());
        }
        Ok(Self {
            chunk_begin,
            record_index,
        })
    }
}
