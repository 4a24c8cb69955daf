//! Per-chunk-type Decoding Dispatch
//!
//! Decodes one chunk into its records and serves them by index. The
//! decoder owns the concatenated record bytes plus their boundaries, so
//! `read_record`, `set_index` and `seek`-by-record are O(1) once a chunk is
//! decoded.
//!
//! Failure leaves the decoder empty but remembers the chunk's declared
//! record count, so record-level recovery can skip exactly the records the
//! chunk claimed to hold.

use crate::chunk::{Chunk, ChunkType};
use crate::projection::FieldProjection;
use crate::simple::SimpleDecoder;
use crate::transpose::TransposeDecoder;
use bytes::Bytes;
use reclog_bytes::ChainBackwardWriter;
use reclog_core::{Chain, Error, Result};

#[derive(Default)]
pub struct ChunkDecoder {
    projection: FieldProjection,
    /// Concatenated record bytes of the decoded chunk.
    values: Chain,
    /// Cumulative record end positions within `values`.
    limits: Vec<u64>,
    num_records: u64,
    index: u64,
}

impl ChunkDecoder {
    pub fn new(projection: FieldProjection) -> Self {
        Self {
            projection,
            ..Self::default()
        }
    }

    pub fn projection(&self) -> &FieldProjection {
        &self.projection
    }

    pub fn set_projection(&mut self, projection: FieldProjection) {
        self.projection = projection;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.limits.clear();
        self.num_records = 0;
        self.index = 0;
    }

    /// Decodes `chunk`. On failure the decoder is left empty except for the
    /// chunk's declared record count (see `recover`).
    pub fn decode(&mut self, chunk: &Chunk) -> Result<()> {
        self.clear();
        let result = self.decode_impl(chunk);
        if result.is_err() {
            let declared = chunk.header.num_records();
            self.clear();
            self.num_records = declared;
            self.index = 0;
        }
        result
    }

    fn decode_impl(&mut self, chunk: &Chunk) -> Result<()> {
        let num_records = chunk.header.num_records();
        let decoded_data_size = chunk.header.decoded_data_size();
        match chunk.header.chunk_type() {
            Some(ChunkType::FileSignature) | Some(ChunkType::Padding)
            | Some(ChunkType::FileMetadata) => {
                // No records to produce.
                if num_records != 0 {
                    return Err(Error::invalid_data(format!(
                        "invalid chunk: type {:#04x} declares {num_records} records",
                        chunk.header.chunk_type_byte()
                    )));
                }
                Ok(())
            }
            Some(ChunkType::Simple) => {
                let (values, limits) =
                    SimpleDecoder::decode(chunk.data.clone(), num_records, decoded_data_size)?;
                self.values = values;
                self.limits = limits;
                self.num_records = num_records;
                Ok(())
            }
            Some(ChunkType::Transpose) => {
                let mut dest = ChainBackwardWriter::with_size_hint(
                    decoded_data_size.min(1 << 30) as usize,
                );
                let limits = TransposeDecoder::decode(
                    num_records,
                    decoded_data_size,
                    &self.projection,
                    chunk.data.clone(),
                    &mut dest,
                )?;
                self.values = dest.into_chain();
                self.limits = limits;
                self.num_records = num_records;
                Ok(())
            }
            None => Err(Error::invalid_data(format!(
                "unknown chunk type: {:#04x}",
                chunk.header.chunk_type_byte()
            ))),
        }
    }

    /// Returns the next record, or `None` when the chunk is exhausted.
    pub fn read_record(&mut self) -> Option<Bytes> {
        if self.index >= self.limits.len() as u64 {
            return None;
        }
        let begin = if self.index == 0 {
            0
        } else {
            self.limits[self.index as usize - 1]
        };
        let end = self.limits[self.index as usize];
        self.index += 1;
        Some(self.values.subrange(begin, end - begin).flatten())
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn set_index(&mut self, index: u64) {
        self.index = index.min(self.num_records);
    }

    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    /// After a failed decode, skips the remainder of the chunk so iteration
    /// can continue with the next one.
    pub fn recover(&mut self) {
        self.index = self.num_records;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_encoder::ChunkEncoder;
    use reclog_core::CompressionType;

    fn decoded(records: &[&[u8]], transpose: bool) -> ChunkDecoder {
        let mut encoder = if transpose {
            ChunkEncoder::transpose(CompressionType::None, 0, 1 << 16)
        } else {
            ChunkEncoder::simple(CompressionType::None, 0)
        };
        for record in records {
            encoder.add_record(record);
        }
        let chunk = encoder.encode().unwrap();
        let mut decoder = ChunkDecoder::default();
        decoder.decode(&chunk).unwrap();
        decoder
    }

    #[test]
    fn test_read_records_in_order() {
        let mut decoder = decoded(&[b"", b"a", b"bc", b"def"], false);
        assert_eq!(decoder.num_records(), 4);
        assert_eq!(decoder.read_record().unwrap(), Bytes::new());
        assert_eq!(decoder.read_record().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(decoder.read_record().unwrap(), Bytes::from_static(b"bc"));
        assert_eq!(decoder.read_record().unwrap(), Bytes::from_static(b"def"));
        assert!(decoder.read_record().is_none());
    }

    #[test]
    fn test_set_index_random_access() {
        let mut decoder = decoded(&[b"", b"a", b"bc", b"def"], false);
        decoder.set_index(2);
        assert_eq!(decoder.read_record().unwrap(), Bytes::from_static(b"bc"));
        decoder.set_index(0);
        assert_eq!(decoder.read_record().unwrap(), Bytes::new());
        decoder.set_index(100);
        assert!(decoder.read_record().is_none());
        assert_eq!(decoder.index(), 4);
    }

    #[test]
    fn test_signature_chunk_has_no_records() {
        let mut decoder = ChunkDecoder::default();
        decoder.decode(&crate::chunk::Chunk::file_signature()).unwrap();
        assert_eq!(decoder.num_records(), 0);
        assert!(decoder.read_record().is_none());
    }

    #[test]
    fn test_failed_decode_remembers_record_count_for_recovery() {
        let mut encoder = ChunkEncoder::simple(CompressionType::None, 0);
        encoder.add_record(b"payload");
        let mut chunk = encoder.encode().unwrap();
        // Damage the data but keep a consistent header record count.
        chunk.data = reclog_core::Chain::from(&b"garbage"[..]);
        let mut decoder = ChunkDecoder::default();
        assert!(decoder.decode(&chunk).is_err());
        assert_eq!(decoder.num_records(), 1);
        assert_eq!(decoder.index(), 0);
        decoder.recover();
        assert_eq!(decoder.index(), 1);
        assert!(decoder.read_record().is_none());
    }
}
