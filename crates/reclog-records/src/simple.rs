//! Simple Chunk Codec
//!
//! Records are stored as a compressed table of sizes followed by the
//! compressed concatenation of the record bytes:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ compression type: u8         │
//! │ size of size table: varint   │
//! │ size table (compressed)      │  varint record sizes
//! │ values (compressed)          │  record bytes, concatenated
//! └──────────────────────────────┘
//! ```
//!
//! No structure is assumed in the records; this is the codec for opaque
//! byte records and the baseline the transpose codec is measured against.

use crate::compress::{Compressor, Decompressor};
use reclog_bytes::varint_io::read_varint64;
use reclog_bytes::{ChainWriter, Reader, Writer};
use reclog_core::{varint, Chain, CompressionType, Error, Result};

/// Builds a simple chunk.
pub struct SimpleEncoder {
    compression: CompressionType,
    level: i32,
    sizes: Vec<u8>,
    values: Chain,
    num_records: u64,
}

impl SimpleEncoder {
    pub fn new(compression: CompressionType, level: i32) -> Self {
        Self {
            compression,
            level,
            sizes: Vec::new(),
            values: Chain::new(),
            num_records: 0,
        }
    }

    pub fn add_record(&mut self, record: &[u8]) {
        varint::write_varint64(record.len() as u64, &mut self.sizes);
        self.values.append_slice(record);
        self.num_records += 1;
    }

    pub fn add_record_chain(&mut self, record: &Chain) {
        varint::write_varint64(record.len(), &mut self.sizes);
        self.values.append_chain(record.clone());
        self.num_records += 1;
    }

    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    pub fn decoded_data_size(&self) -> u64 {
        self.values.len()
    }

    /// Produces the chunk data. Returns `(data, num_records,
    /// decoded_data_size)`.
    pub fn encode(self) -> Result<(Chain, u64, u64)> {
        let num_records = self.num_records;
        let decoded_data_size = self.values.len();

        let mut dest = ChainWriter::new();
        dest.write_byte(self.compression.as_byte())?;

        let mut sizes_compressor = Compressor::new(self.compression, self.level);
        sizes_compressor.writer().write(&self.sizes)?;
        let mut sizes_section = reclog_bytes::VecWriter::new();
        sizes_compressor.encode(&mut sizes_section)?;
        let sizes_section = sizes_section.into_vec();
        let mut prefix = Vec::new();
        varint::write_varint64(sizes_section.len() as u64, &mut prefix);
        dest.write(&prefix)?;
        dest.write(&sizes_section)?;

        let mut values_compressor = Compressor::new(self.compression, self.level);
        values_compressor.writer().write_chain(&self.values)?;
        values_compressor.encode(&mut dest)?;

        Ok((dest.into_chain(), num_records, decoded_data_size))
    }
}

/// Decodes a simple chunk.
pub struct SimpleDecoder;

impl SimpleDecoder {
    /// Decodes `data`, returning the concatenated record values and the
    /// forward cumulative record end positions.
    pub fn decode(
        data: Chain,
        num_records: u64,
        decoded_data_size: u64,
    ) -> Result<(Chain, Vec<u64>)> {
        let mut src = reclog_bytes::ChainReader::new(data);
        let compression_byte = src
            .read_byte()?
            .ok_or_else(|| Error::invalid_data("reading compression type failed"))?;
        let compression = CompressionType::try_from(compression_byte)?;

        let sizes_size = read_varint64(&mut src)
            .map_err(|_| Error::invalid_data("reading size of sizes failed"))?;
        let mut sizes_section = Chain::new();
        if !src.read_chain(sizes_size, &mut sizes_section)? {
            return Err(Error::invalid_data("reading size table failed"));
        }
        let mut sizes_decompressor = Decompressor::new(sizes_section, compression)?;

        let mut limits = Vec::with_capacity(num_records.min(1 << 20) as usize);
        let mut limit = 0u64;
        for _ in 0..num_records {
            let size = read_varint64(sizes_decompressor.reader())
                .map_err(|_| Error::invalid_data("reading record size failed"))?;
            if size > decoded_data_size - limit {
                return Err(Error::invalid_data(
                    "decoded data size larger than expected",
                ));
            }
            limit += size;
            limits.push(limit);
        }
        sizes_decompressor.verify_end()?;
        if limit != decoded_data_size {
            return Err(Error::invalid_data(
                "decoded data size smaller than expected",
            ));
        }

        let mut values_section = Chain::new();
        let remaining = src.size()? - src.pos();
        src.read_chain(remaining, &mut values_section)?;
        let mut values_decompressor = Decompressor::new(values_section, compression)?;
        let mut values = Chain::new();
        if !values_decompressor
            .reader()
            .read_chain(decoded_data_size, &mut values)?
        {
            return Err(Error::invalid_data("reading record values failed"));
        }
        values_decompressor.verify_end()?;
        Ok((values, limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::DEFAULT_ZSTD_LEVEL;

    fn roundtrip(records: &[&[u8]], compression: CompressionType) {
        let mut encoder = SimpleEncoder::new(compression, DEFAULT_ZSTD_LEVEL);
        for record in records {
            encoder.add_record(record);
        }
        let (data, num_records, decoded_data_size) = encoder.encode().unwrap();
        assert_eq!(num_records, records.len() as u64);

        let (values, limits) = SimpleDecoder::decode(data, num_records, decoded_data_size).unwrap();
        assert_eq!(limits.len(), records.len());
        let flat = values.to_vec();
        let mut begin = 0usize;
        for (record, &limit) in records.iter().zip(limits.iter()) {
            assert_eq!(&flat[begin..limit as usize], *record);
            begin = limit as usize;
        }
        assert_eq!(begin as u64, decoded_data_size);
    }

    #[test]
    fn test_roundtrip_uncompressed() {
        roundtrip(&[b"", b"a", b"bc", b"def"], CompressionType::None);
    }

    #[test]
    fn test_roundtrip_zstd() {
        roundtrip(&[b"hello", b"world", b"hello world"], CompressionType::Zstd);
    }

    #[test]
    fn test_roundtrip_snappy() {
        roundtrip(&[b"snap", b"", b"crackle", b"pop"], CompressionType::Snappy);
    }

    #[test]
    fn test_roundtrip_empty_chunk() {
        roundtrip(&[], CompressionType::None);
        roundtrip(&[], CompressionType::Zstd);
    }

    #[test]
    fn test_roundtrip_large_records() {
        let big: Vec<u8> = (0..300_000u32).map(|i| (i % 256) as u8).collect();
        roundtrip(&[&big, b"small", &big], CompressionType::Zstd);
    }

    #[test]
    fn test_decode_rejects_wrong_decoded_size() {
        let mut encoder = SimpleEncoder::new(CompressionType::None, 0);
        encoder.add_record(b"abc");
        let (data, num_records, decoded_data_size) = encoder.encode().unwrap();
        let err = SimpleDecoder::decode(data, num_records, decoded_data_size + 1).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_decode_rejects_wrong_record_count() {
        let mut encoder = SimpleEncoder::new(CompressionType::None, 0);
        encoder.add_record(b"abc");
        encoder.add_record(b"def");
        let (data, _, decoded_data_size) = encoder.encode().unwrap();
        assert!(SimpleDecoder::decode(data, 3, decoded_data_size).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_data() {
        let mut encoder = SimpleEncoder::new(CompressionType::None, 0);
        encoder.add_record(b"some record content");
        let (data, num_records, decoded_data_size) = encoder.encode().unwrap();
        let truncated = data.subrange(0, data.len() - 4);
        assert!(SimpleDecoder::decode(truncated, num_records, decoded_data_size).is_err());
    }
}
