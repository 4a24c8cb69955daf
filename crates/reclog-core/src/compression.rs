//! Compression Type Identifiers
//!
//! One byte on every compressed chunk section selects the codec. The byte
//! values are format constants; files written with one build must decode
//! with any other.
//!
//! The codec implementations live in the records crate; this module only
//! defines the identifier so the whole stack can name a codec without
//! linking the codecs themselves.

use crate::error::Error;

/// Compression codec selector stored in chunk data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Brotli = b'b',
    Zstd = b'z',
    Snappy = b's',
    HadoopSnappy = b'h',
}

impl CompressionType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionType::None),
            b'b' => Ok(CompressionType::Brotli),
            b'z' => Ok(CompressionType::Zstd),
            b's' => Ok(CompressionType::Snappy),
            b'h' => Ok(CompressionType::HadoopSnappy),
            _ => Err(Error::unsupported(format!(
                "unknown compression type: {value:#04x}"
            ))),
        }
    }
}
