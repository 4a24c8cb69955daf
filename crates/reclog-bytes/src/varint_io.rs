//! Varint and Ordered-varint I/O over Readers and Writers
//!
//! Bridges the slice-level codecs in `reclog-core` to the cursor protocol:
//! reads pull up to the maximum encoded length and parse from the window,
//! writes encode into a stack buffer and push it out in one call.

use crate::reader::Reader;
use crate::writer::Writer;
use reclog_core::error::{Error, Result};
use reclog_core::ordered_varint::{
    read_ordered_varint64 as decode_ordered64, write_ordered_varint64 as encode_ordered64,
    MAX_LEN_ORDERED_VARINT64,
};
use reclog_core::varint;

/// Reads a 64-bit varint; fails on end of stream or malformed encoding.
pub fn read_varint64<R: Reader + ?Sized>(src: &mut R) -> Result<u64> {
    src.pull(varint::MAX_LEN_VARINT64, varint::MAX_LEN_VARINT64)?;
    match varint::read_varint64(src.buffer()) {
        Some((value, len)) => {
            src.consume(len);
            Ok(value)
        }
        None => Err(Error::invalid_data(format!(
            "invalid varint at position {}",
            src.pos()
        ))),
    }
}

/// Reads a 32-bit varint; fails on end of stream or malformed encoding.
pub fn read_varint32<R: Reader + ?Sized>(src: &mut R) -> Result<u32> {
    src.pull(varint::MAX_LEN_VARINT32, varint::MAX_LEN_VARINT32)?;
    match varint::read_varint32(src.buffer()) {
        Some((value, len)) => {
            src.consume(len);
            Ok(value)
        }
        None => Err(Error::invalid_data(format!(
            "invalid varint at position {}",
            src.pos()
        ))),
    }
}

/// Writes a 64-bit varint.
pub fn write_varint64<W: Writer + ?Sized>(value: u64, dest: &mut W) -> Result<()> {
    let mut buf = [0u8; varint::MAX_LEN_VARINT64];
    let len = varint::encode_varint64(value, &mut buf);
    dest.write(&buf[..len])
}

/// Writes a 32-bit varint.
pub fn write_varint32<W: Writer + ?Sized>(value: u32, dest: &mut W) -> Result<()> {
    write_varint64(u64::from(value), dest)
}

/// Reads an ordered 64-bit varint; fails on end of stream, malformed or
/// non-canonical encodings.
pub fn read_ordered_varint64<R: Reader + ?Sized>(src: &mut R) -> Result<u64> {
    src.pull(MAX_LEN_ORDERED_VARINT64, MAX_LEN_ORDERED_VARINT64)?;
    match decode_ordered64(src.buffer()) {
        Some((value, len)) => {
            src.consume(len);
            Ok(value)
        }
        None => Err(Error::invalid_data(format!(
            "invalid ordered varint at position {}",
            src.pos()
        ))),
    }
}

/// Writes an ordered 64-bit varint.
pub fn write_ordered_varint64<W: Writer + ?Sized>(value: u64, dest: &mut W) -> Result<()> {
    let mut buf = Vec::with_capacity(MAX_LEN_ORDERED_VARINT64);
    encode_ordered64(value, &mut buf);
    dest.write(&buf)
}
