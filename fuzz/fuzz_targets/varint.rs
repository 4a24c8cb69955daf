#![no_main]

use libfuzzer_sys::fuzz_target;
use reclog_core::{ordered_varint, varint};

fuzz_target!(|data: &[u8]| {
    // Decoders accept arbitrary bytes and never panic; every accepted
    // value re-encodes to a decodable form of the same value.
    if let Some((value, len)) = varint::read_varint64(data) {
        assert!(len <= varint::MAX_LEN_VARINT64);
        let mut reencoded = Vec::new();
        varint::write_varint64(value, &mut reencoded);
        assert_eq!(varint::read_varint64(&reencoded), Some((value, reencoded.len())));
    }
    if let Some((_, len)) = varint::read_varint32(data) {
        assert!(len <= varint::MAX_LEN_VARINT32);
    }

    if let Some((value, len)) = ordered_varint::read_ordered_varint64(data) {
        assert!(len <= ordered_varint::MAX_LEN_ORDERED_VARINT64);
        // Ordered varints are canonical: re-encoding reproduces the input.
        let mut reencoded = Vec::new();
        ordered_varint::write_ordered_varint64(value, &mut reencoded);
        assert_eq!(&data[..len], &reencoded[..]);
    }
});
