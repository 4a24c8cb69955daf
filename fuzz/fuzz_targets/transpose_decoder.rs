#![no_main]

use libfuzzer_sys::fuzz_target;
use reclog_bytes::ChainBackwardWriter;
use reclog_records::transpose::TransposeDecoder;
use reclog_records::{Chain, Field, FieldProjection};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    // First bytes pick the declared shape; the rest is the chunk data.
    let num_records = u64::from(data[0] % 8);
    let decoded_data_size = u64::from(data[1]) * 16;
    let chunk = Chain::from(&data[2..]);

    // The decoder must reject malformed state machines, bucket tables,
    // transition streams and buffer contents without panicking, with and
    // without projection.
    let mut dest = ChainBackwardWriter::new();
    let _ = TransposeDecoder::decode(
        num_records,
        decoded_data_size,
        &FieldProjection::all(),
        chunk.clone(),
        &mut dest,
    );

    let projection = FieldProjection::new(vec![Field::new([1]), Field::existence_only([2, 3])]);
    let mut dest = ChainBackwardWriter::new();
    let _ = TransposeDecoder::decode(
        num_records,
        decoded_data_size,
        &projection,
        chunk,
        &mut dest,
    );
});
