#![no_main]

use libfuzzer_sys::fuzz_target;
use reclog_bytes::SliceReader;
use reclog_records::{RecordReader, RecordReaderOptions};

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the whole read stack. Every malformed input
    // must fail cleanly, never panic:
    // - invalid block/chunk header hashes
    // - truncated chunks and headers
    // - bogus chunk types, sizes and record counts
    // - corrupted compressed sections
    let mut reader = RecordReader::new(
        SliceReader::from_slice(data),
        RecordReaderOptions::default(),
    );
    let mut steps = 0usize;
    loop {
        match reader.read_record() {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => match reader.recover() {
                Ok(Some(_)) => {}
                _ => break,
            },
        }
        steps += 1;
        if steps > 1 << 16 {
            break;
        }
    }
    let _ = reader.close();
});
