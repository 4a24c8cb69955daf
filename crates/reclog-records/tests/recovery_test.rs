//! Corruption and recovery tests at the record level: a damaged chunk is
//! skipped exactly, surrounding records survive, and the recovery callback
//! keeps iteration going.

use reclog_bytes::{FlushType, SliceReader, VecWriter};
use reclog_records::{
    CompressionType, RecordReader, RecordReaderOptions, RecordWriter, RecordWriterOptions,
    SkippedRegion,
};
use std::sync::{Arc, Mutex};

/// Writes `count` records of `len` bytes and returns the file bytes plus
/// each record's (position, payload).
fn build_file(count: u32, len: usize, chunk_size: u64) -> (Vec<u8>, Vec<(u64, Vec<u8>)>) {
    let mut writer = RecordWriter::new(
        VecWriter::new(),
        RecordWriterOptions {
            chunk_size,
            compression: CompressionType::None,
            ..Default::default()
        },
    )
    .unwrap();
    let mut records = Vec::new();
    for i in 0..count {
        let payload: Vec<u8> = (0..len).map(|j| (i as usize + j) as u8).collect();
        let position = writer.write_record(&payload).unwrap();
        records.push((position.numeric(), payload));
    }
    let bytes = writer.close(FlushType::FromObject).unwrap().into_vec();
    (bytes, records)
}

/// Chunk boundaries of a file, via the chunk layer.
fn chunk_boundaries(bytes: &[u8]) -> Vec<u64> {
    let mut reader = reclog_records::ChunkReader::new(SliceReader::from_slice(bytes));
    let mut boundaries = vec![0u64];
    while reader.read_chunk().unwrap().is_some() {
        boundaries.push(reader.pos());
    }
    boundaries
}

#[test]
fn test_single_corrupt_chunk_skipped_exactly() {
    let (mut bytes, records) = build_file(400, 100, 4096);
    let boundaries = chunk_boundaries(&bytes);
    // Corrupt the middle of the 8th chunk (index 7 after the signature).
    let begin = boundaries[8];
    let end = boundaries[9];
    bytes[(begin + (end - begin) / 2) as usize] ^= 0x20;

    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    let mut seen = Vec::new();
    let mut regions: Vec<SkippedRegion> = Vec::new();
    loop {
        match reader.read_record() {
            Ok(Some(record)) => seen.push(record.to_vec()),
            Ok(None) => break,
            Err(e) => {
                let region = reader.recover().unwrap().expect("recoverable");
                assert!(
                    e.to_string().contains("hash mismatch")
                        || e.to_string().contains("invalid"),
                    "{e}"
                );
                regions.push(region);
            }
        }
    }
    reader.close().unwrap();

    // Exactly one region, covering exactly the damaged chunk.
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].begin, begin);
    assert_eq!(regions[0].end, end);
    assert!(regions[0].message.contains("hash mismatch"));

    // All records outside the damaged chunk survive, in order.
    let expected: Vec<Vec<u8>> = records
        .iter()
        .filter(|(pos, _)| *pos < begin || *pos >= end)
        .map(|(_, payload)| payload.clone())
        .collect();
    assert_eq!(seen.len(), expected.len());
    assert_eq!(seen, expected);
}

#[test]
fn test_recovery_callback_resumes_iteration() {
    let (mut bytes, records) = build_file(200, 64, 2048);
    let boundaries = chunk_boundaries(&bytes);
    bytes[(boundaries[3] + 60) as usize] ^= 0xff;
    bytes[(boundaries[6] + 60) as usize] ^= 0xff;

    let regions: Arc<Mutex<Vec<SkippedRegion>>> = Arc::new(Mutex::new(Vec::new()));
    let regions_sink = Arc::clone(&regions);
    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions {
            recovery: Some(Box::new(move |region| {
                regions_sink.lock().unwrap().push(region.clone());
                true
            })),
            ..Default::default()
        },
    );

    let mut count = 0usize;
    while reader.read_record().unwrap().is_some() {
        count += 1;
    }
    let regions = regions.lock().unwrap();
    assert_eq!(regions.len(), 2);
    assert!(count < records.len());
    assert!(count > 0);
}

#[test]
fn test_recovery_callback_can_stop_iteration() {
    let (mut bytes, _) = build_file(100, 64, 1024);
    let boundaries = chunk_boundaries(&bytes);
    bytes[(boundaries[2] + 50) as usize] ^= 0x01;

    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions {
            recovery: Some(Box::new(|_| false)),
            ..Default::default()
        },
    );
    let mut count = 0usize;
    // Ends without error when the callback declines to continue.
    while reader.read_record().unwrap().is_some() {
        count += 1;
    }
    assert!(count > 0);
}

#[test]
fn test_without_recovery_error_is_sticky_until_recover() {
    let (mut bytes, _) = build_file(50, 64, 1024);
    let boundaries = chunk_boundaries(&bytes);
    bytes[(boundaries[1] + 48) as usize] ^= 0x01;

    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    let err = loop {
        match reader.read_record() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("corruption not detected"),
            Err(e) => break e,
        }
    };
    assert!(err.is_corruption());
    // Recovery succeeds and reading continues.
    assert!(reader.recover().unwrap().is_some());
    let mut remaining = 0usize;
    while reader.read_record().unwrap().is_some() {
        remaining += 1;
    }
    assert!(remaining > 0);
}

#[test]
fn test_truncated_file_reports_data_loss_on_close() {
    let (bytes, _) = build_file(100, 64, 1 << 20);
    let cut = bytes.len() - 33;
    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes[..cut]),
        RecordReaderOptions::default(),
    );
    while reader.read_record().unwrap().is_some() {}
    let err = reader.close().unwrap_err();
    assert!(matches!(err, reclog_records::Error::DataLoss(_)), "{err}");
}

#[test]
fn test_transpose_chunk_corruption_recovers_too() {
    let records: Vec<Vec<u8>> = (0..200u32)
        .map(|i| vec![0x08, (i % 0x70) as u8, 0x12, 0x02, b'h', b'i'])
        .collect();
    let mut writer = RecordWriter::new(
        VecWriter::new(),
        RecordWriterOptions {
            chunk_size: 512,
            transpose: true,
            compression: CompressionType::Zstd,
            ..Default::default()
        },
    )
    .unwrap();
    for record in &records {
        writer.write_record(record).unwrap();
    }
    let mut bytes = writer.close(FlushType::FromObject).unwrap().into_vec();
    let boundaries = chunk_boundaries(&bytes);
    bytes[(boundaries[4] + 70) as usize] ^= 0x08;

    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    let mut seen = 0usize;
    let mut skipped = 0usize;
    loop {
        match reader.read_record() {
            Ok(Some(_)) => seen += 1,
            Ok(None) => break,
            Err(_) => {
                assert!(reader.recover().unwrap().is_some());
                skipped += 1;
            }
        }
    }
    assert_eq!(skipped, 1);
    assert!(seen > 0);
    assert!(seen < records.len());
}
