//! Binary search over records by content, including across corruption.

use reclog_bytes::{FlushType, SliceReader, VecWriter};
use reclog_records::record_reader::SearchOrdering;
use reclog_records::{
    CompressionType, RecordReader, RecordReaderOptions, RecordWriter, RecordWriterOptions,
};

/// Records keyed by a big-endian u64 prefix, ascending.
fn build_keyed_file(count: u64, stride: u64) -> Vec<u8> {
    let mut writer = RecordWriter::new(
        VecWriter::new(),
        RecordWriterOptions {
            chunk_size: 1024,
            compression: CompressionType::None,
            ..Default::default()
        },
    )
    .unwrap();
    for i in 0..count {
        let key = i * stride;
        let mut record = key.to_be_bytes().to_vec();
        record.extend_from_slice(b" payload");
        writer.write_record(&record).unwrap();
    }
    writer.close(FlushType::FromObject).unwrap().into_vec()
}

fn key_of(record: &[u8]) -> u64 {
    u64::from_be_bytes(record[..8].try_into().unwrap())
}

fn probe(target: u64) -> impl FnMut(&mut RecordReader<SliceReader>) -> reclog_records::Result<SearchOrdering>
{
    move |reader| {
        let record = match reader.read_record()? {
            Some(record) => record,
            None => return Ok(SearchOrdering::Unordered),
        };
        let key = key_of(&record);
        Ok(match key.cmp(&target) {
            std::cmp::Ordering::Less => SearchOrdering::Less,
            std::cmp::Ordering::Equal => SearchOrdering::Equivalent,
            std::cmp::Ordering::Greater => SearchOrdering::Greater,
        })
    }
}

#[test]
fn test_search_finds_existing_key() {
    let bytes = build_keyed_file(10_000, 1);
    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    let position = reader.search(probe(7777)).unwrap();
    reader.seek(position).unwrap();
    let record = reader.read_record().unwrap().expect("record at position");
    assert_eq!(key_of(&record), 7777);
}

#[test]
fn test_search_finds_first_of_duplicates() {
    let mut writer = RecordWriter::new(
        VecWriter::new(),
        RecordWriterOptions {
            chunk_size: 512,
            compression: CompressionType::None,
            ..Default::default()
        },
    )
    .unwrap();
    // Keys: 0,0,0,...,5,5,5,...,9,9,9 (100 of each).
    let mut first_of_five = None;
    for i in 0..1000u64 {
        let key = i / 100;
        let mut record = key.to_be_bytes().to_vec();
        record.extend_from_slice(&i.to_be_bytes());
        let pos = writer.write_record(&record).unwrap();
        if key == 5 && first_of_five.is_none() {
            first_of_five = Some(pos);
        }
    }
    let bytes = writer.close(FlushType::FromObject).unwrap().into_vec();
    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    let position = reader.search(probe(5)).unwrap();
    assert_eq!(position, first_of_five.unwrap());
}

#[test]
fn test_search_missing_key_lands_on_next_greater() {
    let bytes = build_keyed_file(5000, 2); // even keys only
    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    let position = reader.search(probe(777)).unwrap(); // odd: absent
    reader.seek(position).unwrap();
    let record = reader.read_record().unwrap().expect("record at position");
    assert_eq!(key_of(&record), 778);
}

#[test]
fn test_search_past_all_keys_lands_at_end() {
    let bytes = build_keyed_file(1000, 1);
    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    let position = reader.search(probe(u64::MAX)).unwrap();
    reader.seek(position).unwrap();
    assert!(reader.read_record().unwrap().is_none());
}

#[test]
fn test_search_before_all_keys_lands_on_first() {
    let bytes = build_keyed_file(1000, 1);
    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    // All keys are >= 0; search(0) finds the very first record.
    let position = reader.search(probe(0)).unwrap();
    reader.seek(position).unwrap();
    let record = reader.read_record().unwrap().expect("record");
    assert_eq!(key_of(&record), 0);
}

#[test]
fn test_search_converges_across_corruption() {
    let mut bytes = build_keyed_file(10_000, 1);
    // Corrupt one chunk somewhere in the middle of the file.
    let victim = bytes.len() / 2;
    bytes[victim] ^= 0x44;

    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    // A target well clear of the damaged area is still found exactly.
    let position = reader.search(probe(9_500)).unwrap();
    reader.seek(position).unwrap();
    let record = reader.read_record().unwrap().expect("record");
    assert_eq!(key_of(&record), 9_500);

    let position = reader.search(probe(1_000)).unwrap();
    reader.seek(position).unwrap();
    let record = reader.read_record().unwrap().expect("record");
    assert_eq!(key_of(&record), 1_000);
}

#[test]
fn test_search_probe_count_is_logarithmic() {
    let bytes = build_keyed_file(10_000, 1);
    let mut reader = RecordReader::new(
        SliceReader::from_slice(&bytes),
        RecordReaderOptions::default(),
    );
    let probes = std::cell::Cell::new(0usize);
    let position = reader
        .search(|reader| {
            probes.set(probes.get() + 1);
            let record = match reader.read_record()? {
                Some(record) => record,
                None => return Ok(SearchOrdering::Unordered),
            };
            Ok(match key_of(&record).cmp(&7777) {
                std::cmp::Ordering::Less => SearchOrdering::Less,
                std::cmp::Ordering::Equal => SearchOrdering::Equivalent,
                std::cmp::Ordering::Greater => SearchOrdering::Greater,
            })
        })
        .unwrap();
    reader.seek(position).unwrap();
    assert_eq!(key_of(&reader.read_record().unwrap().unwrap()), 7777);
    // 10k records in ~600 chunks: far fewer probes than records.
    assert!(probes.get() < 100, "{} probes", probes.get());
}
