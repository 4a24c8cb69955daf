//! Transpose codec tests: byte-exact round trips, hand-crafted state
//! machines, field projection, and malformed-input rejection.

use reclog_bytes::ChainBackwardWriter;
use reclog_records::transpose::{TransposeDecoder, TransposeEncoder};
use reclog_records::{Chain, CompressionType, Field, FieldProjection};

fn encode(records: &[&[u8]], compression: CompressionType) -> (Chain, u64, u64) {
    let mut encoder = TransposeEncoder::new(compression, 3, 1 << 16);
    for record in records {
        encoder.add_record(record);
    }
    encoder.encode().unwrap()
}

fn decode(
    data: Chain,
    num_records: u64,
    decoded_data_size: u64,
    projection: &FieldProjection,
) -> (Vec<u8>, Vec<u64>) {
    let mut dest = ChainBackwardWriter::new();
    let limits = TransposeDecoder::decode(
        num_records,
        decoded_data_size,
        projection,
        data,
        &mut dest,
    )
    .unwrap();
    (dest.into_chain().to_vec(), limits)
}

fn roundtrip(records: &[&[u8]], compression: CompressionType) {
    let (data, num_records, decoded_data_size) = encode(records, compression);
    assert_eq!(num_records, records.len() as u64);
    let (decoded, limits) = decode(
        data,
        num_records,
        decoded_data_size,
        &FieldProjection::all(),
    );
    assert_eq!(limits.len(), records.len());
    let mut begin = 0usize;
    for (index, record) in records.iter().enumerate() {
        let end = limits[index] as usize;
        assert_eq!(&decoded[begin..end], *record, "record {index}");
        begin = end;
    }
    assert_eq!(begin, decoded.len());
}

// -------------------------------------------------------------------
// Round trips
// -------------------------------------------------------------------

#[test]
fn test_roundtrip_single_varint_field() {
    roundtrip(&[&[0x08, 0x01]], CompressionType::None);
}

#[test]
fn test_roundtrip_multi_byte_varint() {
    // field 1 = 300, field 1 = 1.
    roundtrip(
        &[&[0x08, 0xac, 0x02], &[0x08, 0x01]],
        CompressionType::None,
    );
}

#[test]
fn test_roundtrip_strings() {
    roundtrip(
        &[b"\x12\x03abc", b"\x12\x00", b"\x12\x05hello"],
        CompressionType::None,
    );
}

#[test]
fn test_roundtrip_fixed_width_fields() {
    // field 3 fixed32, field 4 fixed64.
    roundtrip(
        &[
            &[0x1d, 0x01, 0x02, 0x03, 0x04],
            &[0x21, 1, 2, 3, 4, 5, 6, 7, 8],
            &[0x1d, 0xff, 0xff, 0xff, 0xff, 0x21, 0, 0, 0, 0, 0, 0, 0, 0x80],
        ],
        CompressionType::None,
    );
}

#[test]
fn test_roundtrip_submessage() {
    // field 5 { field 1 = 7 }
    roundtrip(&[&[0x2a, 0x02, 0x08, 0x07]], CompressionType::None);
}

#[test]
fn test_roundtrip_nested_submessages() {
    // field 5 { field 5 { field 1 = 1 } field 2 = "x" }
    let inner: &[u8] = &[0x2a, 0x02, 0x08, 0x01, 0x12, 0x01, b'x'];
    let mut outer = vec![0x2a, inner.len() as u8];
    outer.extend_from_slice(inner);
    roundtrip(&[&outer], CompressionType::None);
}

#[test]
fn test_roundtrip_groups() {
    // field 6 group { field 1 = 1 }
    roundtrip(&[&[0x33, 0x08, 0x01, 0x34]], CompressionType::None);
}

#[test]
fn test_roundtrip_empty_records() {
    roundtrip(&[b"", b"", b""], CompressionType::None);
}

#[test]
fn test_roundtrip_non_proto_records() {
    // Invalid tags force the non-proto path.
    roundtrip(
        &[&[0x00, 0x01], &[0xff, 0xff, 0xff], b"plain text"],
        CompressionType::None,
    );
}

#[test]
fn test_roundtrip_mixed_proto_and_non_proto() {
    roundtrip(
        &[&[0x08, 0x01], b"not a message \xff", &[0x12, 0x01, b'a']],
        CompressionType::None,
    );
}

#[test]
fn test_roundtrip_non_canonical_varint_value() {
    // field 1 = 0 encoded in two bytes; must survive byte-exactly.
    roundtrip(&[&[0x08, 0x80, 0x00]], CompressionType::None);
}

#[test]
fn test_roundtrip_repeated_fields() {
    roundtrip(
        &[&[0x08, 0x01, 0x08, 0x02, 0x08, 0x03, 0x12, 0x01, b'a', 0x12, 0x01, b'b']],
        CompressionType::None,
    );
}

#[test]
fn test_roundtrip_many_distinct_fields_use_ladder() {
    // More than 63 distinct nodes forces multi-hop transitions.
    let mut record = Vec::new();
    for field in 1..=100u32 {
        let tag = field << 3; // varint wire type
        prost_varint(u64::from(tag), &mut record);
        record.push((field % 128) as u8);
    }
    roundtrip(&[&record], CompressionType::None);
}

fn prost_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            out.push(value as u8);
            return;
        }
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
}

#[test]
fn test_roundtrip_compressed() {
    let records: Vec<Vec<u8>> = (0..200u32)
        .map(|i| {
            let mut record = vec![0x08];
            prost_varint(u64::from(i * 1000), &mut record);
            record.extend_from_slice(b"\x12\x06common");
            record
        })
        .collect();
    let slices: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
    for compression in [
        CompressionType::Zstd,
        CompressionType::Snappy,
        CompressionType::HadoopSnappy,
        CompressionType::Brotli,
    ] {
        roundtrip(&slices, compression);
    }
}

#[test]
fn test_transposed_data_compresses_structured_records() {
    // Many records sharing structure: the columnar layout plus a general
    // codec should shrink the data substantially.
    let records: Vec<Vec<u8>> = (0..500u32)
        .map(|i| {
            let mut record = vec![0x08];
            prost_varint(1_000_000 + u64::from(i), &mut record);
            record.extend_from_slice(b"\x12\x10payload-payload-");
            record.push(0x1d);
            record.extend_from_slice(&(i as u32).to_le_bytes());
            record
        })
        .collect();
    let slices: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
    let total: usize = slices.iter().map(|r| r.len()).sum();

    let (transposed, _, decoded_data_size) = encode(&slices, CompressionType::Zstd);
    assert_eq!(decoded_data_size as usize, total);
    assert!(
        (transposed.len() as usize) < total / 2,
        "transposed {} !< {} / 2",
        transposed.len(),
        total
    );
}

// -------------------------------------------------------------------
// Hand-crafted machines (implicit nodes and iteration counts)
// -------------------------------------------------------------------

/// Builds transpose chunk data from raw header and transition bytes,
/// uncompressed.
fn raw_chunk(header: &[u8], transitions: &[u8]) -> Chain {
    let mut data = vec![0u8]; // compression: none
    prost_varint(header.len() as u64, &mut data);
    data.extend_from_slice(header);
    data.extend_from_slice(transitions);
    Chain::from(data)
}

#[test]
fn test_decode_implicit_node() {
    // Node 0: field 1 varint inlined value 5, implicit edge to node 1.
    // Node 1: start-of-message, edge to node 0.
    let header = [
        0, 0, // no buckets, no buffers
        2,    // state machine size
        0x08, 2, // tags: field 1 varint, start-of-message
        3, 0, // next nodes: 1 + S (implicit), 0
        15, // subtype: inline value 5
        0,  // first node
    ];
    let data = raw_chunk(&header, &[]);
    let mut dest = ChainBackwardWriter::new();
    let limits =
        TransposeDecoder::decode(1, 2, &FieldProjection::all(), data, &mut dest).unwrap();
    assert_eq!(limits, vec![2]);
    assert_eq!(dest.into_chain().to_vec(), vec![0x08, 0x05]);
}

#[test]
fn test_decode_transition_iteration_count() {
    // Same machine; one transition byte with two extra iterations decodes
    // three more records.
    let header = [0, 0, 2, 0x08, 2, 3, 0, 15, 0];
    let data = raw_chunk(&header, &[0b0000_0010]); // delta 0, iterations 2
    let mut dest = ChainBackwardWriter::new();
    let limits =
        TransposeDecoder::decode(4, 8, &FieldProjection::all(), data, &mut dest).unwrap();
    assert_eq!(limits, vec![2, 4, 6, 8]);
    assert_eq!(
        dest.into_chain().to_vec(),
        vec![0x08, 0x05, 0x08, 0x05, 0x08, 0x05, 0x08, 0x05]
    );
}

#[test]
fn test_decode_rejects_implicit_loop() {
    // One start-of-message node whose implicit edge points at itself.
    let header = [
        0, 0, // no buckets, no buffers
        1, // state machine size
        2, // tag: start-of-message
        1, // next: 0 + S (implicit self loop)
        0, // first node
    ];
    let data = raw_chunk(&header, &[]);
    let mut dest = ChainBackwardWriter::new();
    let err = TransposeDecoder::decode(1, 0, &FieldProjection::all(), data, &mut dest)
        .unwrap_err();
    assert!(err.to_string().contains("implicit loop"), "{err}");
}

#[test]
fn test_decode_rejects_record_count_mismatch() {
    let (data, _, decoded_data_size) = encode(&[&[0x08, 0x01]], CompressionType::None);
    let mut dest = ChainBackwardWriter::new();
    let err = TransposeDecoder::decode(2, decoded_data_size, &FieldProjection::all(), data, &mut dest)
        .unwrap_err();
    assert!(err.to_string().contains("records"), "{err}");
}

#[test]
fn test_decode_rejects_truncated_data() {
    let (data, num_records, decoded_data_size) =
        encode(&[&[0x12, 0x03, b'a', b'b', b'c']], CompressionType::None);
    let truncated = data.subrange(0, data.len() - 2);
    let mut dest = ChainBackwardWriter::new();
    assert!(TransposeDecoder::decode(
        num_records,
        decoded_data_size,
        &FieldProjection::all(),
        truncated,
        &mut dest
    )
    .is_err());
}

#[test]
fn test_decode_rejects_bad_first_node() {
    let header = [0, 0, 1, 2, 0, 5]; // first node 5 >= S
    let data = raw_chunk(&header, &[]);
    let mut dest = ChainBackwardWriter::new();
    assert!(
        TransposeDecoder::decode(1, 0, &FieldProjection::all(), data, &mut dest).is_err()
    );
}

#[test]
fn test_decode_rejects_invalid_tag() {
    // Tag 7 is below the first valid field tag but not a message marker.
    let header = [0, 0, 1, 7, 0, 0];
    let data = raw_chunk(&header, &[]);
    let mut dest = ChainBackwardWriter::new();
    assert!(
        TransposeDecoder::decode(1, 0, &FieldProjection::all(), data, &mut dest).is_err()
    );
}

// -------------------------------------------------------------------
// Field projection
// -------------------------------------------------------------------

/// record: field 1 = "abc", field 2 = "defg", field 3 = 300 (varint)
fn projection_record() -> Vec<u8> {
    let mut record = Vec::new();
    record.extend_from_slice(b"\x0a\x03abc");
    record.extend_from_slice(b"\x12\x04defg");
    record.extend_from_slice(&[0x18, 0xac, 0x02]);
    record
}

#[test]
fn test_projection_keeps_included_field() {
    let record = projection_record();
    let (data, num_records, decoded_data_size) =
        encode(&[&record], CompressionType::None);
    let projection = FieldProjection::new(vec![Field::new([1])]);
    let (decoded, limits) = decode(data, num_records, decoded_data_size, &projection);
    assert_eq!(limits.len(), 1);
    // Only field 1 survives.
    assert_eq!(decoded, b"\x0a\x03abc");
}

#[test]
fn test_projection_excluded_field_absent() {
    let record = projection_record();
    let (data, num_records, decoded_data_size) =
        encode(&[&record], CompressionType::Zstd);
    let projection = FieldProjection::new(vec![Field::new([1]), Field::new([3])]);
    let (decoded, _) = decode(data, num_records, decoded_data_size, &projection);
    let mut expected = Vec::new();
    expected.extend_from_slice(b"\x0a\x03abc");
    expected.extend_from_slice(&[0x18, 0xac, 0x02]);
    assert_eq!(decoded, expected);
}

#[test]
fn test_projection_existence_only_varint_becomes_zero() {
    let record = projection_record();
    let (data, num_records, decoded_data_size) =
        encode(&[&record], CompressionType::None);
    let projection = FieldProjection::new(vec![Field::existence_only([3])]);
    let (decoded, _) = decode(data, num_records, decoded_data_size, &projection);
    // Field 3 present with value zero; others absent.
    assert_eq!(decoded, &[0x18, 0x00]);
}

#[test]
fn test_projection_nested_path() {
    // field 5 { field 1 = 1; field 2 = "xy" }, field 1 = "no"
    let record = b"\x2a\x06\x08\x01\x12\x02xy\x0a\x02no".to_vec();
    let (data, num_records, decoded_data_size) =
        encode(&[&record], CompressionType::None);
    let projection = FieldProjection::new(vec![Field::new([5, 1])]);
    let (decoded, _) = decode(data, num_records, decoded_data_size, &projection);
    // Submessage kept with only its field 1; top-level field 1 dropped.
    assert_eq!(decoded, b"\x2a\x02\x08\x01");
}

#[test]
fn test_projection_all_is_identity() {
    let record = projection_record();
    let (data, num_records, decoded_data_size) =
        encode(&[&record], CompressionType::None);
    let (decoded, _) = decode(
        data,
        num_records,
        decoded_data_size,
        &FieldProjection::all(),
    );
    assert_eq!(decoded, record);
}

#[test]
fn test_projection_non_proto_records_pass_through() {
    let records: &[&[u8]] = &[b"\xff\xffraw", &[0x08, 0x07]];
    let (data, num_records, decoded_data_size) = encode(records, CompressionType::None);
    let projection = FieldProjection::new(vec![Field::new([1])]);
    let mut dest = ChainBackwardWriter::new();
    let limits = TransposeDecoder::decode(
        num_records,
        decoded_data_size,
        &projection,
        data,
        &mut dest,
    )
    .unwrap();
    let decoded = dest.into_chain().to_vec();
    assert_eq!(limits.len(), 2);
    // The non-proto record survives in full; the proto record keeps field 1.
    assert_eq!(&decoded[..limits[0] as usize], b"\xff\xffraw");
    assert_eq!(&decoded[limits[0] as usize..], &[0x08, 0x07]);
}

#[test]
fn test_projection_of_submessage_includes_subtree() {
    // Including [5] fully keeps the whole submessage.
    let record = b"\x2a\x06\x08\x01\x12\x02xy\x0a\x02no".to_vec();
    let (data, num_records, decoded_data_size) =
        encode(&[&record], CompressionType::None);
    let projection = FieldProjection::new(vec![Field::new([5])]);
    let (decoded, _) = decode(data, num_records, decoded_data_size, &projection);
    assert_eq!(decoded, b"\x2a\x06\x08\x01\x12\x02xy");
}

// -------------------------------------------------------------------
// Typed records through prost
// -------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
struct Sample {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(bytes = "vec", tag = "2")]
    payload: Vec<u8>,
    #[prost(uint64, tag = "3")]
    count: u64,
}

#[test]
fn test_prost_messages_roundtrip() {
    use prost::Message;
    let samples: Vec<Sample> = (0..50)
        .map(|i| Sample {
            name: format!("record-{i}"),
            payload: vec![i as u8; (i % 7) as usize],
            count: i as u64 * 977,
        })
        .collect();
    let encoded: Vec<Vec<u8>> = samples.iter().map(|s| s.encode_to_vec()).collect();
    let slices: Vec<&[u8]> = encoded.iter().map(|r| r.as_slice()).collect();
    roundtrip(&slices, CompressionType::Zstd);
}

#[test]
fn test_prost_projection_drops_field() {
    use prost::Message;
    let sample = Sample {
        name: "kept".to_string(),
        payload: b"dropped".to_vec(),
        count: 9,
    };
    let (data, num_records, decoded_data_size) =
        encode(&[&sample.encode_to_vec()], CompressionType::Zstd);
    let projection = FieldProjection::new(vec![Field::new([1]), Field::new([3])]);
    let (decoded, _) = decode(data, num_records, decoded_data_size, &projection);
    let parsed = Sample::decode(decoded.as_slice()).unwrap();
    assert_eq!(parsed.name, "kept");
    assert_eq!(parsed.count, 9);
    assert!(parsed.payload.is_empty());
}
