//! Transpose Encoder
//!
//! Decomposes protobuf records into the columnar chunk layout the decoder
//! consumes. Each record is parsed into a field tree; records that fail
//! wire-format validation (or that the decoder could not reproduce
//! byte-identically, e.g. non-canonical tag encodings) pass through as
//! non-proto records.
//!
//! ## State machine construction
//!
//! A node is interned per (submessage path, tag, subtype). Keying by path
//! keeps projection-time classification stable: a node always executes
//! under the same ancestry, so the decoder may resolve its action once.
//! Data-bearing nodes own one buffer each; buffers fill in event order
//! (records walked last-to-first, fields within a record last-to-first),
//! which is exactly the order the decoder drains them in.
//!
//! Transition deltas carry only six bits, so node 0 is a no-op every
//! node returns to, and further no-op rungs sit at every 63rd index; any
//! target is reachable through them in a few bytes regardless of machine
//! size. Single-byte varint values are inlined into the subtype instead of
//! occupying buffer space.

use crate::compress::Compressor;
use crate::transpose::machine::*;
use crate::wire::{
    make_tag, tag_field_number, tag_wire_type, WireType, SUBMESSAGE_WIRE_TYPE_OFFSET,
};
use bytes::Bytes;
use reclog_bytes::{ChainWriter, Writer};
use reclog_core::varint;
use reclog_core::{Chain, CompressionType, Result};
use std::collections::HashMap;

/// Submessages nested deeper than this are stored as strings.
const MAX_RECURSION_DEPTH: usize = 100;

/// Root submessage context.
const ROOT_CONTEXT: u32 = 0;

/// Distance between no-op rungs in the node array.
const LADDER_STRIDE: usize = 63;

#[derive(Debug)]
enum FieldValue {
    /// Wire bytes of the varint payload, continuation bits intact.
    Varint(Bytes),
    Fixed32(Bytes),
    Fixed64(Bytes),
    /// Length prefix and payload, verbatim.
    String(Bytes),
    Submessage(Vec<FieldSpan>),
    Group(Vec<FieldSpan>),
}

#[derive(Debug)]
struct FieldSpan {
    field_number: u32,
    value: FieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeKey {
    context: u32,
    tag: u32,
    subtype: u8,
}

struct EncNode {
    /// Tag as stored in the header (may use the stolen wire type).
    raw_tag: u32,
    subtype: u8,
    /// Buffer in creation order, for data-bearing nodes.
    buffer: Option<usize>,
}

#[derive(Default)]
struct Builder {
    contexts: HashMap<(u32, u32), u32>,
    node_ids: HashMap<NodeKey, usize>,
    nodes: Vec<EncNode>,
    buffers: Vec<Vec<u8>>,
    /// Node ids in emission order; becomes the transition stream.
    events: Vec<usize>,
    nonproto_lengths: Vec<u8>,
    has_nonproto: bool,
}

impl Builder {
    fn context_for(&mut self, parent: u32, field_number: u32) -> u32 {
        let next = self.contexts.len() as u32 + 1;
        *self.contexts.entry((parent, field_number)).or_insert(next)
    }

    fn node_for(&mut self, context: u32, raw_tag: u32, subtype: u8, needs_buffer: bool) -> usize {
        let key = NodeKey {
            context,
            tag: raw_tag,
            subtype,
        };
        if let Some(&id) = self.node_ids.get(&key) {
            return id;
        }
        let buffer = needs_buffer.then(|| {
            self.buffers.push(Vec::new());
            self.buffers.len() - 1
        });
        let id = self.nodes.len();
        self.nodes.push(EncNode {
            raw_tag,
            subtype,
            buffer,
        });
        self.node_ids.insert(key, id);
        id
    }

    fn emit_record(&mut self, record: &Bytes, fields: Option<&[FieldSpan]>) {
        match fields {
            None => {
                let node = self.node_for(ROOT_CONTEXT, MESSAGE_ID_NON_PROTO, SUBTYPE_TRIVIAL, true);
                let buffer = self.nodes[node].buffer.expect("non-proto node has a buffer");
                self.buffers[buffer].extend_from_slice(record);
                varint::write_varint64(record.len() as u64, &mut self.nonproto_lengths);
                self.has_nonproto = true;
                self.events.push(node);
            }
            Some(fields) => {
                self.emit_fields(fields, ROOT_CONTEXT);
                let node = self.node_for(
                    ROOT_CONTEXT,
                    MESSAGE_ID_START_OF_MESSAGE,
                    SUBTYPE_TRIVIAL,
                    false,
                );
                self.events.push(node);
            }
        }
    }

    /// Emits a message's fields in reverse order so the backward-writing
    /// decoder reproduces the forward bytes.
    fn emit_fields(&mut self, fields: &[FieldSpan], context: u32) {
        for field in fields.iter().rev() {
            let field_number = field.field_number;
            match &field.value {
                FieldValue::Varint(payload) => {
                    let tag = make_tag(field_number, WireType::Varint);
                    if payload.len() == 1 {
                        // The whole value fits into the subtype byte.
                        let node = self.node_for(
                            context,
                            tag,
                            SUBTYPE_VARINT_INLINE_0 + payload[0],
                            false,
                        );
                        self.events.push(node);
                    } else {
                        let subtype = SUBTYPE_VARINT_1 + (payload.len() - 1) as u8;
                        let node = self.node_for(context, tag, subtype, true);
                        let buffer = self.nodes[node].buffer.expect("varint node has a buffer");
                        self.buffers[buffer]
                            .extend(payload.iter().map(|&byte| byte & 0x7f));
                        self.events.push(node);
                    }
                }
                FieldValue::Fixed32(payload) => {
                    let tag = make_tag(field_number, WireType::Fixed32);
                    let node = self.node_for(context, tag, SUBTYPE_TRIVIAL, true);
                    let buffer = self.nodes[node].buffer.expect("fixed node has a buffer");
                    self.buffers[buffer].extend_from_slice(payload);
                    self.events.push(node);
                }
                FieldValue::Fixed64(payload) => {
                    let tag = make_tag(field_number, WireType::Fixed64);
                    let node = self.node_for(context, tag, SUBTYPE_TRIVIAL, true);
                    let buffer = self.nodes[node].buffer.expect("fixed node has a buffer");
                    self.buffers[buffer].extend_from_slice(payload);
                    self.events.push(node);
                }
                FieldValue::String(prefixed) => {
                    let tag = make_tag(field_number, WireType::LengthDelimited);
                    let node =
                        self.node_for(context, tag, SUBTYPE_LENGTH_DELIMITED_STRING, true);
                    let buffer = self.nodes[node].buffer.expect("string node has a buffer");
                    self.buffers[buffer].extend_from_slice(prefixed);
                    self.events.push(node);
                }
                FieldValue::Submessage(sub_fields) => {
                    // Backward order: the end marker first, the content,
                    // then the start marker that emits length and tag.
                    let stolen_tag =
                        make_tag(field_number, WireType::LengthDelimited) + SUBMESSAGE_WIRE_TYPE_OFFSET;
                    let end_node = self.node_for(
                        context,
                        stolen_tag,
                        SUBTYPE_LENGTH_DELIMITED_END_OF_SUBMESSAGE,
                        false,
                    );
                    self.events.push(end_node);
                    let child = self.context_for(context, field_number);
                    self.emit_fields(sub_fields, child);
                    let start_node = self.node_for(
                        child,
                        MESSAGE_ID_START_OF_SUBMESSAGE,
                        SUBTYPE_TRIVIAL,
                        false,
                    );
                    self.events.push(start_node);
                }
                FieldValue::Group(sub_fields) => {
                    let end_node = self.node_for(
                        context,
                        make_tag(field_number, WireType::EndGroup),
                        SUBTYPE_TRIVIAL,
                        false,
                    );
                    self.events.push(end_node);
                    let child = self.context_for(context, field_number);
                    self.emit_fields(sub_fields, child);
                    let start_node = self.node_for(
                        context,
                        make_tag(field_number, WireType::StartGroup),
                        SUBTYPE_TRIVIAL,
                        false,
                    );
                    self.events.push(start_node);
                }
            }
        }
    }
}

/// Columnar encoder for a chunk's worth of records.
pub struct TransposeEncoder {
    compression: CompressionType,
    level: i32,
    /// Uncompressed bytes per data bucket.
    bucket_size: u64,
    records: Vec<Bytes>,
    decoded_size: u64,
}

impl TransposeEncoder {
    pub fn new(compression: CompressionType, level: i32, bucket_size: u64) -> Self {
        Self {
            compression,
            level,
            bucket_size: bucket_size.max(1),
            records: Vec::new(),
            decoded_size: 0,
        }
    }

    pub fn add_record(&mut self, record: &[u8]) {
        self.add_record_bytes(Bytes::copy_from_slice(record));
    }

    pub fn add_record_bytes(&mut self, record: Bytes) {
        self.decoded_size += record.len() as u64;
        self.records.push(record);
    }

    pub fn num_records(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn decoded_data_size(&self) -> u64 {
        self.decoded_size
    }

    /// Produces the chunk data. Returns `(data, num_records,
    /// decoded_data_size)`.
    pub fn encode(self) -> Result<(Chain, u64, u64)> {
        let num_records = self.records.len() as u64;
        let decoded_size = self.decoded_size;

        let parsed: Vec<Option<Vec<FieldSpan>>> = self
            .records
            .iter()
            .map(|record| parse_record(record))
            .collect();

        let mut builder = Builder::default();
        for (record, fields) in self.records.iter().zip(parsed.iter()).rev() {
            builder.emit_record(record, fields.as_deref());
        }
        if builder.has_nonproto {
            // The lengths of non-proto records form the last buffer.
            builder.buffers.push(std::mem::take(&mut builder.nonproto_lengths));
        }

        let layout = NodeLayout::new(builder.nodes.len());
        let state_machine_size = layout.state_machine_size();

        // Pack buffers into buckets of bounded uncompressed size.
        let mut bucket_sections: Vec<Vec<u8>> = Vec::new();
        let mut current = Compressor::new(self.compression, self.level);
        let mut current_len = 0u64;
        let mut current_used = false;
        for buffer in &builder.buffers {
            if current_used && current_len + buffer.len() as u64 > self.bucket_size {
                let mut section = reclog_bytes::VecWriter::new();
                std::mem::replace(
                    &mut current,
                    Compressor::new(self.compression, self.level),
                )
                .encode(&mut section)?;
                bucket_sections.push(section.into_vec());
                current_len = 0;
                current_used = false;
            }
            current.writer().write(buffer)?;
            current_len += buffer.len() as u64;
            current_used = true;
        }
        if current_used {
            let mut section = reclog_bytes::VecWriter::new();
            current.encode(&mut section)?;
            bucket_sections.push(section.into_vec());
        }

        // Header.
        let mut header = Vec::new();
        varint::write_varint64(bucket_sections.len() as u64, &mut header);
        varint::write_varint64(builder.buffers.len() as u64, &mut header);
        for section in &bucket_sections {
            varint::write_varint64(section.len() as u64, &mut header);
        }
        for buffer in &builder.buffers {
            varint::write_varint64(buffer.len() as u64, &mut header);
        }
        varint::write_varint64(state_machine_size as u64, &mut header);
        for index in 0..state_machine_size {
            let tag = match layout.real_at(index) {
                Some(node_id) => builder.nodes[node_id].raw_tag,
                None => MESSAGE_ID_NO_OP,
            };
            varint::write_varint64(u64::from(tag), &mut header);
        }
        for index in 0..state_machine_size {
            let next = match layout.real_at(index) {
                // Rungs point at themselves so a climb can continue from
                // them; real nodes return to the base.
                Some(_) => 0,
                None => index,
            };
            varint::write_varint64(next as u64, &mut header);
        }
        for index in 0..state_machine_size {
            if let Some(node_id) = layout.real_at(index) {
                let node = &builder.nodes[node_id];
                if crate::wire::is_valid_tag(node.raw_tag) && has_subtype(node.raw_tag) {
                    header.push(node.subtype);
                }
            }
        }
        for index in 0..state_machine_size {
            if let Some(node_id) = layout.real_at(index) {
                if let Some(buffer) = builder.nodes[node_id].buffer {
                    varint::write_varint64(buffer as u64, &mut header);
                }
            }
        }
        let first_node = builder
            .events
            .first()
            .map(|&event| layout.index_of(event))
            .unwrap_or(0);
        varint::write_varint64(first_node as u64, &mut header);

        // Transition stream: route from the base to each event after the
        // first through the no-op ladder.
        let mut transitions = Vec::with_capacity(builder.events.len());
        for &event in builder.events.iter().skip(1) {
            let target = layout.index_of(event);
            let mut base = 0usize;
            while target - base > LADDER_STRIDE {
                transitions.push((LADDER_STRIDE as u8) << 2);
                base += LADDER_STRIDE;
            }
            transitions.push(((target - base) as u8) << 2);
        }

        // Assemble the chunk data.
        let mut dest = ChainWriter::new();
        dest.write_byte(self.compression.as_byte())?;
        let mut header_section = reclog_bytes::VecWriter::new();
        let mut header_compressor = Compressor::new(self.compression, self.level);
        header_compressor.writer().write(&header)?;
        header_compressor.encode(&mut header_section)?;
        let header_section = header_section.into_vec();
        let mut prefix = Vec::new();
        varint::write_varint64(header_section.len() as u64, &mut prefix);
        dest.write(&prefix)?;
        dest.write(&header_section)?;
        for section in &bucket_sections {
            dest.write(section)?;
        }
        let mut transitions_compressor = Compressor::new(self.compression, self.level);
        transitions_compressor.writer().write(&transitions)?;
        transitions_compressor.encode(&mut dest)?;

        Ok((dest.into_chain(), num_records, decoded_size))
    }
}

/// Index arithmetic for the final node array: no-op rungs at every
/// `LADDER_STRIDE`th index (including the base at 0), real nodes at the
/// remaining indices in creation order.
struct NodeLayout {
    real_count: usize,
}

impl NodeLayout {
    fn new(real_count: usize) -> Self {
        Self { real_count }
    }

    fn state_machine_size(&self) -> usize {
        if self.real_count == 0 {
            return 1;
        }
        self.index_of(self.real_count - 1) + 1
    }

    /// Final index of the `node_id`-th real node.
    fn index_of(&self, node_id: usize) -> usize {
        let group = node_id / (LADDER_STRIDE - 1);
        let within = node_id % (LADDER_STRIDE - 1);
        group * LADDER_STRIDE + 1 + within
    }

    /// The real node at a final index, or `None` for a rung.
    fn real_at(&self, index: usize) -> Option<usize> {
        if index % LADDER_STRIDE == 0 {
            return None;
        }
        let group = index / LADDER_STRIDE;
        let within = index % LADDER_STRIDE - 1;
        let node_id = group * (LADDER_STRIDE - 1) + within;
        (node_id < self.real_count).then_some(node_id)
    }
}

/// Parses a record into a field tree, or `None` when the record is not a
/// message the decoder could reproduce byte-for-byte.
fn parse_record(record: &Bytes) -> Option<Vec<FieldSpan>> {
    let mut pos = 0usize;
    let fields = parse_fields(record, &mut pos, 0, None)?;
    debug_assert_eq!(pos, record.len());
    Some(fields)
}

fn parse_fields(
    data: &Bytes,
    pos: &mut usize,
    depth: usize,
    group_field: Option<u32>,
) -> Option<Vec<FieldSpan>> {
    let mut fields = Vec::new();
    loop {
        if *pos == data.len() {
            // A group must be terminated by its end tag.
            return if group_field.is_none() {
                Some(fields)
            } else {
                None
            };
        }
        let (tag, tag_len) = varint::read_varint32(&data[*pos..])?;
        if !crate::wire::is_valid_tag(tag) {
            return None;
        }
        if tag_len != varint::length_varint32(tag) {
            // A non-canonical tag encoding would not survive re-encoding.
            return None;
        }
        let field_number = tag_field_number(tag);
        let wire_type = tag_wire_type(tag).expect("valid tag has a wire type");
        if wire_type == WireType::EndGroup {
            return if group_field == Some(field_number) {
                *pos += tag_len;
                Some(fields)
            } else {
                None
            };
        }
        *pos += tag_len;
        let value = match wire_type {
            WireType::Varint => {
                let (_, value_len) = varint::read_varint64(&data[*pos..])?;
                let payload = data.slice(*pos..*pos + value_len);
                *pos += value_len;
                FieldValue::Varint(payload)
            }
            WireType::Fixed64 => {
                if data.len() - *pos < 8 {
                    return None;
                }
                let payload = data.slice(*pos..*pos + 8);
                *pos += 8;
                FieldValue::Fixed64(payload)
            }
            WireType::Fixed32 => {
                if data.len() - *pos < 4 {
                    return None;
                }
                let payload = data.slice(*pos..*pos + 4);
                *pos += 4;
                FieldValue::Fixed32(payload)
            }
            WireType::LengthDelimited => {
                let (length, length_len) = varint::read_varint32(&data[*pos..])?;
                let prefix_start = *pos;
                *pos += length_len;
                if data.len() - *pos < length as usize {
                    return None;
                }
                let payload = data.slice(*pos..*pos + length as usize);
                *pos += length as usize;
                let canonical_prefix = length_len == varint::length_varint32(length);
                let as_message = if length > 0 && canonical_prefix && depth < MAX_RECURSION_DEPTH
                {
                    let mut sub_pos = 0usize;
                    parse_fields(&payload, &mut sub_pos, depth + 1, None)
                } else {
                    None
                };
                match as_message {
                    Some(sub_fields) => FieldValue::Submessage(sub_fields),
                    None => FieldValue::String(data.slice(prefix_start..*pos)),
                }
            }
            WireType::StartGroup => {
                if depth >= MAX_RECURSION_DEPTH {
                    return None;
                }
                let sub_fields = parse_fields(data, pos, depth + 1, Some(field_number))?;
                FieldValue::Group(sub_fields)
            }
            WireType::EndGroup => unreachable!("handled above"),
        };
        fields.push(FieldSpan {
            field_number,
            value,
        });
    }
}
