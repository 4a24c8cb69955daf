//! Transpose Decoder
//!
//! Reconstructs the serialized records of a transpose chunk. The header
//! yields a state machine and a set of data buffers; the transition stream
//! then drives the machine, and every executed node emits one wire-format
//! component into a backward writer. Records are visited last-to-first and
//! fields within a record last-to-first, so prepending reproduces the exact
//! forward bytes; submessage lengths are computed from the positions
//! recorded when the submessage's end was visited.
//!
//! With field projection, node actions are resolved lazily per node from
//! the include trie, and a bucket is only decompressed once a node that
//! actually consumes one of its buffers executes.
//!
//! Malformed input must fail, never crash: every index is bounds-checked,
//! the machine is padded with failure nodes, implicit-edge cycles are
//! rejected up front, and the output is capped at the declared decoded
//! size.

use crate::compress::Decompressor;
use crate::projection::{FieldProjection, EXISTENCE_ONLY};
use crate::transpose::machine::*;
use crate::wire::{
    tag_field_number, tag_wire_type, tag_wire_type_raw, WireType, SUBMESSAGE_WIRE_TYPE,
    SUBMESSAGE_WIRE_TYPE_OFFSET,
};
use reclog_bytes::varint_io::{read_varint32, read_varint64};
use reclog_bytes::{BackwardWriter, ChainReader, LimitingBackwardWriter, Reader};
use reclog_core::varint::{self, MAX_LEN_VARINT32};
use reclog_core::{Chain, CompressionType, Error, Result};
use std::collections::HashMap;

/// Root of the include trie.
const ROOT_FIELD_ID: u32 = u32::MAX;

/// Guards the state machine allocation against absurd declared sizes.
const MAX_STATE_MACHINE_SIZE: u32 = 1 << 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IncludeType {
    // Ordered so that `min` keeps the strongest inclusion.
    IncludeFully = 0,
    IncludeChild = 1,
    ExistenceOnly = 2,
}

#[derive(Debug, Clone, Copy)]
struct IncludedField {
    field_id: u32,
    include_type: IncludeType,
}

/// A compressed group of data buffers, decompressed on first use.
struct DataBucket {
    /// Compressed bytes; dropped once fully decompressed.
    compressed: Chain,
    /// Uncompressed sizes of the buffers inside.
    buffer_sizes: Vec<u64>,
    /// Materialized buffers; empty until first use.
    buffers: Vec<ChainReader>,
}

struct Context {
    compression: CompressionType,
    projection_enabled: bool,
    /// Flat buffer table (projection disabled).
    buffers: Vec<ChainReader>,
    /// Buckets with lazy decompression (projection enabled).
    buckets: Vec<DataBucket>,
    nodes: Vec<Node>,
    templates: Vec<NodeTemplate>,
    first_node: u32,
    nonproto_lengths: Option<BufferRef>,
    include_fields: HashMap<(u32, u32), IncludedField>,
    transitions: Decompressor,
}

/// Decodes transpose chunks.
pub struct TransposeDecoder;

impl TransposeDecoder {
    /// Decodes `data` into `dest`, returning the forward-order cumulative
    /// record end positions.
    pub fn decode(
        num_records: u64,
        decoded_data_size: u64,
        field_projection: &FieldProjection,
        data: Chain,
        dest: &mut dyn BackwardWriter,
    ) -> Result<Vec<u64>> {
        debug_assert_eq!(dest.pos(), 0, "destination must start empty");
        if num_records > usize::MAX as u64 {
            return Err(Error::resource_exhausted("too many records"));
        }
        if decoded_data_size > usize::MAX as u64 {
            return Err(Error::resource_exhausted("records too large"));
        }

        let mut context = parse(ChainReader::new(data), field_projection)?;
        let mut limits = Vec::with_capacity(num_records as usize);
        {
            let mut limited = LimitingBackwardWriter::new(dest, decoded_data_size);
            decode_records(&mut context, num_records, &mut limited, &mut limits)?;
        }
        if field_projection.includes_all() && dest.pos() != decoded_data_size {
            return Err(Error::invalid_data(
                "decoded data size smaller than expected",
            ));
        }

        // Reverse and complement the limits, e.g. for record sizes
        // {10, 20, 30, 40}: {40, 70, 90, 100} -> {10, 30, 60, 100}.
        let size = limits.last().copied().unwrap_or(0);
        let mut forward: Vec<u64> = Vec::with_capacity(limits.len());
        for limit in limits.iter().rev().skip(1) {
            forward.push(size - limit);
        }
        forward.push(size);
        if limits.is_empty() {
            forward.clear();
        }
        Ok(forward)
    }
}

fn parse(mut src: ChainReader, field_projection: &FieldProjection) -> Result<Context> {
    let projection_enabled = !field_projection.includes_all();
    let mut include_fields = HashMap::new();
    if projection_enabled {
        build_include_trie(field_projection, &mut include_fields)?;
    }

    let compression_byte = src
        .read_byte()?
        .ok_or_else(|| Error::invalid_data("reading compression type failed"))?;
    let compression = CompressionType::try_from(compression_byte)?;

    let header_size = read_varint64(&mut src)
        .map_err(|_| Error::invalid_data("reading header size failed"))?;
    let mut header = Chain::new();
    if !src.read_chain(header_size, &mut header)? {
        return Err(Error::invalid_data("reading header failed"));
    }
    let mut header_decompressor = Decompressor::new(header, compression)?;

    let mut context = Context {
        compression,
        projection_enabled,
        buffers: Vec::new(),
        buckets: Vec::new(),
        nodes: Vec::new(),
        templates: Vec::new(),
        first_node: 0,
        nonproto_lengths: None,
        include_fields,
        transitions: Decompressor::new(Chain::new(), CompressionType::None)?,
    };

    // Buffer tables. With projection only the bucket skeleton is read;
    // without it every buffer is materialized now.
    let (num_buffers, first_buffer_indices, bucket_indices) = if projection_enabled {
        parse_buckets_for_projection(&mut context, header_decompressor.reader(), &mut src)?
    } else {
        let count = parse_buffers(&mut context, header_decompressor.reader(), &mut src)?;
        (count, Vec::new(), Vec::new())
    };

    let header_reader = header_decompressor.reader();
    let state_machine_size = read_varint32(header_reader)
        .map_err(|_| Error::invalid_data("reading state machine size failed"))?;
    if state_machine_size > MAX_STATE_MACHINE_SIZE {
        return Err(Error::resource_exhausted("state machine too large"));
    }

    let mut tags = Vec::with_capacity(state_machine_size as usize);
    let mut num_subtypes = 0usize;
    for _ in 0..state_machine_size {
        let tag = read_varint32(header_reader)
            .map_err(|_| Error::invalid_data("reading field tag failed"))?;
        if crate::wire::is_valid_tag(tag) && has_subtype(tag) {
            num_subtypes += 1;
        }
        tags.push(tag);
    }
    let mut next_node_indices = Vec::with_capacity(state_machine_size as usize);
    for _ in 0..state_machine_size {
        let next_node = read_varint32(header_reader)
            .map_err(|_| Error::invalid_data("reading next node index failed"))?;
        next_node_indices.push(next_node);
    }
    let mut subtypes = vec![0u8; num_subtypes];
    if !header_reader.read(&mut subtypes)? {
        return Err(Error::invalid_data("reading subtypes failed"));
    }

    context
        .nodes
        .resize_with(state_machine_size as usize + SAFETY_NODES, Node::default);
    if projection_enabled {
        context
            .templates
            .resize_with(state_machine_size as usize, NodeTemplate::default);
    }

    let mut has_nonproto = false;
    let mut subtype_index = 0usize;
    for index in 0..state_machine_size as usize {
        let raw_tag = tags[index];
        let mut node = Node::default();
        match raw_tag {
            MESSAGE_ID_NO_OP => node.callback = CallbackKind::NoOp,
            MESSAGE_ID_NON_PROTO => {
                node.callback = CallbackKind::NonProto;
                let buffer_index = read_varint32(header_decompressor.reader())
                    .map_err(|_| Error::invalid_data("reading buffer index failed"))?;
                if buffer_index >= num_buffers {
                    return Err(Error::invalid_data("buffer index too large"));
                }
                node.buffer = resolve_buffer(
                    &mut context,
                    buffer_index,
                    &first_buffer_indices,
                    &bucket_indices,
                )?;
                has_nonproto = true;
            }
            MESSAGE_ID_START_OF_MESSAGE => node.callback = CallbackKind::MessageStart,
            MESSAGE_ID_START_OF_SUBMESSAGE => {
                if projection_enabled {
                    context.templates[index].tag = MESSAGE_ID_START_OF_SUBMESSAGE;
                    node.template_index = index as u32;
                    node.callback = CallbackKind::Select;
                } else {
                    node.callback = CallbackKind::SubmessageStart;
                }
            }
            _ => {
                let mut tag = raw_tag;
                let mut subtype = SUBTYPE_TRIVIAL;
                if tag_wire_type_raw(tag) == SUBMESSAGE_WIRE_TYPE {
                    // End of submessage is stored with the stolen wire type.
                    tag -= SUBMESSAGE_WIRE_TYPE_OFFSET;
                    subtype = SUBTYPE_LENGTH_DELIMITED_END_OF_SUBMESSAGE;
                }
                if !crate::wire::is_valid_tag(tag) {
                    return Err(Error::invalid_data("invalid tag"));
                }
                let mut encoded = [0u8; varint::MAX_LEN_VARINT64];
                let tag_length = varint::encode_varint64(u64::from(tag), &mut encoded);
                debug_assert!(tag_length <= MAX_LEN_VARINT32);
                node.tag_data.data[..tag_length].copy_from_slice(&encoded[..tag_length]);
                node.tag_data.size = tag_length as u8;
                if has_subtype(tag) {
                    subtype = subtypes[subtype_index];
                    subtype_index += 1;
                }
                let needs_buffer = has_data_buffer(tag, subtype);
                let buffer_index = if needs_buffer {
                    let buffer_index = read_varint32(header_decompressor.reader())
                        .map_err(|_| Error::invalid_data("reading buffer index failed"))?;
                    if buffer_index >= num_buffers {
                        return Err(Error::invalid_data("buffer index too large"));
                    }
                    Some(buffer_index)
                } else {
                    None
                };
                if projection_enabled {
                    let template = &mut context.templates[index];
                    template.tag = tag;
                    template.subtype = subtype;
                    template.tag_length = tag_length as u8;
                    match buffer_index {
                        Some(buffer_index) => {
                            let bucket = bucket_indices[buffer_index as usize];
                            template.bucket_index = bucket;
                            template.buffer_within_bucket =
                                buffer_index - first_buffer_indices[bucket as usize];
                        }
                        None => template.bucket_index = NO_BUCKET,
                    }
                    node.template_index = index as u32;
                    node.callback = CallbackKind::Select;
                } else {
                    if let Some(buffer_index) = buffer_index {
                        node.buffer = BufferRef::Direct(buffer_index);
                    }
                    node.callback = callback_for(
                        FieldIncluded::Yes,
                        tag,
                        subtype,
                        tag_length as u8,
                        projection_enabled,
                    )
                    .ok_or_else(|| Error::invalid_data("invalid node"))?;
                }
                // The slot after the tag holds an inline varint value, or
                // zero so existence-only decoding reads a zero value.
                if tag_wire_type(tag) == Some(WireType::Varint)
                    && subtype >= SUBTYPE_VARINT_INLINE_0
                {
                    node.tag_data.data[tag_length] = subtype - SUBTYPE_VARINT_INLINE_0;
                }
            }
        }
        let mut next_node_id = next_node_indices[index];
        if next_node_id >= state_machine_size {
            // An index past the machine marks the edge implicit.
            next_node_id -= state_machine_size;
            node.implicit = true;
        }
        if next_node_id >= state_machine_size {
            return Err(Error::invalid_data("node index too large"));
        }
        node.next_node = next_node_id;
        context.nodes[index] = node;
    }

    if has_nonproto {
        // The last buffer holds the lengths of non-proto records.
        if num_buffers == 0 {
            return Err(Error::invalid_data("missing buffer for non-proto records"));
        }
        let nonproto_lengths = resolve_buffer(
            &mut context,
            num_buffers - 1,
            &first_buffer_indices,
            &bucket_indices,
        )?;
        context.nonproto_lengths = Some(nonproto_lengths);
    }

    let first_node = read_varint32(header_decompressor.reader())
        .map_err(|_| Error::invalid_data("reading first node index failed"))?;
    if first_node >= state_machine_size {
        return Err(Error::invalid_data("first node index too large"));
    }
    context.first_node = first_node;

    for node in &mut context.nodes[state_machine_size as usize..] {
        node.callback = CallbackKind::Failure;
    }

    if contains_implicit_loop(&context.nodes) {
        return Err(Error::invalid_data("nodes contain an implicit loop"));
    }

    header_decompressor.verify_end()?;

    // Everything left in the chunk is the compressed transition stream.
    let mut transition_bytes = Chain::new();
    let remaining = src.size()? - src.pos();
    src.read_chain(remaining, &mut transition_bytes)?;
    context.transitions = Decompressor::new(transition_bytes, compression)?;
    Ok(context)
}

/// Builds the include trie from projection paths. Keys are
/// `(parent field id, field number)`; the root id is `ROOT_FIELD_ID`.
fn build_include_trie(
    field_projection: &FieldProjection,
    include_fields: &mut HashMap<(u32, u32), IncludedField>,
) -> Result<()> {
    for field in field_projection.fields() {
        let path = field.path();
        let mut path_len = path.len();
        let existence_only = path.last() == Some(&EXISTENCE_ONLY);
        if existence_only {
            path_len -= 1;
            if path_len == 0 {
                continue;
            }
        }
        let mut current_id = ROOT_FIELD_ID;
        for (depth, &field_number) in path[..path_len].iter().enumerate() {
            if field_number == EXISTENCE_ONLY {
                return Err(Error::invalid_data(
                    "existence-only marker inside a projection path",
                ));
            }
            let include_type = if depth + 1 == path_len {
                if existence_only {
                    IncludeType::ExistenceOnly
                } else {
                    IncludeType::IncludeFully
                }
            } else {
                IncludeType::IncludeChild
            };
            let next_id = include_fields.len() as u32;
            let entry = include_fields
                .entry((current_id, field_number))
                .or_insert(IncludedField {
                    field_id: next_id,
                    include_type,
                });
            entry.include_type = entry.include_type.min(include_type);
            current_id = entry.field_id;
        }
    }
    Ok(())
}

impl PartialOrd for IncludeType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IncludeType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// Reads bucket and buffer tables and materializes every buffer
/// (projection disabled). Returns the number of buffers.
fn parse_buffers(context: &mut Context, header: &mut ChainReader, src: &mut ChainReader) -> Result<u32> {
    let num_buckets = read_varint32(header)
        .map_err(|_| Error::invalid_data("reading number of buckets failed"))?;
    let num_buffers = read_varint32(header)
        .map_err(|_| Error::invalid_data("reading number of buffers failed"))?;
    if num_buckets == 0 {
        if num_buffers != 0 {
            return Err(Error::invalid_data("too few buckets"));
        }
        return Ok(0);
    }

    let mut bucket_chains = Vec::with_capacity(num_buckets as usize);
    for _ in 0..num_buckets {
        let bucket_length = read_varint64(header)
            .map_err(|_| Error::invalid_data("reading bucket length failed"))?;
        let mut bucket = Chain::new();
        if !src.read_chain(bucket_length, &mut bucket)? {
            return Err(Error::invalid_data("reading bucket failed"));
        }
        let mut decompressor = Decompressor::new(bucket, context.compression)?;
        let mut content = Chain::new();
        let size = decompressor.reader().size()?;
        decompressor.reader().read_chain(size, &mut content)?;
        bucket_chains.push(content);
    }

    let mut bucket_index = 0usize;
    let mut offset_in_bucket = 0u64;
    for _ in 0..num_buffers {
        let buffer_length = read_varint64(header)
            .map_err(|_| Error::invalid_data("reading buffer length failed"))?;
        if buffer_length > bucket_chains[bucket_index].len() - offset_in_bucket {
            return Err(Error::invalid_data("reading buffer failed"));
        }
        let buffer = bucket_chains[bucket_index].subrange(offset_in_bucket, buffer_length);
        offset_in_bucket += buffer_length;
        context.buffers.push(ChainReader::new(buffer));
        // Advance past buckets drained exactly.
        while offset_in_bucket == bucket_chains[bucket_index].len()
            && bucket_index + 1 < num_buckets as usize
        {
            bucket_index += 1;
            offset_in_bucket = 0;
        }
    }
    if bucket_index + 1 < num_buckets as usize {
        return Err(Error::invalid_data("too few buckets"));
    }
    if offset_in_bucket != bucket_chains[bucket_index].len() {
        return Err(Error::invalid_data("end of data expected"));
    }
    Ok(num_buffers)
}

/// Reads bucket and buffer tables keeping buckets compressed (projection
/// enabled). Returns `(num_buffers, first buffer index per bucket, bucket
/// index per buffer)`.
fn parse_buckets_for_projection(
    context: &mut Context,
    header: &mut ChainReader,
    src: &mut ChainReader,
) -> Result<(u32, Vec<u32>, Vec<u32>)> {
    let num_buckets = read_varint32(header)
        .map_err(|_| Error::invalid_data("reading number of buckets failed"))?;
    let num_buffers = read_varint32(header)
        .map_err(|_| Error::invalid_data("reading number of buffers failed"))?;
    if num_buckets == 0 {
        if num_buffers != 0 {
            return Err(Error::invalid_data("too few buckets"));
        }
        return Ok((0, Vec::new(), Vec::new()));
    }

    let mut first_buffer_indices = Vec::with_capacity(num_buckets as usize);
    let mut bucket_indices = Vec::with_capacity(num_buffers as usize);
    for _ in 0..num_buckets {
        let bucket_length = read_varint64(header)
            .map_err(|_| Error::invalid_data("reading bucket length failed"))?;
        let mut compressed = Chain::new();
        if !src.read_chain(bucket_length, &mut compressed)? {
            return Err(Error::invalid_data("reading bucket failed"));
        }
        context.buckets.push(DataBucket {
            compressed,
            buffer_sizes: Vec::new(),
            buffers: Vec::new(),
        });
    }

    let mut bucket_index = 0u32;
    first_buffer_indices.push(0);
    let mut remaining_bucket_size =
        crate::compress::uncompressed_size(&context.buckets[0].compressed, context.compression)
            .ok_or_else(|| Error::invalid_data("reading uncompressed size failed"))?;
    for buffer_index in 0..num_buffers {
        let buffer_length = read_varint64(header)
            .map_err(|_| Error::invalid_data("reading buffer length failed"))?;
        context.buckets[bucket_index as usize]
            .buffer_sizes
            .push(buffer_length);
        if buffer_length > remaining_bucket_size {
            return Err(Error::invalid_data("buffer does not fit in bucket"));
        }
        remaining_bucket_size -= buffer_length;
        bucket_indices.push(bucket_index);
        while remaining_bucket_size == 0 && bucket_index + 1 < num_buckets {
            bucket_index += 1;
            first_buffer_indices.push(buffer_index + 1);
            remaining_bucket_size = crate::compress::uncompressed_size(
                &context.buckets[bucket_index as usize].compressed,
                context.compression,
            )
            .ok_or_else(|| Error::invalid_data("reading uncompressed size failed"))?;
        }
    }
    if bucket_index + 1 < num_buckets {
        return Err(Error::invalid_data("too few buckets"));
    }
    if remaining_bucket_size > 0 {
        return Err(Error::invalid_data("end of data expected"));
    }
    Ok((num_buffers, first_buffer_indices, bucket_indices))
}

/// Maps a flat buffer index to a buffer reference, materializing its bucket
/// under projection.
fn resolve_buffer(
    context: &mut Context,
    buffer_index: u32,
    first_buffer_indices: &[u32],
    bucket_indices: &[u32],
) -> Result<BufferRef> {
    if !context.projection_enabled {
        return Ok(BufferRef::Direct(buffer_index));
    }
    let bucket = bucket_indices[buffer_index as usize];
    let index = buffer_index - first_buffer_indices[bucket as usize];
    materialize_bucket(&mut context.buckets, context.compression, bucket)?;
    Ok(BufferRef::InBucket { bucket, index })
}

/// Decompresses a bucket and slices out its buffers. No-op if already done.
fn materialize_bucket(
    buckets: &mut [DataBucket],
    compression: CompressionType,
    bucket_index: u32,
) -> Result<()> {
    let bucket = &mut buckets[bucket_index as usize];
    if !bucket.buffers.is_empty() || bucket.buffer_sizes.is_empty() {
        return Ok(());
    }
    let mut decompressor = Decompressor::new(std::mem::take(&mut bucket.compressed), compression)?;
    let size = decompressor.reader().size()?;
    let mut content = Chain::new();
    decompressor.reader().read_chain(size, &mut content)?;
    let mut offset = 0u64;
    for &buffer_size in &bucket.buffer_sizes {
        if buffer_size > content.len() - offset {
            return Err(Error::invalid_data("reading buffer failed"));
        }
        bucket
            .buffers
            .push(ChainReader::new(content.subrange(offset, buffer_size)));
        offset += buffer_size;
    }
    if offset != content.len() {
        return Err(Error::invalid_data("end of data expected"));
    }
    Ok(())
}

fn buffer_mut<'a>(
    buffers: &'a mut [ChainReader],
    buckets: &'a mut [DataBucket],
    reference: BufferRef,
) -> Result<&'a mut ChainReader> {
    match reference {
        BufferRef::None => Err(Error::invalid_data("node reads from a missing buffer")),
        BufferRef::Direct(index) => Ok(&mut buffers[index as usize]),
        BufferRef::InBucket { bucket, index } => {
            Ok(&mut buckets[bucket as usize].buffers[index as usize])
        }
    }
}

fn decode_records(
    context: &mut Context,
    num_records: u64,
    dest: &mut LimitingBackwardWriter<'_>,
    limits: &mut Vec<u64>,
) -> Result<()> {
    let Context {
        compression,
        projection_enabled: _,
        buffers,
        buckets,
        nodes,
        templates,
        first_node,
        nonproto_lengths,
        include_fields,
        transitions,
    } = context;
    let compression = *compression;

    let mut node_index = *first_node as usize;
    let mut num_iters: u32 = 0;
    // Stack of open submessages: output position of the submessage end and
    // the field's tag.
    let mut submessage_stack: Vec<(u64, TagData)> = Vec::with_capacity(16);
    // Depth of the current position under a projection-excluded submessage.
    let mut skipped_level: u64 = 0;

    if nodes[node_index].implicit {
        num_iters += 1;
    }
    loop {
        let node = nodes[node_index];
        match node.callback {
            CallbackKind::Select => {
                set_callback_type(
                    nodes,
                    templates,
                    include_fields,
                    buckets,
                    compression,
                    skipped_level,
                    &submessage_stack,
                    node_index,
                )?;
                continue;
            }
            CallbackKind::SkippedSubmessageEnd => {
                skipped_level += 1;
            }
            CallbackKind::SkippedSubmessageStart => {
                if skipped_level == 0 {
                    return Err(Error::invalid_data("skipped submessage stack underflow"));
                }
                skipped_level -= 1;
            }
            CallbackKind::SubmessageEnd => {
                submessage_stack.push((dest.pos(), node.tag_data));
            }
            CallbackKind::SubmessageStart => {
                let (end_of_submessage, tag_data) = submessage_stack
                    .pop()
                    .ok_or_else(|| Error::invalid_data("submessage stack underflow"))?;
                debug_assert!(dest.pos() >= end_of_submessage);
                let length = dest.pos() - end_of_submessage;
                if length > u64::from(u32::MAX) {
                    return Err(Error::invalid_data("message too large"));
                }
                let mut encoded = [0u8; varint::MAX_LEN_VARINT64];
                let length_len = varint::encode_varint64(length, &mut encoded);
                dest.write(&encoded[..length_len])?;
                dest.write(&tag_data.data[..tag_data.size as usize])?;
            }
            CallbackKind::CopyTag { tag_length } => {
                dest.write(&node.tag_data.data[..tag_length as usize])?;
            }
            CallbackKind::Varint {
                tag_length,
                data_length,
            } => {
                let tag_length = tag_length as usize;
                let data_length = data_length as usize;
                let buffer = buffer_mut(buffers, buckets, node.buffer)?;
                let mut payload = [0u8; 10];
                if !buffer.read(&mut payload[..data_length])? {
                    return Err(Error::invalid_data("reading varint field failed"));
                }
                let slot = dest.prepend_slot(tag_length + data_length)?;
                slot[tag_length..].copy_from_slice(&payload[..data_length]);
                for byte in &mut slot[tag_length..tag_length + data_length - 1] {
                    *byte |= 0x80;
                }
                slot[..tag_length].copy_from_slice(&node.tag_data.data[..tag_length]);
            }
            CallbackKind::Fixed {
                tag_length,
                data_length,
            } => {
                let tag_length = tag_length as usize;
                let data_length = data_length as usize;
                let buffer = buffer_mut(buffers, buckets, node.buffer)?;
                let mut payload = [0u8; 8];
                if !buffer.read(&mut payload[..data_length])? {
                    return Err(Error::invalid_data("reading fixed field failed"));
                }
                let slot = dest.prepend_slot(tag_length + data_length)?;
                slot[tag_length..].copy_from_slice(&payload[..data_length]);
                slot[..tag_length].copy_from_slice(&node.tag_data.data[..tag_length]);
            }
            CallbackKind::FixedExistence {
                tag_length,
                data_length,
            } => {
                let tag_length = tag_length as usize;
                let slot = dest.prepend_slot(tag_length + data_length as usize)?;
                // The slot is pre-zeroed; only the tag needs writing.
                slot[..tag_length].copy_from_slice(&node.tag_data.data[..tag_length]);
            }
            CallbackKind::String { tag_length } => {
                let buffer = buffer_mut(buffers, buckets, node.buffer)?;
                buffer.pull(MAX_LEN_VARINT32, MAX_LEN_VARINT32)?;
                let (length, length_len) = varint::read_varint32(buffer.buffer())
                    .ok_or_else(|| Error::invalid_data("reading string length failed"))?;
                if length > u32::MAX - length_len as u32 {
                    return Err(Error::invalid_data("string length overflow"));
                }
                if !buffer.copy_to_backward(length_len + length as usize, dest)? {
                    return Err(Error::invalid_data("reading string field failed"));
                }
                dest.write(&node.tag_data.data[..tag_length as usize])?;
            }
            CallbackKind::StartProjectionGroup { tag_length } => {
                if submessage_stack.pop().is_none() {
                    return Err(Error::invalid_data("submessage stack underflow"));
                }
                dest.write(&node.tag_data.data[..tag_length as usize])?;
            }
            CallbackKind::EndProjectionGroup { tag_length } => {
                submessage_stack.push((dest.pos(), node.tag_data));
                dest.write(&node.tag_data.data[..tag_length as usize])?;
            }
            CallbackKind::NonProto => {
                let length = {
                    let lengths_ref = nonproto_lengths
                        .ok_or_else(|| Error::invalid_data("missing non-proto lengths buffer"))?;
                    let lengths = buffer_mut(buffers, buckets, lengths_ref)?;
                    read_varint32(lengths)
                        .map_err(|_| Error::invalid_data("reading non-proto record length failed"))?
                };
                let buffer = buffer_mut(buffers, buckets, node.buffer)?;
                if !buffer.copy_to_backward(length as usize, dest)? {
                    return Err(Error::invalid_data("reading non-proto record failed"));
                }
                // A non-proto record is also a record boundary.
                if !submessage_stack.is_empty() {
                    return Err(Error::invalid_data("submessages still open"));
                }
                if limits.len() as u64 == num_records {
                    return Err(Error::invalid_data("too many records"));
                }
                limits.push(dest.pos());
            }
            CallbackKind::MessageStart => {
                if !submessage_stack.is_empty() {
                    return Err(Error::invalid_data("submessages still open"));
                }
                if limits.len() as u64 == num_records {
                    return Err(Error::invalid_data("too many records"));
                }
                limits.push(dest.pos());
            }
            CallbackKind::NoOp => {}
            CallbackKind::Failure => {
                return Err(Error::invalid_data("invalid node index"));
            }
        }

        // Transition to the next node.
        node_index = nodes[node_index].next_node as usize;
        if num_iters == 0 {
            let transition_byte = match transitions.reader().read_byte()? {
                Some(byte) => byte,
                None => break,
            };
            node_index += (transition_byte >> 2) as usize;
            num_iters = u32::from(transition_byte & 3);
            if nodes[node_index].implicit {
                num_iters += 1;
            }
        } else if !nodes[node_index].implicit {
            num_iters -= 1;
        }
    }

    if !submessage_stack.is_empty() {
        return Err(Error::invalid_data("submessages still open"));
    }
    if skipped_level != 0 {
        return Err(Error::invalid_data("skipped submessages still open"));
    }
    if (limits.len() as u64) != num_records {
        return Err(Error::invalid_data("too few records"));
    }
    let size = limits.last().copied().unwrap_or(0);
    if size != dest.pos() {
        return Err(Error::invalid_data("unfinished message"));
    }
    Ok(())
}

/// Resolves a `Select` node: classifies its field against the include trie
/// using the current submessage ancestry, picks the concrete callback and
/// binds the data buffer (materializing its bucket) when the field is kept.
#[allow(clippy::too_many_arguments)]
fn set_callback_type(
    nodes: &mut [Node],
    templates: &[NodeTemplate],
    include_fields: &HashMap<(u32, u32), IncludedField>,
    buckets: &mut [DataBucket],
    compression: CompressionType,
    skipped_level: u64,
    submessage_stack: &[(u64, TagData)],
    node_index: usize,
) -> Result<()> {
    let template_index = nodes[node_index].template_index;
    debug_assert_ne!(template_index, NO_TEMPLATE, "select node without template");
    let template = templates[template_index as usize];

    if template.tag == MESSAGE_ID_START_OF_SUBMESSAGE {
        nodes[node_index].callback = if skipped_level > 0 {
            CallbackKind::SkippedSubmessageStart
        } else {
            CallbackKind::SubmessageStart
        };
        return Ok(());
    }

    let mut field_included = FieldIncluded::No;
    let mut field_id = ROOT_FIELD_ID;
    if skipped_level == 0 {
        field_included = FieldIncluded::ExistenceOnly;
        for (_, tag_data) in submessage_stack {
            let (tag, _) = varint::read_varint32(&tag_data.data)
                .expect("submessage stack tags are valid varints");
            match include_fields.get(&(field_id, tag_field_number(tag))) {
                None => {
                    field_included = FieldIncluded::No;
                    break;
                }
                Some(included) if included.include_type == IncludeType::IncludeFully => {
                    field_included = FieldIncluded::Yes;
                    break;
                }
                Some(included) => field_id = included.field_id,
            }
        }
    }

    // A start-group tag is classified purely by its ancestors: its matching
    // end-group tag is either on the stack (checked above) or was skipped
    // (`skipped_level > 0`, classified excluded already).
    let start_group_tag = tag_wire_type(template.tag) == Some(WireType::StartGroup);
    if !start_group_tag && field_included == FieldIncluded::ExistenceOnly {
        let (tag, _) = varint::read_varint32(&nodes[node_index].tag_data.data)
            .expect("node tags are valid varints");
        match include_fields.get(&(field_id, tag_field_number(tag))) {
            None => field_included = FieldIncluded::No,
            Some(included)
                if included.include_type == IncludeType::IncludeFully
                    || included.include_type == IncludeType::IncludeChild =>
            {
                field_included = FieldIncluded::Yes;
            }
            Some(_) => {}
        }
    }

    if template.bucket_index != NO_BUCKET {
        nodes[node_index].buffer = match field_included {
            FieldIncluded::Yes => {
                materialize_bucket(buckets, compression, template.bucket_index)?;
                BufferRef::InBucket {
                    bucket: template.bucket_index,
                    index: template.buffer_within_bucket,
                }
            }
            _ => BufferRef::None,
        };
    } else {
        nodes[node_index].buffer = BufferRef::None;
    }

    nodes[node_index].callback = callback_for(
        field_included,
        template.tag,
        template.subtype,
        template.tag_length,
        true,
    )
    .ok_or_else(|| Error::invalid_data("invalid node"))?;

    if field_included == FieldIncluded::ExistenceOnly
        && tag_wire_type(template.tag) == Some(WireType::Varint)
    {
        // The slot after the tag held an inline value; existence-only must
        // read back as zero.
        nodes[node_index].tag_data.data[template.tag_length as usize] = 0;
    }
    Ok(())
}
