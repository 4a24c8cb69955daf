//! Transpose State Machine Types
//!
//! Shared between the encoder and decoder: the reserved message-marker tag
//! values, varint subtypes, per-node callbacks, and the node arena. Nodes
//! are addressed by index, never by pointer; transition bytes encode a
//! 6-bit index delta plus a 2-bit repeat count.

use crate::wire::{tag_wire_type, WireType};
use reclog_core::varint::MAX_LEN_VARINT32;

/// Tag values below 8 are not wire-format tags; they mark decoder actions.
pub const MESSAGE_ID_NO_OP: u32 = 0;
pub const MESSAGE_ID_NON_PROTO: u32 = 1;
pub const MESSAGE_ID_START_OF_MESSAGE: u32 = 2;
pub const MESSAGE_ID_START_OF_SUBMESSAGE: u32 = 3;

/// Subtypes of varint fields: `0..=9` select a stored payload width of
/// 1..=10 bytes, `10 + v` inlines the single-byte value `v`.
pub const SUBTYPE_VARINT_1: u8 = 0;
pub const SUBTYPE_VARINT_MAX: u8 = SUBTYPE_VARINT_1 + 9;
pub const SUBTYPE_VARINT_INLINE_0: u8 = SUBTYPE_VARINT_MAX + 1;
pub const SUBTYPE_VARINT_INLINE_MAX: u8 = SUBTYPE_VARINT_INLINE_0 + 0x7f;

/// Subtypes of length-delimited fields. Strings are the default; the
/// end-of-submessage subtype is implied by the stolen wire type and never
/// stored.
pub const SUBTYPE_LENGTH_DELIMITED_STRING: u8 = 0;
pub const SUBTYPE_LENGTH_DELIMITED_END_OF_SUBMESSAGE: u8 = 1;

pub const SUBTYPE_TRIVIAL: u8 = 0;

/// Number of trailing failure nodes appended after the real state machine
/// so a malformed transition delta can never index out of bounds.
pub const SAFETY_NODES: usize = 0xff;

/// Whether a node with this (real) tag carries a subtype byte in the
/// header.
pub fn has_subtype(tag: u32) -> bool {
    tag_wire_type(tag) == Some(WireType::Varint)
}

/// Whether a node with this (real) tag and subtype consumes a data buffer.
pub fn has_data_buffer(tag: u32, subtype: u8) -> bool {
    match tag_wire_type(tag) {
        Some(WireType::Varint) => subtype <= SUBTYPE_VARINT_MAX,
        Some(WireType::Fixed32) | Some(WireType::Fixed64) => true,
        Some(WireType::LengthDelimited) => subtype == SUBTYPE_LENGTH_DELIMITED_STRING,
        _ => false,
    }
}

/// Tag bytes a node emits: the varint-encoded tag plus one extra slot for
/// an inline varint value or a forced zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagData {
    pub data: [u8; MAX_LEN_VARINT32 + 1],
    /// Length of the encoded tag (the extra byte is not counted).
    pub size: u8,
}

/// Decoder action of one state machine node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    NoOp,
    /// A record boundary: record the current output position.
    MessageStart,
    /// Pop the submessage stack, emit length prefix and tag.
    SubmessageStart,
    /// Push the current output position and this node's tag.
    SubmessageEnd,
    /// Resolved on first execution from the node template and the
    /// projection.
    Select,
    SkippedSubmessageStart,
    SkippedSubmessageEnd,
    /// Copy one non-proto record through.
    NonProto,
    /// Reserved padding node; executing it is an input error.
    Failure,
    /// Emit `tag_length` bytes of stored tag data.
    CopyTag { tag_length: u8 },
    /// Emit the tag, then `data_length` payload bytes from the buffer with
    /// varint continuation bits restored.
    Varint { tag_length: u8, data_length: u8 },
    /// Emit the tag, then a fixed-width payload from the buffer.
    Fixed { tag_length: u8, data_length: u8 },
    /// Emit the tag, then a zeroed fixed-width payload.
    FixedExistence { tag_length: u8, data_length: u8 },
    /// Emit a length-prefixed payload from the buffer, then the tag.
    String { tag_length: u8 },
    StartProjectionGroup { tag_length: u8 },
    EndProjectionGroup { tag_length: u8 },
}

/// Where a node's payload bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRef {
    None,
    /// Index into the flat buffer table (projection disabled).
    Direct(u32),
    /// Buffer within a lazily decompressed bucket (projection enabled).
    InBucket { bucket: u32, index: u32 },
}

/// One state machine node. Kept small: the hot loop touches nothing else.
#[derive(Debug, Clone, Copy)]
pub struct Node {
    pub callback: CallbackKind,
    /// The edge to `next_node` does not consume a transition byte.
    pub implicit: bool,
    pub tag_data: TagData,
    pub next_node: u32,
    pub buffer: BufferRef,
    /// Index into the template table for `Select` nodes.
    pub template_index: u32,
}

pub const NO_TEMPLATE: u32 = u32::MAX;

impl Default for Node {
    fn default() -> Self {
        Self {
            callback: CallbackKind::NoOp,
            implicit: false,
            tag_data: TagData::default(),
            next_node: 0,
            buffer: BufferRef::None,
            template_index: NO_TEMPLATE,
        }
    }
}

/// Cold per-node parameters, resolved only when projection is on.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeTemplate {
    pub tag: u32,
    pub subtype: u8,
    pub tag_length: u8,
    /// `NO_BUCKET` when the node has no data buffer.
    pub bucket_index: u32,
    pub buffer_within_bucket: u32,
}

pub const NO_BUCKET: u32 = u32::MAX;

/// How much of a field the projection keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldIncluded {
    Yes,
    No,
    ExistenceOnly,
}

/// Picks the concrete callback for a node.
///
/// Returns `None` for combinations no valid header can produce.
pub fn callback_for(
    field_included: FieldIncluded,
    tag: u32,
    subtype: u8,
    tag_length: u8,
    projection_enabled: bool,
) -> Option<CallbackKind> {
    let wire_type = tag_wire_type(tag)?;
    match field_included {
        FieldIncluded::Yes => match wire_type {
            WireType::Varint => {
                if subtype > SUBTYPE_VARINT_INLINE_MAX {
                    None
                } else if subtype >= SUBTYPE_VARINT_INLINE_0 {
                    Some(CallbackKind::CopyTag {
                        tag_length: tag_length + 1,
                    })
                } else {
                    Some(CallbackKind::Varint {
                        tag_length,
                        data_length: subtype - SUBTYPE_VARINT_1 + 1,
                    })
                }
            }
            WireType::Fixed32 => Some(CallbackKind::Fixed {
                tag_length,
                data_length: 4,
            }),
            WireType::Fixed64 => Some(CallbackKind::Fixed {
                tag_length,
                data_length: 8,
            }),
            WireType::LengthDelimited => match subtype {
                SUBTYPE_LENGTH_DELIMITED_STRING => Some(CallbackKind::String { tag_length }),
                SUBTYPE_LENGTH_DELIMITED_END_OF_SUBMESSAGE => Some(CallbackKind::SubmessageEnd),
                _ => None,
            },
            WireType::StartGroup => Some(if projection_enabled {
                CallbackKind::StartProjectionGroup { tag_length }
            } else {
                CallbackKind::CopyTag { tag_length }
            }),
            WireType::EndGroup => Some(if projection_enabled {
                CallbackKind::EndProjectionGroup { tag_length }
            } else {
                CallbackKind::CopyTag { tag_length }
            }),
        },
        FieldIncluded::No => match wire_type {
            WireType::Varint | WireType::Fixed32 | WireType::Fixed64 => Some(CallbackKind::NoOp),
            WireType::LengthDelimited => match subtype {
                SUBTYPE_LENGTH_DELIMITED_STRING => Some(CallbackKind::NoOp),
                SUBTYPE_LENGTH_DELIMITED_END_OF_SUBMESSAGE => {
                    Some(CallbackKind::SkippedSubmessageEnd)
                }
                _ => None,
            },
            WireType::StartGroup => Some(CallbackKind::SkippedSubmessageStart),
            WireType::EndGroup => Some(CallbackKind::SkippedSubmessageEnd),
        },
        FieldIncluded::ExistenceOnly => match wire_type {
            // The byte after the tag is forced to zero, which reads back as
            // the zero value of the wire type.
            WireType::Varint => Some(CallbackKind::CopyTag {
                tag_length: tag_length + 1,
            }),
            WireType::Fixed32 => Some(CallbackKind::FixedExistence {
                tag_length,
                data_length: 4,
            }),
            WireType::Fixed64 => Some(CallbackKind::FixedExistence {
                tag_length,
                data_length: 8,
            }),
            WireType::LengthDelimited => match subtype {
                SUBTYPE_LENGTH_DELIMITED_STRING => Some(CallbackKind::CopyTag {
                    tag_length: tag_length + 1,
                }),
                SUBTYPE_LENGTH_DELIMITED_END_OF_SUBMESSAGE => Some(CallbackKind::SubmessageEnd),
                _ => None,
            },
            WireType::StartGroup => Some(CallbackKind::StartProjectionGroup { tag_length }),
            WireType::EndGroup => Some(CallbackKind::EndProjectionGroup { tag_length }),
        },
    }
}

/// Detects cycles made only of implicit edges. Such a cycle would loop
/// without consuming transition bytes, so it is rejected once before
/// decoding. One coloring pass over the arena.
pub fn contains_implicit_loop(nodes: &[Node]) -> bool {
    let mut loop_ids = vec![0usize; nodes.len()];
    let mut next_loop_id = 1usize;
    for start in 0..nodes.len() {
        if loop_ids[start] != 0 {
            continue;
        }
        loop_ids[start] = next_loop_id;
        let mut index = start;
        while nodes[index].implicit {
            index = nodes[index].next_node as usize;
            if loop_ids[index] == next_loop_id {
                return true;
            }
            if loop_ids[index] != 0 {
                break;
            }
            loop_ids[index] = next_loop_id;
        }
        next_loop_id += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::make_tag;

    fn node(implicit: bool, next_node: u32) -> Node {
        Node {
            implicit,
            next_node,
            ..Node::default()
        }
    }

    // ---------------------------------------------------------------
    // Subtype and buffer predicates
    // ---------------------------------------------------------------

    #[test]
    fn test_only_varint_tags_have_subtypes() {
        assert!(has_subtype(make_tag(1, WireType::Varint)));
        assert!(!has_subtype(make_tag(1, WireType::LengthDelimited)));
        assert!(!has_subtype(make_tag(1, WireType::Fixed32)));
        assert!(!has_subtype(make_tag(1, WireType::StartGroup)));
    }

    #[test]
    fn test_data_buffer_predicate() {
        let varint = make_tag(1, WireType::Varint);
        assert!(has_data_buffer(varint, SUBTYPE_VARINT_1));
        assert!(has_data_buffer(varint, SUBTYPE_VARINT_MAX));
        assert!(!has_data_buffer(varint, SUBTYPE_VARINT_INLINE_0));

        assert!(has_data_buffer(make_tag(1, WireType::Fixed32), SUBTYPE_TRIVIAL));
        assert!(has_data_buffer(make_tag(1, WireType::Fixed64), SUBTYPE_TRIVIAL));

        let string = make_tag(1, WireType::LengthDelimited);
        assert!(has_data_buffer(string, SUBTYPE_LENGTH_DELIMITED_STRING));
        assert!(!has_data_buffer(
            string,
            SUBTYPE_LENGTH_DELIMITED_END_OF_SUBMESSAGE
        ));

        assert!(!has_data_buffer(make_tag(1, WireType::EndGroup), SUBTYPE_TRIVIAL));
    }

    // ---------------------------------------------------------------
    // Callback selection
    // ---------------------------------------------------------------

    #[test]
    fn test_included_varint_callbacks() {
        let tag = make_tag(2, WireType::Varint);
        assert_eq!(
            callback_for(FieldIncluded::Yes, tag, SUBTYPE_VARINT_1 + 2, 1, false),
            Some(CallbackKind::Varint {
                tag_length: 1,
                data_length: 3
            })
        );
        assert_eq!(
            callback_for(FieldIncluded::Yes, tag, SUBTYPE_VARINT_INLINE_0 + 5, 1, false),
            Some(CallbackKind::CopyTag { tag_length: 2 })
        );
        assert_eq!(
            callback_for(FieldIncluded::Yes, tag, SUBTYPE_VARINT_INLINE_MAX + 1, 1, false),
            None
        );
    }

    #[test]
    fn test_excluded_callbacks_skip() {
        let varint = make_tag(2, WireType::Varint);
        assert_eq!(
            callback_for(FieldIncluded::No, varint, SUBTYPE_VARINT_1, 1, true),
            Some(CallbackKind::NoOp)
        );
        let string = make_tag(2, WireType::LengthDelimited);
        assert_eq!(
            callback_for(FieldIncluded::No, string, SUBTYPE_LENGTH_DELIMITED_STRING, 1, true),
            Some(CallbackKind::NoOp)
        );
        assert_eq!(
            callback_for(
                FieldIncluded::No,
                string,
                SUBTYPE_LENGTH_DELIMITED_END_OF_SUBMESSAGE,
                1,
                true
            ),
            Some(CallbackKind::SkippedSubmessageEnd)
        );
    }

    #[test]
    fn test_existence_only_callbacks_emit_zero_values() {
        assert_eq!(
            callback_for(
                FieldIncluded::ExistenceOnly,
                make_tag(2, WireType::Varint),
                SUBTYPE_VARINT_1,
                1,
                true
            ),
            Some(CallbackKind::CopyTag { tag_length: 2 })
        );
        assert_eq!(
            callback_for(
                FieldIncluded::ExistenceOnly,
                make_tag(2, WireType::Fixed64),
                SUBTYPE_TRIVIAL,
                1,
                true
            ),
            Some(CallbackKind::FixedExistence {
                tag_length: 1,
                data_length: 8
            })
        );
    }

    #[test]
    fn test_group_callbacks_depend_on_projection() {
        let start = make_tag(2, WireType::StartGroup);
        assert_eq!(
            callback_for(FieldIncluded::Yes, start, SUBTYPE_TRIVIAL, 1, false),
            Some(CallbackKind::CopyTag { tag_length: 1 })
        );
        assert_eq!(
            callback_for(FieldIncluded::Yes, start, SUBTYPE_TRIVIAL, 1, true),
            Some(CallbackKind::StartProjectionGroup { tag_length: 1 })
        );
    }

    // ---------------------------------------------------------------
    // Implicit loop detection
    // ---------------------------------------------------------------

    #[test]
    fn test_no_loop_without_implicit_nodes() {
        let nodes = vec![node(false, 1), node(false, 0)];
        assert!(!contains_implicit_loop(&nodes));
    }

    #[test]
    fn test_self_loop_detected() {
        let nodes = vec![node(true, 0)];
        assert!(contains_implicit_loop(&nodes));
    }

    #[test]
    fn test_two_node_cycle_detected() {
        let nodes = vec![node(true, 1), node(true, 0)];
        assert!(contains_implicit_loop(&nodes));
    }

    #[test]
    fn test_implicit_chain_into_non_implicit_is_fine() {
        let nodes = vec![node(true, 1), node(true, 2), node(false, 0)];
        assert!(!contains_implicit_loop(&nodes));
    }

    #[test]
    fn test_diamond_into_shared_tail() {
        // Two implicit chains converge on one non-implicit node.
        let nodes = vec![node(true, 2), node(true, 2), node(false, 0)];
        assert!(!contains_implicit_loop(&nodes));
    }
}
