//! Protocol Buffers Wire-format Helpers
//!
//! Just enough wire-format knowledge for the transpose codec: splitting a
//! tag into field number and wire type, the six real wire types, and the
//! internal seventh wire type the codec steals to mark end-of-submessage so
//! one state machine handles fields and submessage framing uniformly.

/// Protobuf wire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

/// Wire-type value (not a real protobuf one) marking end-of-submessage in
/// transposed tags.
pub const SUBMESSAGE_WIRE_TYPE: u32 = 6;

/// Difference between the stolen wire type and the real one it stands for.
pub const SUBMESSAGE_WIRE_TYPE_OFFSET: u32 = SUBMESSAGE_WIRE_TYPE - WireType::LengthDelimited as u32;

pub fn tag_wire_type_raw(tag: u32) -> u32 {
    tag & 7
}

pub fn tag_wire_type(tag: u32) -> Option<WireType> {
    match tag & 7 {
        0 => Some(WireType::Varint),
        1 => Some(WireType::Fixed64),
        2 => Some(WireType::LengthDelimited),
        3 => Some(WireType::StartGroup),
        4 => Some(WireType::EndGroup),
        5 => Some(WireType::Fixed32),
        _ => None,
    }
}

pub fn tag_field_number(tag: u32) -> u32 {
    tag >> 3
}

pub fn make_tag(field_number: u32, wire_type: WireType) -> u32 {
    (field_number << 3) | wire_type as u32
}

/// True for tags the codec accepts: a known wire type and a field number of
/// at least 1 (so the tag value is at least 8).
pub fn is_valid_tag(tag: u32) -> bool {
    tag >= 8 && tag_wire_type(tag).is_some()
}
