//! Static per-protocol field schemas
//!
//! Every protocol is described once by a [`Protocol`] value, normally a
//! `static` in the crate defining it: an ordered table of fixed-width header
//! fields with defaults, a byte-order tag, and optional hooks (a custom
//! dissector, a cross-layer query answerer, direction identity fields).
//! Layer instances reference the shared descriptor and never rebuild it.

use crate::dissect::DissectFn;
use crate::layer::Layer;
use lamina_core::Direction;

/// Byte order used when packing and unpacking scalar header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network byte order (the default for almost every wire protocol)
    Big,
    Little,
}

/// Fixed-width binary layout of a single header field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLayout {
    U8,
    U16,
    U32,
    U64,
    /// Fixed-width byte string of exactly `n` bytes (addresses, padding)
    Bytes(usize),
    /// Width derived from the field's current value: dynamic field lists
    /// and per-instance byte fields appended by a dissector.
    Var,
}

impl FieldLayout {
    /// Width in bytes, or `None` for variable-width fields
    pub const fn width(&self) -> Option<usize> {
        match self {
            FieldLayout::U8 => Some(1),
            FieldLayout::U16 => Some(2),
            FieldLayout::U32 => Some(4),
            FieldLayout::U64 => Some(8),
            FieldLayout::Bytes(n) => Some(*n),
            FieldLayout::Var => None,
        }
    }
}

/// Default value of a schema field
///
/// `Absent` marks an optional field that contributes zero bytes to the
/// header until a value is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Absent,
    Uint(u64),
    Bytes(&'static [u8]),
}

/// One entry in a protocol's ordered header-field table
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub layout: FieldLayout,
    pub default: FieldDefault,
}

impl FieldDef {
    pub const fn new(name: &'static str, layout: FieldLayout, default: FieldDefault) -> Self {
        Self {
            name,
            layout,
            default,
        }
    }
}

/// Narrow cross-layer request, keyed by a symbolic identifier
///
/// The only defined query is [`CrossLayerQuery::AddressPair`]: an upper
/// layer computing a pseudo-header checksum asks its immediate lower layer
/// for its address fields. This is deliberately not a general field-query
/// mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossLayerQuery {
    AddressPair,
}

/// Answer to a [`CrossLayerQuery`]
#[derive(Debug, Clone)]
pub enum CrossLayerAnswer {
    AddressPair {
        src: Vec<u8>,
        dst: Vec<u8>,
        /// Whether the answering layer's header changed since it was last
        /// encoded. Lets the caller skip a checksum recomputation.
        header_changed: bool,
    },
}

/// Answers a [`CrossLayerQuery`] from a layer instance
pub type QueryFn = fn(&Layer, CrossLayerQuery) -> Option<CrossLayerAnswer>;

/// Static protocol descriptor
///
/// Identity is by reference: two layers carry the same protocol when their
/// descriptors are the same `static` (see [`Protocol::is`]).
pub struct Protocol {
    /// Short name used in diagnostics (e.g. "ipv6")
    pub name: &'static str,
    pub byte_order: ByteOrder,
    /// Ordered header-field table
    pub fields: &'static [FieldDef],
    /// Custom dissection routine run before the generic fixed-width decode
    pub dissect: Option<DissectFn>,
    /// Cross-layer query answerer (pseudo-header checksum support)
    pub query: Option<QueryFn>,
    /// Ordered pairs of address-like identity fields used by
    /// [`Layer::direction`]; `(source, destination)` per pair.
    pub direction_pairs: &'static [(&'static str, &'static str)],
}

impl Protocol {
    /// Look up a schema field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Header length implied by the schema defaults alone, before any
    /// per-instance presence changes. This is the minimum buffer length the
    /// generic decoder demands up front.
    pub fn default_header_len(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| !matches!(f.default, FieldDefault::Absent))
            .filter_map(|f| f.layout.width())
            .sum()
    }

    /// Whether `self` and `other` are the same protocol descriptor
    pub fn is(&self, other: &Protocol) -> bool {
        std::ptr::eq(self, other)
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// Generic direction classification over a protocol's identity-field pairs.
/// Called by [`Layer::direction`]; split out so protocol crates can reuse it
/// in custom comparisons.
pub(crate) fn classify_direction(a: &Layer, b: &Layer) -> Direction {
    let pairs = a.protocol().direction_pairs;
    if !a.protocol().is(b.protocol()) || pairs.is_empty() {
        return Direction::Unrelated;
    }

    let same = pairs.iter().all(|(src, dst)| {
        a.value(src) == b.value(src) && a.value(dst) == b.value(dst)
    });
    if same {
        return Direction::Same;
    }

    let reverse = pairs.iter().all(|(src, dst)| {
        a.value(src) == b.value(dst) && a.value(dst) == b.value(src)
    });
    if reverse {
        return Direction::Reverse;
    }

    Direction::Unrelated
}
