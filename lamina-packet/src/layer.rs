//! Layer instances: decode, mutate, re-encode
//!
//! A [`Layer`] is one decoded or hand-built protocol header plus its
//! payload. It holds the current field values (schema order, extended by
//! any fields a dissector appended), exactly one body representation (raw
//! trailing bytes or a nested layer), a cached copy of the last-encoded
//! header and a dirty flag. Encoding reuses the cached header whenever
//! nothing that contributes bytes to it has changed.
//!
//! Layers form a single-owner tree: a layer owns its body and every layer
//! inside its list fields outright. Dirtiness flows upward without back
//! references — taking a mutable handle to a list field marks the owner
//! dirty, and the owner's cache check also consults the dirty flags of the
//! list elements themselves.

use std::fmt;
use std::ops::Div;

use bytes::{BufMut, BytesMut};
use lamina_core::{Direction, Error, ProtocolId, Result};
use tracing::{debug, trace};

use crate::dissect::Dissection;
use crate::registry::HandlerRegistry;
use crate::schema::{classify_direction, ByteOrder, FieldDefault, FieldLayout, Protocol};
use crate::value::{FieldValue, LayerList, TupleList};

/// Hard ceiling on recursive layer decoding. Guards against a crafted
/// buffer exploiting a handler cycle (e.g. a protocol id that maps back to
/// the same protocol) recursing without bound.
pub const MAX_NESTING_DEPTH: usize = 16;

/// Body of a layer: raw trailing bytes or exactly one nested layer,
/// never both. An empty `Raw` is the "no payload yet" state.
#[derive(Debug, Clone)]
pub enum Body {
    Raw(Vec<u8>),
    Layer(Box<Layer>),
}

#[derive(Debug, Clone)]
struct Field {
    name: &'static str,
    layout: FieldLayout,
    value: Option<FieldValue>,
}

/// One decoded or constructed protocol layer
#[derive(Clone)]
pub struct Layer {
    proto: &'static Protocol,
    fields: Vec<Field>,
    body: Body,
    dirty: bool,
    header_cache: Option<Vec<u8>>,
}

impl Layer {
    /// Create a layer with every field at its schema default and an empty
    /// raw body. No dissection happens on this path.
    pub fn new(proto: &'static Protocol) -> Self {
        let fields = proto
            .fields
            .iter()
            .map(|def| Field {
                name: def.name,
                layout: def.layout,
                value: match def.default {
                    FieldDefault::Absent => None,
                    FieldDefault::Uint(v) => Some(FieldValue::Uint(v)),
                    FieldDefault::Bytes(b) => Some(FieldValue::Bytes(b.to_vec())),
                },
            })
            .collect();
        Self {
            proto,
            fields,
            body: Body::Raw(Vec::new()),
            dirty: true,
            header_cache: None,
        }
    }

    /// Create a layer from schema defaults with the given overrides applied
    pub fn with_fields(proto: &'static Protocol, overrides: &[(&str, FieldValue)]) -> Result<Self> {
        let mut layer = Self::new(proto);
        for (name, value) in overrides {
            layer.set(name, Some(value.clone()))?;
        }
        Ok(layer)
    }

    /// Decode a layer stack from a raw buffer
    ///
    /// The protocol's dissector (if any) runs first and may toggle field
    /// presence, append per-instance fields and nominate the protocol id of
    /// the payload. The registry then resolves that id to the next layer's
    /// protocol; an unresolved id is not an error, the payload simply stays
    /// raw bytes.
    pub fn decode(proto: &'static Protocol, buf: &[u8], registry: &HandlerRegistry) -> Result<Self> {
        Self::decode_nested(proto, buf, registry, 0)
    }

    pub(crate) fn decode_nested(
        proto: &'static Protocol,
        buf: &[u8],
        registry: &HandlerRegistry,
        depth: usize,
    ) -> Result<Self> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::DepthExceeded(MAX_NESTING_DEPTH));
        }
        // An empty buffer is never decodable; hand-built layers are the way
        // to express "all defaults, no payload".
        let min = proto.default_header_len();
        if buf.len() < min.max(1) {
            return Err(Error::InsufficientData {
                needed: min.max(1),
                got: buf.len(),
            });
        }

        let mut layer = Self::new(proto);
        let mut next = None;
        if let Some(dissect) = proto.dissect {
            let mut view = Dissection::new(&mut layer, buf, registry, depth);
            dissect(&mut view)?;
            next = view.take_next();
        }

        let header_len = layer.unpack_header(buf)?;

        let payload_at = match next {
            Some((_, off)) => off,
            None => header_len,
        };
        if payload_at < header_len || payload_at > buf.len() {
            return Err(Error::malformed(format!(
                "{}: payload offset {} outside buffer of {} bytes",
                proto.name,
                payload_at,
                buf.len()
            )));
        }

        layer.body = match next {
            Some((id, _)) => match registry.resolve(proto, id) {
                Some(child) => {
                    match Self::decode_nested(child, &buf[payload_at..], registry, depth + 1) {
                        Ok(inner) => Body::Layer(Box::new(inner)),
                        Err(err) => {
                            // A failed inner decode aborts that layer only;
                            // this layer stays valid with a raw payload.
                            debug!(
                                protocol = proto.name,
                                inner = child.name,
                                %err,
                                "inner layer decode failed, keeping raw payload"
                            );
                            Body::Raw(buf[payload_at..].to_vec())
                        }
                    }
                }
                None => {
                    trace!(protocol = proto.name, id = id.value(), "no handler, raw payload");
                    Body::Raw(buf[payload_at..].to_vec())
                }
            },
            None => Body::Raw(buf[header_len..].to_vec()),
        };
        Ok(layer)
    }

    /// Fill present fixed-width fields from the buffer, seed the header
    /// cache with the exact header bytes and return the header length.
    fn unpack_header(&mut self, buf: &[u8]) -> Result<usize> {
        let header_len = self.header_len()?;
        if buf.len() < header_len {
            return Err(Error::InsufficientData {
                needed: header_len,
                got: buf.len(),
            });
        }
        let order = self.proto.byte_order;
        let mut off = 0;
        for field in &mut self.fields {
            let Some(value) = &mut field.value else {
                continue;
            };
            match value {
                FieldValue::Uint(v) => {
                    let width = field.layout.width().ok_or_else(|| {
                        Error::invalid_value(field.name, "scalar value on variable-width layout")
                    })?;
                    *v = read_uint(&buf[off..off + width], order);
                    off += width;
                }
                FieldValue::Bytes(b) => {
                    let width = field.layout.width().unwrap_or(b.len());
                    *b = buf[off..off + width].to_vec();
                    off += width;
                }
                // List fields were populated by the dissector from these
                // same bytes; seed their caches so the decoded layer reads
                // as clean, then step over their span.
                FieldValue::Layers(list) => {
                    for item in list.items_mut() {
                        if item.header_changed() {
                            item.pack_header()?;
                        }
                    }
                    off += list.encoded_len()?;
                }
                FieldValue::Tuples(list) => off += list.pack_cached()?.len(),
            }
        }
        self.header_cache = Some(buf[..header_len].to_vec());
        self.dirty = false;
        Ok(header_len)
    }

    /// The static protocol descriptor of this layer
    pub fn protocol(&self) -> &'static Protocol {
        self.proto
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Current value of a field, or `None` when absent or unknown
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.field(name)?.value.as_ref()
    }

    /// Whether the named field currently contributes bytes to the header
    pub fn is_present(&self, name: &str) -> bool {
        self.field(name).map(|f| f.value.is_some()).unwrap_or(false)
    }

    /// Scalar field accessor
    pub fn uint(&self, name: &str) -> Result<u64> {
        match self.value(name) {
            Some(FieldValue::Uint(v)) => Ok(*v),
            Some(_) => Err(Error::invalid_value(name, "not a scalar field")),
            None => match self.field(name) {
                Some(_) => Err(Error::invalid_value(name, "field is absent")),
                None => Err(Error::UnknownField(name.to_string())),
            },
        }
    }

    /// Byte-string field accessor
    pub fn bytes(&self, name: &str) -> Result<&[u8]> {
        match self.value(name) {
            Some(FieldValue::Bytes(b)) => Ok(b),
            Some(_) => Err(Error::invalid_value(name, "not a byte-string field")),
            None => match self.field(name) {
                Some(_) => Err(Error::invalid_value(name, "field is absent")),
                None => Err(Error::UnknownField(name.to_string())),
            },
        }
    }

    /// Set a header field, `None` disabling an optional field so it
    /// contributes zero bytes. Marks the layer dirty; layout and header
    /// length are re-derived on the next encode.
    pub fn set(&mut self, name: &str, value: Option<FieldValue>) -> Result<()> {
        let Some(field) = self.fields.iter_mut().find(|f| f.name == name) else {
            return Err(Error::UnknownField(name.to_string()));
        };
        let presence_changed = field.value.is_some() != value.is_some();
        field.value = value;
        if presence_changed {
            trace!(field = name, "field presence changed, layout re-derived on next encode");
        }
        self.touch();
        Ok(())
    }

    /// Set a scalar header field
    pub fn set_uint(&mut self, name: &str, value: u64) -> Result<()> {
        self.set(name, Some(FieldValue::Uint(value)))
    }

    /// Set a byte-string header field
    pub fn set_bytes(&mut self, name: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        self.set(name, Some(FieldValue::Bytes(value.into())))
    }

    /// Disable an optional field (it contributes zero bytes until re-set)
    pub fn unset(&mut self, name: &str) -> Result<()> {
        self.set(name, None)
    }

    /// Append a per-instance field after the schema fields. Used by
    /// dissectors to attach fields the static schema cannot know about
    /// (option lists, trailing address blocks).
    pub fn add_field(&mut self, name: &'static str, layout: FieldLayout, value: FieldValue) -> Result<()> {
        if self.fields.iter().any(|f| f.name == name) {
            return Err(Error::invalid_value(name, "field already exists"));
        }
        self.fields.push(Field {
            name,
            layout,
            value: Some(value),
        });
        self.touch();
        Ok(())
    }

    /// Shared read access to a layer-list field
    pub fn layer_list(&self, name: &str) -> Result<&LayerList> {
        match self.value(name) {
            Some(FieldValue::Layers(list)) => Ok(list),
            Some(_) => Err(Error::invalid_value(name, "not a layer list")),
            None => Err(Error::invalid_value(name, "field is absent")),
        }
    }

    /// Mutable access to a layer-list field
    ///
    /// Taking the handle conservatively marks this layer dirty: any
    /// mutation through it changes the header bytes or their layout.
    pub fn layer_list_mut(&mut self, name: &str) -> Result<&mut LayerList> {
        self.dirty = true;
        self.header_cache = None;
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => match &mut field.value {
                Some(FieldValue::Layers(list)) => Ok(list),
                Some(_) => Err(Error::invalid_value(name, "not a layer list")),
                None => Err(Error::invalid_value(name, "field is absent")),
            },
            None => Err(Error::UnknownField(name.to_string())),
        }
    }

    /// Shared read access to a tuple-list field
    pub fn tuple_list(&self, name: &str) -> Result<&TupleList> {
        match self.value(name) {
            Some(FieldValue::Tuples(list)) => Ok(list),
            Some(_) => Err(Error::invalid_value(name, "not a tuple list")),
            None => Err(Error::invalid_value(name, "field is absent")),
        }
    }

    /// Mutable access to a tuple-list field; marks this layer dirty
    pub fn tuple_list_mut(&mut self, name: &str) -> Result<&mut TupleList> {
        self.dirty = true;
        self.header_cache = None;
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => match &mut field.value {
                Some(FieldValue::Tuples(list)) => Ok(list),
                Some(_) => Err(Error::invalid_value(name, "not a tuple list")),
                None => Err(Error::invalid_value(name, "field is absent")),
            },
            None => Err(Error::UnknownField(name.to_string())),
        }
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.header_cache = None;
    }

    /// Body accessor
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Raw payload bytes, or `None` when a nested layer is attached
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Raw(data) => Some(data),
            Body::Layer(_) => None,
        }
    }

    /// Set the body to raw bytes, detaching any nested layer first
    pub fn set_payload(&mut self, data: impl Into<Vec<u8>>) {
        self.body = Body::Raw(data.into());
        self.touch();
    }

    /// The nested layer, if one is attached
    pub fn inner(&self) -> Option<&Layer> {
        match &self.body {
            Body::Layer(inner) => Some(inner),
            Body::Raw(_) => None,
        }
    }

    pub fn inner_mut(&mut self) -> Option<&mut Layer> {
        match &mut self.body {
            Body::Layer(inner) => Some(inner),
            Body::Raw(_) => None,
        }
    }

    /// Attach a nested layer as the body, discarding raw payload bytes
    pub fn set_inner(&mut self, layer: Layer) {
        self.body = Body::Layer(Box::new(layer));
        self.touch();
    }

    /// Detach and return the nested layer, leaving an empty raw body
    pub fn take_inner(&mut self) -> Option<Layer> {
        if matches!(self.body, Body::Layer(_)) {
            self.touch();
            match std::mem::replace(&mut self.body, Body::Raw(Vec::new())) {
                Body::Layer(inner) => Some(*inner),
                Body::Raw(_) => None,
            }
        } else {
            None
        }
    }

    fn attach_innermost(&mut self, other: Layer) {
        match &mut self.body {
            Body::Layer(inner) => inner.attach_innermost(other),
            Body::Raw(_) => self.set_inner(other),
        }
    }

    /// Search downward (this layer included) for the first layer of the
    /// given protocol.
    pub fn find(&self, proto: &Protocol) -> Option<&Layer> {
        let mut current = Some(self);
        while let Some(layer) = current {
            if layer.proto.is(proto) {
                return Some(layer);
            }
            current = layer.inner();
        }
        None
    }

    pub fn find_mut(&mut self, proto: &Protocol) -> Option<&mut Layer> {
        if self.proto.is(proto) {
            return Some(self);
        }
        match &mut self.body {
            Body::Layer(inner) => inner.find_mut(proto),
            Body::Raw(_) => None,
        }
    }

    /// Classify this layer against a peer instance of the same protocol by
    /// ordered comparison of the protocol's identity-field pairs.
    pub fn direction(&self, other: &Layer) -> Direction {
        classify_direction(self, other)
    }

    /// Ask this layer's cross-layer query hook, if the protocol has one
    pub fn query(
        &self,
        request: crate::schema::CrossLayerQuery,
    ) -> Option<crate::schema::CrossLayerAnswer> {
        (self.proto.query?)(self, request)
    }

    /// Ordered (name, width) table of the present fields. Recomputed from
    /// the current values; running it twice without a mutation in between
    /// yields the same result.
    pub fn layout(&self) -> Result<Vec<(&'static str, usize)>> {
        let mut out = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let Some(value) = &field.value else {
                continue;
            };
            let width = match (value, field.layout.width()) {
                (FieldValue::Uint(_), Some(w)) => w,
                (FieldValue::Bytes(_), Some(w)) => w,
                (FieldValue::Bytes(b), None) => b.len(),
                (FieldValue::Layers(list), _) => list.encoded_len()?,
                (FieldValue::Tuples(list), _) => list.packed_len()?,
                (FieldValue::Uint(_), None) => {
                    return Err(Error::invalid_value(
                        field.name,
                        "scalar value on variable-width layout",
                    ))
                }
            };
            out.push((field.name, width));
        }
        Ok(out)
    }

    /// Current header length in bytes
    pub fn header_len(&self) -> Result<usize> {
        Ok(self.layout()?.iter().map(|(_, w)| w).sum())
    }

    /// Header plus body length, recursing through nested layers
    pub fn total_len(&self) -> Result<usize> {
        let body = match &self.body {
            Body::Raw(data) => data.len(),
            Body::Layer(inner) => inner.total_len()?,
        };
        Ok(self.header_len()? + body)
    }

    /// Whether the next encode will recompute this header instead of using
    /// the cached bytes. True after any header mutation, and while any
    /// element of a list field is itself dirty.
    pub fn header_changed(&self) -> bool {
        if self.dirty || self.header_cache.is_none() {
            return true;
        }
        self.fields.iter().any(|f| match &f.value {
            Some(FieldValue::Layers(list)) => list.any_stale(),
            Some(FieldValue::Tuples(list)) => list.is_stale(),
            _ => false,
        })
    }

    /// Pack this layer's header, from cache when clean
    pub fn pack_header(&mut self) -> Result<Vec<u8>> {
        if !self.header_changed() {
            if let Some(cache) = &self.header_cache {
                return Ok(cache.clone());
            }
        }

        let expected: usize = self.header_len()?;
        let order = self.proto.byte_order;
        let mut buf = BytesMut::with_capacity(expected);
        for field in &mut self.fields {
            let Some(value) = &mut field.value else {
                continue;
            };
            match value {
                FieldValue::Uint(v) => {
                    let width = field.layout.width().ok_or_else(|| {
                        Error::invalid_value(field.name, "scalar value on variable-width layout")
                    })?;
                    put_uint(&mut buf, *v, width, order)
                        .map_err(|reason| Error::pack(field.name, reason))?;
                }
                FieldValue::Bytes(b) => {
                    if let Some(width) = field.layout.width() {
                        if b.len() != width {
                            return Err(Error::pack(
                                field.name,
                                format!("expected {} bytes, got {}", width, b.len()),
                            ));
                        }
                    }
                    buf.put_slice(b);
                }
                FieldValue::Layers(list) => {
                    for item in list.items_mut() {
                        buf.put_slice(&item.to_bytes()?);
                    }
                }
                FieldValue::Tuples(list) => buf.put_slice(list.pack_cached()?),
            }
        }

        let header = buf.to_vec();
        self.header_cache = Some(header.clone());
        self.dirty = false;
        Ok(header)
    }

    /// Serialize header and body to wire bytes. Byte-identical to the
    /// decoded input when nothing was mutated in between.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = self.pack_header()?;
        match &mut self.body {
            Body::Raw(data) => out.extend_from_slice(data),
            Body::Layer(inner) => out.extend_from_slice(&inner.to_bytes()?),
        }
        Ok(out)
    }
}

/// `a / b` attaches `b` at the deepest currently-unattached body position
/// of `a` and returns `a`, so `eth / ip / tcp` reads top-down.
impl Div for Layer {
    type Output = Layer;

    fn div(mut self, rhs: Layer) -> Layer {
        self.attach_innermost(rhs);
        self
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.proto.name);
        for field in &self.fields {
            if let Some(value) = &field.value {
                s.field(field.name, value);
            }
        }
        match &self.body {
            Body::Raw(data) => s.field("payload_len", &data.len()),
            Body::Layer(inner) => s.field("inner", &inner.proto.name),
        };
        s.finish()
    }
}

fn read_uint(buf: &[u8], order: ByteOrder) -> u64 {
    match order {
        ByteOrder::Big => buf.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64),
        ByteOrder::Little => buf
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64),
    }
}

fn put_uint(
    buf: &mut BytesMut,
    value: u64,
    width: usize,
    order: ByteOrder,
) -> std::result::Result<(), String> {
    // a u64 scalar can never legally occupy a wider slot
    if width > 8 {
        return Err(format!("scalar on a {width}-byte field"));
    }
    if width < 8 && value >> (8 * width) != 0 {
        return Err(format!("value {value:#x} does not fit in {width} bytes"));
    }
    match order {
        ByteOrder::Big => buf.put_uint(value, width),
        ByteOrder::Little => buf.put_uint_le(value, width),
    }
    Ok(())
}
