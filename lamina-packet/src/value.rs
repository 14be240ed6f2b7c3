//! Runtime field values and dynamic field lists
//!
//! A header field slot holds an `Option<FieldValue>`: `None` means the
//! optional field is disabled and contributes zero bytes. The two list
//! variants are the variable-count header mechanism — a sequence of nested
//! layers (protocol options, extension-header chains) or a sequence of
//! opaque key/value tuples packed by a protocol-supplied routine.

use crate::layer::Layer;
use lamina_core::Result;

/// Current value of a present header field
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Fixed-width unsigned scalar; the width comes from the field layout
    Uint(u64),
    /// Byte string; must match the layout width exactly when packed
    Bytes(Vec<u8>),
    /// Ordered sequence of nested layers
    Layers(LayerList),
    /// Ordered sequence of opaque tuples with a protocol-supplied packer
    Tuples(TupleList),
}

impl PartialEq for FieldValue {
    /// Scalar and byte values compare by content; list values never compare
    /// equal (identity fields are always scalars or byte strings).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Uint(a), FieldValue::Uint(b)) => a == b,
            (FieldValue::Bytes(a), FieldValue::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Uint(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(v: &[u8]) -> Self {
        FieldValue::Bytes(v.to_vec())
    }
}

/// Ordered, mutable sequence of nested layers used as a single header field
///
/// The owning layer is marked dirty whenever a mutable handle to the list is
/// taken (see [`Layer::layer_list_mut`]), so any mutation here invalidates
/// the owner's header cache and layout.
#[derive(Debug, Clone, Default)]
pub struct LayerList {
    items: Vec<Layer>,
}

impl LayerList {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a layer to the end of the list
    pub fn push(&mut self, layer: Layer) {
        self.items.push(layer);
    }

    /// Remove and return the layer at `index`
    ///
    /// # Panics
    /// Panics if `index` is out of bounds, like `Vec::remove`.
    pub fn remove(&mut self, index: usize) -> Layer {
        self.items.remove(index)
    }

    /// Replace the layer at `index`, returning the previous one
    pub fn set(&mut self, index: usize, layer: Layer) -> Option<Layer> {
        let slot = self.items.get_mut(index)?;
        Some(std::mem::replace(slot, layer))
    }

    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Layer> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Layer> {
        self.items.iter_mut()
    }

    /// Total encoded width of all elements (headers plus bodies)
    pub(crate) fn encoded_len(&self) -> Result<usize> {
        let mut total = 0;
        for item in &self.items {
            total += item.total_len()?;
        }
        Ok(total)
    }

    /// Whether any element would encode differently than its cached header
    pub(crate) fn any_stale(&self) -> bool {
        self.items.iter().any(|l| l.header_changed())
    }

    pub(crate) fn items_mut(&mut self) -> &mut [Layer] {
        &mut self.items
    }
}

/// Packs a tuple sequence into wire bytes
pub type TuplePackFn = fn(&[(Vec<u8>, Vec<u8>)]) -> Result<Vec<u8>>;

/// Ordered sequence of opaque `(key, value)` byte tuples
///
/// Packing is delegated to the protocol that owns the field; the packed
/// bytes are cached whole and recomputed from scratch after any mutation.
#[derive(Clone)]
pub struct TupleList {
    items: Vec<(Vec<u8>, Vec<u8>)>,
    pack: TuplePackFn,
    cache: Option<Vec<u8>>,
}

impl TupleList {
    pub fn new(pack: TuplePackFn) -> Self {
        Self {
            items: Vec::new(),
            pack,
            cache: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.items.push((key, value));
        self.cache = None;
    }

    /// Remove and return the tuple at `index`
    ///
    /// # Panics
    /// Panics if `index` is out of bounds, like `Vec::remove`.
    pub fn remove(&mut self, index: usize) -> (Vec<u8>, Vec<u8>) {
        self.cache = None;
        self.items.remove(index)
    }

    /// Replace the tuple at `index`, returning the previous one
    pub fn set(&mut self, index: usize, key: Vec<u8>, value: Vec<u8>) -> Option<(Vec<u8>, Vec<u8>)> {
        let slot = self.items.get_mut(index)?;
        self.cache = None;
        Some(std::mem::replace(slot, (key, value)))
    }

    pub fn get(&self, index: usize) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.items
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.cache.is_none()
    }

    /// Packed width without touching the cache (usable from `&self`)
    pub(crate) fn packed_len(&self) -> Result<usize> {
        match &self.cache {
            Some(c) => Ok(c.len()),
            None => Ok((self.pack)(&self.items)?.len()),
        }
    }

    /// Pack the tuples, filling the cache if it was invalidated
    pub(crate) fn pack_cached(&mut self) -> Result<&[u8]> {
        if self.cache.is_none() {
            self.cache = Some((self.pack)(&self.items)?);
        }
        Ok(self.cache.as_deref().unwrap_or_default())
    }
}

impl std::fmt::Debug for TupleList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleList")
            .field("items", &self.items)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
