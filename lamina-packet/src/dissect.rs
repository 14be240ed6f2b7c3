//! Protocol-specific dissection hooks
//!
//! A dissector runs before the generic fixed-width decode claims the
//! buffer. Through the [`Dissection`] view it can toggle field presence,
//! append per-instance fields (typically a dynamic field list it has just
//! parsed, such as an extension-header chain) and nominate the numeric
//! protocol id plus byte offset of the payload for the handler registry to
//! resolve.

use lamina_core::{ProtocolId, Result};

use crate::layer::Layer;
use crate::registry::HandlerRegistry;
use crate::schema::Protocol;

/// Custom dissection routine of a protocol
pub type DissectFn = fn(&mut Dissection<'_>) -> Result<()>;

/// Mutable view of a layer mid-decode, handed to its protocol's dissector
pub struct Dissection<'a> {
    layer: &'a mut Layer,
    buf: &'a [u8],
    registry: &'a HandlerRegistry,
    depth: usize,
    next: Option<(ProtocolId, usize)>,
}

impl<'a> Dissection<'a> {
    pub(crate) fn new(
        layer: &'a mut Layer,
        buf: &'a [u8],
        registry: &'a HandlerRegistry,
        depth: usize,
    ) -> Self {
        Self {
            layer,
            buf,
            registry,
            depth,
            next: None,
        }
    }

    /// The full undecoded buffer for this layer
    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    /// The layer being built
    pub fn layer_mut(&mut self) -> &mut Layer {
        self.layer
    }

    /// The registry in effect for this decode
    pub fn registry(&self) -> &HandlerRegistry {
        self.registry
    }

    /// Nominate the terminal payload protocol id and the buffer offset the
    /// payload starts at. The engine resolves the id after the dissector
    /// returns; an unregistered id leaves the payload as raw bytes.
    pub fn set_next_protocol(&mut self, id: impl Into<ProtocolId>, offset: usize) {
        self.next = Some((id.into(), offset));
    }

    /// Decode a sub-header from an exact slice of this layer's buffer,
    /// counting against the nesting-depth budget.
    pub fn decode_exact(&self, proto: &'static Protocol, bytes: &[u8]) -> Result<Layer> {
        Layer::decode_nested(proto, bytes, self.registry, self.depth + 1)
    }

    pub(crate) fn take_next(&mut self) -> Option<(ProtocolId, usize)> {
        self.next.take()
    }
}
