//! Generic layered packet dissection and construction engine
//!
//! Given a raw byte buffer, this crate recursively decodes a stack of
//! protocol layers into typed, mutable [`Layer`] values and re-serializes a
//! mutated stack back to bytes, recomputing only what changed. Layers can
//! also be hand-built field by field and concatenated with `/`.
//!
//! # Architecture
//!
//! - [`schema`] - static per-protocol field tables and hooks
//! - [`layer`] - layer instances, layout derivation, header caching, encode
//! - [`value`] - field values and the dynamic field lists
//! - [`dissect`] - the pre-decode hook protocols use for variable headers
//! - [`registry`] - numeric protocol id → next-layer dispatch
//! - [`checksum`] - Internet checksum utilities
//!
//! # Quick start
//!
//! Protocols are static descriptors; decoding needs a [`HandlerRegistry`]
//! that says which protocol follows which numeric id:
//!
//! ```ignore
//! let registry = lamina_protocols::default_registry();
//! let mut ip = Layer::decode(&lamina_protocols::ipv6::IPV6, &buf, &registry)?;
//! ip.set_uint("hlim", 63)?;
//! let out = ip.to_bytes()?; // only the mutated header is repacked
//! ```

pub mod checksum;
pub mod dissect;
pub mod layer;
pub mod registry;
pub mod schema;
pub mod util;
pub mod value;

// Re-export commonly used types
pub use checksum::{checksum_add, checksum_fold, internet_checksum};
pub use dissect::{DissectFn, Dissection};
pub use layer::{Body, Layer, MAX_NESTING_DEPTH};
pub use registry::HandlerRegistry;
pub use schema::{
    ByteOrder, CrossLayerAnswer, CrossLayerQuery, FieldDef, FieldDefault, FieldLayout, Protocol,
    QueryFn,
};
pub use util::hexdump;
pub use value::{FieldValue, LayerList, TupleList, TuplePackFn};
