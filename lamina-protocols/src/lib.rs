//! Protocol descriptors for the Lamina packet engine
//!
//! Each module holds a static [`Protocol`](lamina_packet::Protocol) table
//! plus its dissection hooks and field helpers. Decoding a stack needs a
//! populated [`HandlerRegistry`]; [`default_registry`] wires up everything
//! this crate ships.

pub mod ipv6;
pub mod tcp;
pub mod udp;

use lamina_packet::HandlerRegistry;

/// A registry with all shipped protocols registered under their owners
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    ipv6::register_handlers(&mut registry);
    registry
}
