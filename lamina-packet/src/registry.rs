//! Handler registry: numeric protocol id → next-layer protocol
//!
//! An explicit, typed registry object injected into every decode call.
//! Population happens once per owner protocol at startup and is idempotent;
//! re-registering an already-populated owner is a no-op. This replaces any
//! notion of a process-global mutable table: whoever drives the decode owns
//! the registry.

use std::collections::{HashMap, HashSet};

use lamina_core::ProtocolId;
use tracing::debug;

use crate::schema::Protocol;

/// Maps `(owner protocol, numeric id)` to the protocol that decodes the
/// owner's remaining bytes.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(&'static str, ProtocolId), &'static Protocol>,
    populated: HashSet<&'static str>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every `(id, target)` pair under `owner` in one shot.
    ///
    /// Returns `false` without touching the table when `owner` already has
    /// registrations — population is one-time and eager, not incremental.
    pub fn register_all(
        &mut self,
        owner: &'static Protocol,
        entries: &[(u32, &'static Protocol)],
    ) -> bool {
        if !self.populated.insert(owner.name) {
            debug!(owner = owner.name, "handlers already registered, skipping");
            return false;
        }
        for (id, target) in entries {
            self.handlers
                .insert((owner.name, ProtocolId::new(*id)), *target);
        }
        true
    }

    /// Resolve a numeric id seen inside `owner` to the next layer's
    /// protocol. `None` is not an error: the payload stays raw bytes.
    pub fn resolve(&self, owner: &Protocol, id: impl Into<ProtocolId>) -> Option<&'static Protocol> {
        self.handlers.get(&(owner.name, id.into())).copied()
    }

    /// Whether `owner` has been populated
    pub fn is_populated(&self, owner: &Protocol) -> bool {
        self.populated.contains(owner.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ByteOrder, Protocol};

    static OUTER: Protocol = Protocol {
        name: "outer",
        byte_order: ByteOrder::Big,
        fields: &[],
        dissect: None,
        query: None,
        direction_pairs: &[],
    };

    static INNER_A: Protocol = Protocol {
        name: "inner_a",
        byte_order: ByteOrder::Big,
        fields: &[],
        dissect: None,
        query: None,
        direction_pairs: &[],
    };

    static INNER_B: Protocol = Protocol {
        name: "inner_b",
        byte_order: ByteOrder::Big,
        fields: &[],
        dissect: None,
        query: None,
        direction_pairs: &[],
    };

    #[test]
    fn test_register_and_resolve() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.register_all(&OUTER, &[(6, &INNER_A), (17, &INNER_B)]));
        assert!(registry.is_populated(&OUTER));

        assert!(registry.resolve(&OUTER, 6u32).unwrap().is(&INNER_A));
        assert!(registry.resolve(&OUTER, 17u32).unwrap().is(&INNER_B));
        assert!(registry.resolve(&OUTER, 99u32).is_none());
        assert!(registry.resolve(&INNER_A, 6u32).is_none());
    }

    #[test]
    fn test_repopulation_is_noop() {
        let mut registry = HandlerRegistry::new();
        registry.register_all(&OUTER, &[(6, &INNER_A)]);
        // second population must not overwrite or extend
        assert!(!registry.register_all(&OUTER, &[(6, &INNER_B), (7, &INNER_B)]));
        assert!(registry.resolve(&OUTER, 6u32).unwrap().is(&INNER_A));
        assert!(registry.resolve(&OUTER, 7u32).is_none());
    }
}
