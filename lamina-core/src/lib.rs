//! Lamina Core Library
//!
//! This crate provides the error handling and shared identifier types for
//! the Lamina packet dissection and construction framework.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{Direction, ProtocolId};
