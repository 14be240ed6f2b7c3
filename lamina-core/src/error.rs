//! Error types for Lamina

use thiserror::Error;

/// Result type alias for Lamina operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Lamina
///
/// Decode-time errors (`InsufficientData`, `MalformedHeader`,
/// `UnsupportedExtension`) abort construction of the offending layer only;
/// any layers already decoded below it stay valid. Encode-time errors
/// (`InvalidFieldValue`, `PackError`) abort the whole serialization call so
/// a caller never receives partially valid bytes.
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer shorter than the minimum the decoder requires. Recoverable by
    /// the caller supplying more bytes (e.g. in a streaming context).
    #[error("insufficient data: need {needed} bytes, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Structurally invalid header, or an extension chain that overruns its
    /// declared length. The buffer is rejected.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A known-but-unimplemented extension or sub-protocol type was
    /// encountered during dissection.
    #[error("unsupported extension header type {type_code} ({protocol})")]
    UnsupportedExtension {
        protocol: &'static str,
        type_code: u32,
    },

    /// A field holds a value whose shape does not fit its declared or
    /// derived layout.
    #[error("invalid value for field '{field}': {reason}")]
    InvalidFieldValue { field: String, reason: String },

    /// A present field value could not be packed into its layout width.
    #[error("cannot pack field '{field}': {reason}")]
    PackError { field: String, reason: String },

    /// Field name not known to the layer
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// Maximum layer nesting depth reached while decoding
    #[error("maximum layer nesting depth ({0}) exceeded")]
    DepthExceeded(usize),
}

impl Error {
    /// Create a malformed-header error with a custom message
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedHeader(msg.into())
    }

    /// Create an invalid-field-value error
    pub fn invalid_value<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Error::InvalidFieldValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a pack error
    pub fn pack<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Error::PackError {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
