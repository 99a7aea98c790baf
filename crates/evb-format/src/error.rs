//! Errors raised while parsing or packing wire structures.
//!
//! These are strict errors: the format crate never substitutes placeholder
//! data. Callers that must always produce a usable fragment (the builder's
//! decoder) catch them and build a corrupted fragment themselves.

use thiserror::Error;

/// Convenience alias for results of wire-format operations.
pub type FormatResult<T> = std::result::Result<T, FormatError>;

/// Failure to interpret a byte buffer as a fragment or event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Fewer bytes than the fixed header requires.
    #[error("buffer too short for {what}: need {needed} bytes, got {actual}")]
    TooShort {
        /// Structure being decoded.
        what: &'static str,
        /// Minimum number of bytes required.
        needed: usize,
        /// Number of bytes available.
        actual: usize,
    },

    /// The leading marker byte does not identify the expected structure.
    #[error("bad {what} marker: expected {expected:#04x}, found {found:#04x}")]
    BadMarker {
        /// Structure being decoded.
        what: &'static str,
        /// Marker the structure must start with.
        expected: u8,
        /// Marker actually present.
        found: u8,
    },

    /// Declared header size is smaller than the fixed header.
    #[error("declared {what} header size {declared} is smaller than {minimum}")]
    HeaderSize {
        /// Structure being decoded.
        what: &'static str,
        /// Header size found in the buffer.
        declared: u16,
        /// Size of the fixed header.
        minimum: usize,
    },

    /// Header and payload sizes do not add up to the buffer length.
    #[error("{what} length mismatch: header declares {declared} bytes, buffer holds {actual}")]
    LengthMismatch {
        /// Structure being decoded.
        what: &'static str,
        /// `header_size + payload_size` from the header.
        declared: usize,
        /// Number of bytes actually present.
        actual: usize,
    },

    /// An event's fragment count disagrees with the fragments it carries.
    #[error("event declares {declared} fragments but carries {found}")]
    FragmentCount {
        /// Count from the event header.
        declared: u8,
        /// Fragments actually found in the payload.
        found: usize,
    },

    /// A value does not fit into its wire field.
    #[error("{field} value {value} does not fit into the wire field")]
    FieldOverflow {
        /// Name of the wire field.
        field: &'static str,
        /// Offending value.
        value: u64,
    },
}
