//! Custom error types for the event builder.
//!
//! This module defines the primary error type, `EvbError`. Using the `thiserror`
//! crate it gives one consistent way to report the failures that can reach a
//! caller: configuration problems at startup, transport I/O, and wire-format
//! errors surfaced by strict decoding.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML syntax errors or
//!   type mismatches while extracting the configuration.
//! - **`Configuration`**: Semantic errors in values that parsed correctly, such
//!   as a channel count of zero. Caught by `EvbConfig::validate`.
//! - **`Io`**: Wraps `std::io::Error`, covering socket setup and file access.
//! - **`Transport`**: A channel could not deliver or accept data.
//! - **`Format`**: Wraps `evb_format::FormatError`.
//! - **`RunNumber`**: A run was started with a number the event header cannot
//!   carry. Rejected up front so no event of the run is lost at send time.
//!
//! Data-path problems (corrupted fragments, duplicate sources, timeouts) are not
//! errors at this level: the assembler absorbs them and only counts them.

use evb_format::FormatError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, EvbError>;

/// Primary error type for the event builder.
#[derive(Error, Debug)]
pub enum EvbError {
    /// Configuration sources could not be read or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values are inconsistent or out of range.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An input or output channel failed.
    #[error("Transport error on channel {channel}: {message}")]
    Transport {
        /// Channel index (input) or output tag value.
        channel: usize,
        /// Description of the failure.
        message: String,
    },

    /// Wire-format error.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Run number wider than the 24-bit header field.
    #[error("Run number {0} exceeds the event header limit of {max}", max = evb_format::MAX_RUN_NUMBER)]
    RunNumber(u32),
}

impl From<figment::Error> for EvbError {
    fn from(value: figment::Error) -> Self {
        EvbError::Config(Box::new(value))
    }
}

impl EvbError {
    /// Build a transport error for `channel`.
    pub fn transport(channel: usize, message: impl Into<String>) -> Self {
        EvbError::Transport {
            channel,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_names_channel() {
        let err = EvbError::transport(3, "peer closed");
        assert_eq!(err.to_string(), "Transport error on channel 3: peer closed");
    }

    #[test]
    fn format_error_converts_with_question_mark() {
        fn parse() -> AppResult<()> {
            Err(FormatError::FieldOverflow {
                field: "run_number",
                value: 1 << 30,
            })?;
            Ok(())
        }

        match parse() {
            Err(EvbError::Format(FormatError::FieldOverflow { field, .. })) => {
                assert_eq!(field, "run_number")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
