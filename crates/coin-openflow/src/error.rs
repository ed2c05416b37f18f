//! Error types for the OpenFlow codec.

use std::io;
use thiserror::Error;

use crate::header::MsgType;

/// Result type alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while decoding or framing OpenFlow messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Fewer bytes than the structure requires.
    #[error("Truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        /// The structure being decoded.
        what: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Header carries a version other than 1.0.
    #[error("Unsupported OpenFlow version {0:#04x}")]
    BadVersion(u8),

    /// Header carries a type number outside the 1.0 range.
    #[error("Unknown message type {0}")]
    UnknownType(u8),

    /// Known type whose body this codec does not decode.
    #[error("Message type {0:?} is not handled")]
    Unsupported(MsgType),

    /// Length field inconsistent with the structure.
    #[error("Bad length {length} for {what}")]
    BadLength {
        /// The structure being decoded.
        what: &'static str,
        /// The offending length.
        length: usize,
    },

    /// Action type this codec does not decode.
    #[error("Unknown action type {0}")]
    UnknownAction(u16),

    /// Unknown enumeration value in a message body.
    #[error("Invalid {field} value {value}")]
    InvalidValue {
        /// The field name.
        field: &'static str,
        /// The raw value.
        value: u32,
    },

    /// Transport failure while framing.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Returns an error if `available` is smaller than `needed`.
    pub(crate) fn ensure(what: &'static str, needed: usize, available: usize) -> CodecResult<()> {
        if available < needed {
            Err(CodecError::Truncated {
                what,
                needed,
                available,
            })
        } else {
            Ok(())
        }
    }

    /// Returns true for errors after which the byte stream can no longer be
    /// split into frames.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::Io(_) | CodecError::BadLength { what: "header", .. })
    }
}
