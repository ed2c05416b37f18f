//! Error types for the controller daemon.

use coin_common::CoinCommonError;
use coin_openflow::CodecError;
use coin_types::ParseError;
use thiserror::Error;

use crate::event::SessionId;

/// Controller errors.
///
/// None of these terminate the dispatch loop; handlers log them or turn them
/// into a `status` field of a control reply.
#[derive(Error, Debug)]
pub enum CoinError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// OpenFlow codec error
    #[error("OpenFlow codec error: {0}")]
    Codec(#[from] CodecError),

    /// Shell or store error
    #[error(transparent)]
    Common(#[from] CoinCommonError),

    /// Value parse error
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// No switch with known features is connected
    #[error("No switch connected")]
    SwitchNotConnected,

    /// Session id not (or no longer) registered
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// Interface has no port on the datapath
    #[error("Interface {interface} has no datapath port")]
    UnknownPort { interface: String },

    /// Interface has no mirror
    #[error("Interface {interface} has no mirror")]
    UnknownMirror { interface: String },

    /// OS interface query returned nothing usable
    #[error("Interface {interface}: {message}")]
    Interface { interface: String, message: String },
}

impl CoinError {
    pub fn interface(interface: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interface {
            interface: interface.into(),
            message: message.into(),
        }
    }
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, CoinError>;
