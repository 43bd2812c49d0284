use std::time::Duration;

use thiserror::Error;

use crate::packet::{DecodeError, ErrorCode};

/// Everything that can end a transfer early.
///
/// Sequence anomalies (duplicate or out-of-order blocks) never show up here;
/// the session absorbs them until they exhaust the retry budget, which then
/// surfaces as [`TftpError::RetriesExhausted`].
#[derive(Error, Debug)]
pub enum TftpError {
    #[error("TFTP error: {0}")]
    Tftp(String),

    /// The server answered with an ERROR packet.
    #[error("Server error {code} ({}): {message}", wire_code(.code))]
    Protocol { code: ErrorCode, message: String },

    #[error("Maximum retries reached: no reply for block {block} after {retries} retransmissions ({timeout:?} per wait)")]
    RetriesExhausted {
        block: u16,
        retries: u32,
        timeout: Duration,
    },

    /// An undecodable packet arrived from the peer; an ERROR(4) was sent back.
    #[error("Malformed packet: {0}")]
    Malformed(#[from] DecodeError),

    /// A well-formed packet that has no place in this transfer; an ERROR(4) was sent back.
    #[error("Illegal TFTP operation: {0}")]
    IllegalOperation(String),

    /// The server's OACK could not be accepted; an ERROR(8) was sent back.
    #[error("Option negotiation failed: {0}")]
    OptionNegotiation(String),

    #[error("Invalid transfer request: {0}")]
    InvalidRequest(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TftpError {
    /// True when the server made the decision to end the transfer.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, TftpError::Protocol { .. })
    }

    /// The TFTP error code associated with this failure, if any.
    ///
    /// For server errors this is the code the server sent; for failures the
    /// client reported on the wire it is the code the client sent.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            TftpError::Protocol { code, .. } => Some(*code),
            TftpError::Malformed(_) | TftpError::IllegalOperation(_) => {
                Some(ErrorCode::IllegalOperation)
            }
            TftpError::OptionNegotiation(_) => Some(ErrorCode::OptionNegotiation),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TftpError>;

fn wire_code(code: &ErrorCode) -> u16 {
    u16::from(*code)
}
