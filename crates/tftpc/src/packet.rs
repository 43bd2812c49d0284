//! TFTP packet codec
//!
//! RFC 1350 defines the five base packets; RFC 2347 adds option pairs to
//! RRQ/WRQ and the OACK reply. Every integer on the wire is big-endian and
//! every string is NUL-terminated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_BLOCK_SIZE: u16 = 512; // RFC 1350 standard block size
pub const MIN_BLOCK_SIZE: u16 = 8; // RFC 2348
pub const MAX_BLOCK_SIZE: u16 = 65464; // RFC 2348
pub const MAX_PACKET_SIZE: usize = MAX_BLOCK_SIZE as usize + 4; // Max block size + 4 byte header
pub const OCTET_MODE: &str = "octet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,   // Read request (RFC 1350)
    Wrq = 2,   // Write request (RFC 1350)
    Data = 3,  // Data packet (RFC 1350)
    Ack = 4,   // Acknowledgment (RFC 1350)
    Error = 5, // Error packet (RFC 1350)
    Oack = 6,  // Option acknowledgment (RFC 2347)
}

impl TryFrom<u16> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u16) -> std::result::Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            6 => Ok(Opcode::Oack),
            _ => Err(DecodeError::UnknownOpcode(value)),
        }
    }
}

impl Opcode {
    /// Shortest well-formed packet carrying this opcode.
    fn min_len(self) -> usize {
        match self {
            Opcode::Rrq | Opcode::Wrq => 4, // opcode + two empty strings
            Opcode::Data | Opcode::Ack => 4,
            Opcode::Error => 5, // opcode + code + empty message
            Opcode::Oack => 2,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Rrq => "RRQ",
            Opcode::Wrq => "WRQ",
            Opcode::Data => "DATA",
            Opcode::Ack => "ACK",
            Opcode::Error => "ERROR",
            Opcode::Oack => "OACK",
        };
        f.write_str(name)
    }
}

// RFC 1350 - TFTP Error Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotDefined,        // 0: Not defined, see error message
    FileNotFound,      // 1: File not found
    AccessViolation,   // 2: Access violation
    DiskFull,          // 3: Disk full or allocation exceeded
    IllegalOperation,  // 4: Illegal TFTP operation
    UnknownTid,        // 5: Unknown transfer ID
    FileExists,        // 6: File already exists
    NoSuchUser,        // 7: No such user
    OptionNegotiation, // 8: Option negotiation failure (RFC 2347)
    /// Codes above 8. Smaller values fold into their named variant through
    /// [`ErrorCode::canonical`].
    Unknown(u16),
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            0 => ErrorCode::NotDefined,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTid,
            6 => ErrorCode::FileExists,
            7 => ErrorCode::NoSuchUser,
            8 => ErrorCode::OptionNegotiation,
            other => ErrorCode::Unknown(other),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NotDefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::IllegalOperation => 4,
            ErrorCode::UnknownTid => 5,
            ErrorCode::FileExists => 6,
            ErrorCode::NoSuchUser => 7,
            ErrorCode::OptionNegotiation => 8,
            ErrorCode::Unknown(other) => other,
        }
    }
}

impl ErrorCode {
    /// The variant `ErrorCode::from` would decode this code's wire value as.
    pub fn canonical(self) -> Self {
        ErrorCode::from(u16::from(self))
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::NotDefined => "Not defined, see error message",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::AccessViolation => "Access violation",
            ErrorCode::DiskFull => "Disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "Illegal TFTP operation",
            ErrorCode::UnknownTid => "Unknown transfer ID",
            ErrorCode::FileExists => "File already exists",
            ErrorCode::NoSuchUser => "No such user",
            ErrorCode::OptionNegotiation => "Option negotiation failed",
            ErrorCode::Unknown(_) => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One `name=value` pair from a request or an OACK, kept in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpOption {
    pub name: String,
    pub value: String,
}

impl TftpOption {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }

    /// RFC 2347: option names are case-insensitive.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },

    #[error("{opcode} packet too short: {len} bytes")]
    Truncated { opcode: Opcode, len: usize },

    #[error("missing NUL terminator after {0}")]
    MissingTerminator(&'static str),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rrq {
        filename: String,
        mode: String,
        options: Vec<TftpOption>,
    },
    Wrq {
        filename: String,
        mode: String,
        options: Vec<TftpOption>,
    },
    Data {
        block: u16,
        payload: Bytes,
    },
    Ack {
        block: u16,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Oack {
        options: Vec<TftpOption>,
    },
}

impl Packet {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Packet::Error {
            code: code.canonical(),
            message: message.into(),
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Rrq { .. } => Opcode::Rrq,
            Packet::Wrq { .. } => Opcode::Wrq,
            Packet::Data { .. } => Opcode::Data,
            Packet::Ack { .. } => Opcode::Ack,
            Packet::Error { .. } => Opcode::Error,
            Packet::Oack { .. } => Opcode::Oack,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut packet = BytesMut::with_capacity(self.encoded_len());
        packet.put_u16(self.opcode() as u16);

        match self {
            // RFC 1350: RRQ/WRQ packet format
            // 2 bytes: opcode (01/02)
            // string: filename (null-terminated)
            // string: mode (null-terminated)
            // RFC 2347: followed by optional option/value pairs
            Packet::Rrq {
                filename,
                mode,
                options,
            }
            | Packet::Wrq {
                filename,
                mode,
                options,
            } => {
                put_string(&mut packet, filename);
                put_string(&mut packet, mode);
                put_options(&mut packet, options);
            }
            // RFC 1350: DATA packet format
            // 2 bytes: block number
            // n bytes: data (0-blocksize bytes)
            Packet::Data { block, payload } => {
                packet.put_u16(*block);
                packet.put_slice(payload);
            }
            Packet::Ack { block } => packet.put_u16(*block),
            // RFC 1350: ERROR packet format
            // 2 bytes: error code
            // string: error message (null-terminated)
            Packet::Error { code, message } => {
                packet.put_u16(u16::from(*code));
                put_string(&mut packet, message);
            }
            Packet::Oack { options } => put_options(&mut packet, options),
        }

        packet.freeze()
    }

    pub fn decode(buf: &[u8]) -> std::result::Result<Self, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::TooShort { len: buf.len() });
        }

        let mut bytes = buf;
        let opcode = Opcode::try_from(bytes.get_u16())?;
        if buf.len() < opcode.min_len() {
            return Err(DecodeError::Truncated {
                opcode,
                len: buf.len(),
            });
        }

        let packet = match opcode {
            Opcode::Rrq | Opcode::Wrq => {
                let filename = take_string(&mut bytes, "filename")?;
                let mode = take_string(&mut bytes, "mode")?;
                let options = take_options(&mut bytes)?;
                if opcode == Opcode::Rrq {
                    Packet::Rrq {
                        filename,
                        mode,
                        options,
                    }
                } else {
                    Packet::Wrq {
                        filename,
                        mode,
                        options,
                    }
                }
            }
            Opcode::Data => {
                let block = bytes.get_u16();
                Packet::Data {
                    block,
                    payload: Bytes::copy_from_slice(bytes),
                }
            }
            Opcode::Ack => Packet::Ack {
                block: bytes.get_u16(),
            },
            Opcode::Error => {
                let code = ErrorCode::from(bytes.get_u16());
                let message = take_string(&mut bytes, "error message")?;
                Packet::Error { code, message }
            }
            Opcode::Oack => Packet::Oack {
                options: take_options(&mut bytes)?,
            },
        };

        Ok(packet)
    }

    fn encoded_len(&self) -> usize {
        2 + match self {
            Packet::Rrq {
                filename,
                mode,
                options,
            }
            | Packet::Wrq {
                filename,
                mode,
                options,
            } => filename.len() + mode.len() + 2 + options_len(options),
            Packet::Data { payload, .. } => 2 + payload.len(),
            Packet::Ack { .. } => 2,
            Packet::Error { message, .. } => 3 + message.len(),
            Packet::Oack { options } => options_len(options),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Rrq {
                filename,
                mode,
                options,
            }
            | Packet::Wrq {
                filename,
                mode,
                options,
            } => {
                write!(f, "{} {} ({})", self.opcode(), filename, mode)?;
                for option in options {
                    write!(f, " {}={}", option.name, option.value)?;
                }
                Ok(())
            }
            Packet::Data { block, payload } => {
                write!(f, "DATA #{} ({} bytes)", block, payload.len())
            }
            Packet::Ack { block } => write!(f, "ACK #{}", block),
            Packet::Error { code, message } => {
                write!(f, "ERROR {} ({}): {}", u16::from(*code), code, message)
            }
            Packet::Oack { options } => {
                f.write_str("OACK")?;
                for option in options {
                    write!(f, " {}={}", option.name, option.value)?;
                }
                Ok(())
            }
        }
    }
}

fn options_len(options: &[TftpOption]) -> usize {
    options
        .iter()
        .map(|o| o.name.len() + o.value.len() + 2)
        .sum()
}

fn put_string(packet: &mut BytesMut, value: &str) {
    packet.put_slice(value.as_bytes());
    packet.put_u8(0);
}

fn put_options(packet: &mut BytesMut, options: &[TftpOption]) {
    for option in options {
        put_string(packet, &option.name);
        put_string(packet, &option.value);
    }
}

fn take_string(bytes: &mut &[u8], field: &'static str) -> std::result::Result<String, DecodeError> {
    let null_pos = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::MissingTerminator(field))?;

    let value = std::str::from_utf8(&bytes[..null_pos])
        .map_err(|_| DecodeError::InvalidUtf8(field))?
        .to_string();
    bytes.advance(null_pos + 1); // Skip the null terminator
    Ok(value)
}

fn take_options(bytes: &mut &[u8]) -> std::result::Result<Vec<TftpOption>, DecodeError> {
    let mut options = Vec::new();
    while bytes.has_remaining() {
        let name = take_string(bytes, "option name")?;
        let value = take_string(bytes, "option value")?;
        options.push(TftpOption { name, value });
    }
    Ok(options)
}
