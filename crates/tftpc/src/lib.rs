//! # tftpc
//!
//! Asynchronous TFTP client.
//!
//! This crate implements the client side of:
//! - RFC 1350: The TFTP Protocol (Revision 2), octet mode
//! - RFC 2347: TFTP Option Extension
//! - RFC 2348: TFTP Blocksize Option
//! - RFC 2349: TFTP Timeout Interval and Transfer Size Options (tsize)
//!
//! ## Layout
//!
//! - [`packet`]: wire codec
//! - [`options`]: blksize/tsize proposal and OACK validation
//! - [`retry`]: per-packet timeout and retransmission budget
//! - [`session`]: the lock-step transfer state machine
//! - [`transport`]: datagram I/O behind a trait, with a UDP implementation
//! - [`client`]: file-level get/put on top of a session

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod options;
pub mod packet;
pub mod retry;
pub mod session;
pub mod transport;

pub use client::TftpClient;
pub use config::{ClientConfig, LogFormat, LoggingConfig};
pub use error::{Result, TftpError};
pub use events::{NoopObserver, RetransmitReason, TransferEvent, TransferObserver};
pub use options::NegotiatedOptions;
pub use packet::{DecodeError, ErrorCode, Opcode, Packet, TftpOption};
pub use retry::RetryTimer;
pub use session::{
    LocalEnd, Operation, TransferRequest, TransferSession, TransferState, TransferSummary,
};
pub use transport::{Transport, UdpTransport};
