//! Option negotiation (RFC 2347, RFC 2348, RFC 2349)
//!
//! The client proposes `blksize` and `tsize` in its request. A server that
//! understands options answers with an OACK echoing the subset it accepted;
//! a server that does not simply starts the transfer, in which case the
//! RFC 1350 defaults apply.

use crate::error::{Result, TftpError};
use crate::packet::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, TftpOption};

pub const BLKSIZE: &str = "blksize";
pub const TSIZE: &str = "tsize";

/// Effective transfer parameters once negotiation is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedOptions {
    pub block_size: u16,
    /// Size reported by the server. `None` when unknown, including a
    /// reported size of zero.
    pub transfer_size: Option<u64>,
    /// Whether the server answered with an OACK.
    pub acknowledged: bool,
}

impl Default for NegotiatedOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            transfer_size: None,
            acknowledged: false,
        }
    }
}

/// Options to attach to an RRQ/WRQ.
///
/// `blksize` is only proposed when it differs from the RFC 1350 default.
/// `declared_tsize` is the local file size for uploads, or `0` for downloads
/// to ask the server for the remote size.
pub fn build_request_options(
    requested_block_size: Option<u16>,
    declared_tsize: Option<u64>,
) -> Vec<TftpOption> {
    let mut options = Vec::new();

    if let Some(block_size) = requested_block_size
        && block_size != DEFAULT_BLOCK_SIZE
    {
        options.push(TftpOption::new(BLKSIZE, block_size));
    }

    if let Some(tsize) = declared_tsize {
        options.push(TftpOption::new(TSIZE, tsize));
    }

    options
}

/// Settle the transfer parameters from the server's OACK, or from its
/// absence.
///
/// The server's values are final: it may accept a subset of the proposed
/// options or shrink the block size. It may not grow the block size past the
/// request, answer with an option that was never proposed, or send values
/// that do not parse; those make the OACK unacceptable.
pub fn resolve(oack: Option<&[TftpOption]>, requested: &[TftpOption]) -> Result<NegotiatedOptions> {
    let Some(oack) = oack else {
        return Ok(NegotiatedOptions::default());
    };

    let mut negotiated = NegotiatedOptions {
        acknowledged: true,
        ..NegotiatedOptions::default()
    };

    for option in oack {
        let proposed = requested
            .iter()
            .find(|r| r.is(&option.name))
            .ok_or_else(|| {
                TftpError::OptionNegotiation(format!(
                    "server acknowledged unrequested option '{}'",
                    option.name
                ))
            })?;

        if option.is(BLKSIZE) {
            let block_size: u16 = option.value.parse().map_err(|_| {
                TftpError::OptionNegotiation(format!("invalid blksize '{}'", option.value))
            })?;
            if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
                return Err(TftpError::OptionNegotiation(format!(
                    "blksize {} outside {}-{}",
                    block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
                )));
            }
            // RFC 2348: the server may only reduce the proposed size
            if let Ok(limit) = proposed.value.parse::<u16>()
                && block_size > limit
            {
                return Err(TftpError::OptionNegotiation(format!(
                    "blksize {} exceeds requested {}",
                    block_size, limit
                )));
            }
            negotiated.block_size = block_size;
        } else if option.is(TSIZE) {
            let tsize: u64 = option.value.parse().map_err(|_| {
                TftpError::OptionNegotiation(format!("invalid tsize '{}'", option.value))
            })?;
            // A zero size carries no information; completion is signalled
            // by the short final block.
            negotiated.transfer_size = (tsize > 0).then_some(tsize);
        }
    }

    Ok(negotiated)
}
