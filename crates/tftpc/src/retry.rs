//! Timeout and retransmission bookkeeping for the one outstanding packet.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::packet::{DecodeError, Packet};
use crate::transport::Transport;

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-send the outstanding packet; `attempt` counts from 1.
    Retry { attempt: u32 },
    GiveUp,
}

/// Which datagrams are allowed to reach the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerFilter {
    /// Before the first reply: anything from the server's host.
    Host(IpAddr),
    /// After the first reply: only the transfer ID that sent it.
    Bound(SocketAddr),
}

impl PeerFilter {
    pub fn accepts(&self, from: SocketAddr) -> bool {
        match self {
            PeerFilter::Host(ip) => from.ip() == *ip,
            PeerFilter::Bound(peer) => from == *peer,
        }
    }
}

#[derive(Debug)]
pub enum Reply {
    Packet {
        packet: std::result::Result<Packet, DecodeError>,
        from: SocketAddr,
    },
    Timeout,
}

#[derive(Debug, Clone)]
pub struct RetryTimer {
    timeout: Duration,
    max_retries: u32,
    retries: u32,
}

impl RetryTimer {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            retries: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retransmissions spent on the current outstanding packet.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// A new packet is outstanding; its budget starts from zero.
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// The wait expired with nothing usable.
    pub fn note_timeout(&mut self) -> RetryDecision {
        self.spend()
    }

    /// The peer answered, but not with the packet that advances the
    /// transfer. The outstanding packet is re-sent out of the same budget.
    pub fn note_anomaly(&mut self) -> RetryDecision {
        self.spend()
    }

    fn spend(&mut self) -> RetryDecision {
        if self.retries >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        self.retries += 1;
        RetryDecision::Retry {
            attempt: self.retries,
        }
    }

    /// Wait up to one timeout interval for a datagram the filter accepts.
    ///
    /// Datagrams from other origins are dropped before decoding and do not
    /// extend the wait.
    pub async fn await_reply<T: Transport + ?Sized>(
        &self,
        transport: &T,
        filter: PeerFilter,
        buf: &mut [u8],
    ) -> io::Result<Reply> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let (len, from) = match timeout_at(deadline, transport.recv_from(buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(Reply::Timeout),
            };

            if !filter.accepts(from) {
                debug!("Ignoring packet from unexpected source: {}", from);
                continue;
            }

            return Ok(Reply::Packet {
                packet: Packet::decode(&buf[..len]),
                from,
            });
        }
    }
}

impl Default for RetryTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS), MAX_RETRIES)
    }
}
