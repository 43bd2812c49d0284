//! Progress and outcome notifications emitted by a transfer session.

use crate::packet::ErrorCode;
use crate::session::TransferSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitReason {
    Timeout,
    /// Duplicate or out-of-order packet from the peer.
    Anomaly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Options are settled; `acknowledged` is false when the server ignored them.
    Negotiated {
        block_size: u16,
        transfer_size: Option<u64>,
        acknowledged: bool,
    },
    /// A block was accepted: written to the sink, or acknowledged by the server.
    Block {
        block: u16,
        bytes: usize,
        transferred: u64,
        total: Option<u64>,
    },
    Retransmit {
        block: u16,
        attempt: u32,
        reason: RetransmitReason,
    },
    Completed(TransferSummary),
    Aborted {
        reason: String,
        code: Option<ErrorCode>,
    },
}

/// Receives [`TransferEvent`]s while a session runs.
pub trait TransferObserver {
    fn on_event(&mut self, event: &TransferEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_event(&mut self, _event: &TransferEvent) {}
}

impl<F> TransferObserver for F
where
    F: FnMut(&TransferEvent),
{
    fn on_event(&mut self, event: &TransferEvent) {
        self(event)
    }
}
