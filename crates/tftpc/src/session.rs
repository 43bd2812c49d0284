//! Transfer state machine.
//!
//! One [`TransferSession`] drives one download (RRQ) or upload (WRQ) with a
//! single packet outstanding at any time (RFC 1350 lock-step):
//!
//! ```text
//! Negotiating ──OACK / DATA 1 / ACK 0──▶ Transferring ──short block──▶ Complete
//!      │                                      │
//!      └────────── ERROR, bad packet, retries exhausted, cancel ──────▶ Aborted
//! ```
//!
//! The first reply fixes the server's transfer ID; everything afterwards is
//! exchanged with that exact address and port.

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TftpError};
use crate::events::{RetransmitReason, TransferEvent, TransferObserver};
use crate::options::{self, NegotiatedOptions};
use crate::packet::{
    DEFAULT_BLOCK_SIZE, ErrorCode, MAX_BLOCK_SIZE, MAX_PACKET_SIZE, MIN_BLOCK_SIZE, OCTET_MODE,
    Packet, TftpOption,
};
use crate::retry::{PeerFilter, Reply, RetryDecision, RetryTimer};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Download (RRQ).
    Read,
    /// Upload (WRQ).
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("download"),
            Operation::Write => f.write_str("upload"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Negotiating,
    Transferring,
    Complete,
    Aborted,
}

/// What to transfer, independent of where the local bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub operation: Operation,
    pub remote_filename: String,
    /// Block size to propose; the server's answer is final.
    pub block_size: u16,
    /// `tsize` to declare. Downloads send `0` to ask for the remote size.
    pub transfer_size: Option<u64>,
}

impl TransferRequest {
    pub fn download(remote_filename: impl Into<String>) -> Self {
        Self {
            operation: Operation::Read,
            remote_filename: remote_filename.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            transfer_size: Some(0),
        }
    }

    pub fn upload(remote_filename: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            operation: Operation::Write,
            remote_filename: remote_filename.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            transfer_size: size,
        }
    }

    pub fn with_block_size(mut self, block_size: u16) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn without_transfer_size(mut self) -> Self {
        self.transfer_size = None;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.remote_filename.is_empty() {
            return Err(TftpError::InvalidRequest(
                "remote filename must not be empty".to_string(),
            ));
        }
        if self.remote_filename.contains('\0') {
            return Err(TftpError::InvalidRequest(
                "remote filename must not contain NUL".to_string(),
            ));
        }
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(TftpError::InvalidRequest(format!(
                "block size {} outside {}-{}",
                self.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }
        Ok(())
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub operation: Operation,
    pub remote_filename: String,
    /// Transfer ID the server used.
    pub peer: Option<SocketAddr>,
    pub bytes: u64,
    pub blocks: u64,
    pub block_size: u16,
    pub transfer_size: Option<u64>,
    pub retransmissions: u64,
    pub elapsed: Duration,
}

/// Local side of a transfer: where downloaded bytes go, or where uploaded
/// bytes come from.
pub enum LocalEnd<'a> {
    Sink(&'a mut (dyn AsyncWrite + Unpin + Send)),
    Source(&'a mut (dyn AsyncRead + Unpin + Send)),
}

pub struct TransferSession<'a, T: Transport + ?Sized> {
    transport: &'a T,
    server: SocketAddr,
    request: TransferRequest,
    request_options: Vec<TftpOption>,
    negotiated: NegotiatedOptions,
    state: TransferState,
    peer: Option<SocketAddr>,
    /// Block the session is waiting on: the next DATA for downloads, the
    /// outstanding DATA's ACK for uploads, 0 while negotiating an upload.
    block: u16,
    timer: RetryTimer,
    outstanding: Option<(Bytes, SocketAddr)>,
    cancel: CancellationToken,
    bytes: u64,
    blocks: u64,
    retransmissions: u64,
    started: Instant,
}

impl<'a, T: Transport + ?Sized> TransferSession<'a, T> {
    pub fn new(
        transport: &'a T,
        server: SocketAddr,
        request: TransferRequest,
        timer: RetryTimer,
    ) -> Self {
        Self {
            transport,
            server,
            request,
            request_options: Vec::new(),
            negotiated: NegotiatedOptions::default(),
            state: TransferState::Negotiating,
            peer: None,
            block: 0,
            timer,
            outstanding: None,
            cancel: CancellationToken::new(),
            bytes: 0,
            blocks: 0,
            retransmissions: 0,
            started: Instant::now(),
        }
    }

    /// Abort at the next reply boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn negotiated(&self) -> NegotiatedOptions {
        self.negotiated
    }

    /// Run the transfer to completion.
    ///
    /// Every outcome is also reported to `observer` as a final
    /// [`TransferEvent::Completed`] or [`TransferEvent::Aborted`].
    pub async fn run(
        &mut self,
        local: LocalEnd<'_>,
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<TransferSummary> {
        if self.state != TransferState::Negotiating || self.outstanding.is_some() {
            return Err(TftpError::InvalidRequest(
                "session has already been run".to_string(),
            ));
        }

        self.started = Instant::now();
        let result = self.drive(local, observer).await;

        match &result {
            Ok(summary) => {
                self.state = TransferState::Complete;
                info!(
                    "Transfer complete: {} {} bytes in {:.2}s ({} blocks, {} retransmissions)",
                    summary.operation,
                    summary.bytes,
                    summary.elapsed.as_secs_f64(),
                    summary.blocks,
                    summary.retransmissions
                );
                observer.on_event(&TransferEvent::Completed(summary.clone()));
            }
            Err(err) => {
                self.state = TransferState::Aborted;
                warn!(
                    "Transfer of {} aborted: {}",
                    self.request.remote_filename, err
                );
                observer.on_event(&TransferEvent::Aborted {
                    reason: err.to_string(),
                    code: err.error_code(),
                });
            }
        }

        result
    }

    async fn drive(
        &mut self,
        local: LocalEnd<'_>,
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<TransferSummary> {
        self.request.validate()?;
        match (&local, self.request.operation) {
            (LocalEnd::Sink(_), Operation::Read) | (LocalEnd::Source(_), Operation::Write) => {}
            _ => {
                return Err(TftpError::InvalidRequest(format!(
                    "local end does not match a {}",
                    self.request.operation
                )));
            }
        }

        self.request_options = options::build_request_options(
            Some(self.request.block_size),
            self.request.transfer_size,
        );

        let filename = self.request.remote_filename.clone();
        let mode = OCTET_MODE.to_string();
        let options = self.request_options.clone();
        let request = match self.request.operation {
            Operation::Read => Packet::Rrq {
                filename,
                mode,
                options,
            },
            Operation::Write => Packet::Wrq {
                filename,
                mode,
                options,
            },
        };

        debug!("Sending {} to {}", request, self.server);
        self.send(&request, self.server).await?;

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        match local {
            LocalEnd::Sink(sink) => self.receive_file(sink, &mut buf, observer).await?,
            LocalEnd::Source(source) => self.send_file(source, &mut buf, observer).await?,
        }

        Ok(self.summary())
    }

    async fn receive_file(
        &mut self,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        buf: &mut [u8],
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<()> {
        self.block = 1;

        loop {
            let packet = self.receive(buf, observer).await?;

            if self.state == TransferState::Negotiating {
                match &packet {
                    Packet::Oack { options } => {
                        self.adopt(Some(options.as_slice()), observer).await?;
                        // RFC 2347: a read request's OACK is acknowledged with ACK 0
                        self.send_to_peer(&Packet::Ack { block: 0 }).await?;
                        continue;
                    }
                    // Server ignored the options and went straight to data
                    Packet::Data { block: 1, .. } => self.adopt(None, observer).await?,
                    // The TID is bound now; re-sending the RRQ to the well-known
                    // port would start a second transfer. Keep waiting for block 1.
                    Packet::Data { block, .. } => {
                        debug!("Ignoring block {} before block 1", block);
                        continue;
                    }
                    other => return Err(self.illegal(other).await),
                }
            }

            match packet {
                Packet::Data { block, payload } if block == self.block => {
                    let block_size = usize::from(self.negotiated.block_size);
                    if payload.len() > block_size {
                        let message = format!(
                            "DATA block {} carries {} bytes, block size is {}",
                            block,
                            payload.len(),
                            block_size
                        );
                        self.reject(ErrorCode::IllegalOperation, &message).await;
                        return Err(TftpError::IllegalOperation(message));
                    }

                    sink.write_all(&payload).await?;
                    self.bytes += payload.len() as u64;
                    self.blocks += 1;
                    self.send_to_peer(&Packet::Ack { block }).await?;
                    debug!("Received block {} ({} bytes)", block, payload.len());

                    observer.on_event(&TransferEvent::Block {
                        block,
                        bytes: payload.len(),
                        transferred: self.bytes,
                        total: self.negotiated.transfer_size,
                    });

                    // RFC 1350: a block shorter than the block size ends the transfer
                    if payload.len() < block_size {
                        sink.flush().await?;
                        return Ok(());
                    }

                    // RFC 1350: Block numbers wrap around after 65535
                    self.block = self.block.wrapping_add(1);
                }
                Packet::Data { block, .. } => {
                    debug!(
                        "Duplicate or out-of-order block {} (expecting {})",
                        block, self.block
                    );
                    self.retransmit(RetransmitReason::Anomaly, observer).await?;
                }
                Packet::Oack { .. } => {
                    debug!("Duplicate OACK");
                    self.retransmit(RetransmitReason::Anomaly, observer).await?;
                }
                other => return Err(self.illegal(&other).await),
            }
        }
    }

    async fn send_file(
        &mut self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        buf: &mut [u8],
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<()> {
        self.block = 0;

        while self.state == TransferState::Negotiating {
            let packet = self.receive(buf, observer).await?;
            match &packet {
                Packet::Oack { options } => self.adopt(Some(options.as_slice()), observer).await?,
                // Server ignored the options
                Packet::Ack { block: 0 } => self.adopt(None, observer).await?,
                // Same as for downloads: do not re-send the WRQ to a bound peer
                Packet::Ack { block } => debug!("Ignoring ACK {} before ACK 0", block),
                other => return Err(self.illegal(other).await),
            }
        }

        let block_size = usize::from(self.negotiated.block_size);
        let total = self.request.transfer_size;
        let mut payload = read_block(source, block_size).await?;
        self.block = 1;
        self.send_data(&payload).await?;

        loop {
            let packet = self.receive(buf, observer).await?;
            match packet {
                Packet::Ack { block } if block == self.block => {
                    self.bytes += payload.len() as u64;
                    self.blocks += 1;
                    debug!("Received ACK for block {}", block);

                    observer.on_event(&TransferEvent::Block {
                        block,
                        bytes: payload.len(),
                        transferred: self.bytes,
                        total,
                    });

                    if payload.len() < block_size {
                        return Ok(());
                    }

                    payload = read_block(source, block_size).await?;
                    self.block = self.block.wrapping_add(1);
                    self.send_data(&payload).await?;
                }
                Packet::Ack { block } => {
                    debug!("Duplicate ACK for block {} (awaiting {})", block, self.block);
                    self.retransmit(RetransmitReason::Anomaly, observer).await?;
                }
                Packet::Oack { .. } => {
                    debug!("Duplicate OACK");
                    self.retransmit(RetransmitReason::Anomaly, observer).await?;
                }
                other => return Err(self.illegal(&other).await),
            }
        }
    }

    /// Next packet from the server, retransmitting on timeouts.
    ///
    /// Binds the transfer ID on the first reply. ERROR packets and
    /// undecodable datagrams end the transfer here.
    async fn receive(
        &mut self,
        buf: &mut [u8],
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<Packet> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(TftpError::Cancelled);
            }

            let filter = match self.peer {
                Some(peer) => PeerFilter::Bound(peer),
                None => PeerFilter::Host(self.server.ip()),
            };

            match self.timer.await_reply(self.transport, filter, buf).await? {
                Reply::Timeout => {
                    debug!("Timeout waiting for block {}", self.block);
                    self.retransmit(RetransmitReason::Timeout, observer).await?;
                }
                Reply::Packet { packet, from } => {
                    if self.peer.is_none() {
                        debug!("Server TID: {}", from);
                        self.peer = Some(from);
                    }

                    let packet = match packet {
                        Ok(packet) => packet,
                        Err(err) => {
                            let message = format!("Malformed packet: {}", err);
                            self.reject(ErrorCode::IllegalOperation, &message).await;
                            return Err(err.into());
                        }
                    };

                    if let Packet::Error { code, message } = packet {
                        return Err(TftpError::Protocol { code, message });
                    }
                    return Ok(packet);
                }
            }
        }
    }

    async fn adopt(
        &mut self,
        oack: Option<&[TftpOption]>,
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<()> {
        match options::resolve(oack, &self.request_options) {
            Ok(negotiated) => {
                self.negotiated = negotiated;
                self.state = TransferState::Transferring;
                debug!(
                    "Negotiated blksize={} tsize={:?} (oack: {})",
                    negotiated.block_size, negotiated.transfer_size, negotiated.acknowledged
                );
                observer.on_event(&TransferEvent::Negotiated {
                    block_size: negotiated.block_size,
                    transfer_size: negotiated.transfer_size,
                    acknowledged: negotiated.acknowledged,
                });
                Ok(())
            }
            Err(err) => {
                self.reject(ErrorCode::OptionNegotiation, &err.to_string())
                    .await;
                Err(err)
            }
        }
    }

    async fn send_data(&mut self, payload: &Bytes) -> Result<()> {
        let packet = Packet::Data {
            block: self.block,
            payload: payload.clone(),
        };
        self.send_to_peer(&packet).await
    }

    async fn send_to_peer(&mut self, packet: &Packet) -> Result<()> {
        let target = self.peer.unwrap_or(self.server);
        self.send(packet, target).await
    }

    /// Send a packet that becomes the new outstanding one.
    async fn send(&mut self, packet: &Packet, target: SocketAddr) -> Result<()> {
        let bytes = packet.encode();
        self.transport.send_to(&bytes, target).await?;
        self.outstanding = Some((bytes, target));
        self.timer.reset();
        Ok(())
    }

    async fn retransmit(
        &mut self,
        reason: RetransmitReason,
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<()> {
        let decision = match reason {
            RetransmitReason::Timeout => self.timer.note_timeout(),
            RetransmitReason::Anomaly => self.timer.note_anomaly(),
        };
        let attempt = match decision {
            RetryDecision::Retry { attempt } => attempt,
            RetryDecision::GiveUp => {
                return Err(TftpError::RetriesExhausted {
                    block: self.block,
                    retries: self.timer.retries(),
                    timeout: self.timer.timeout(),
                });
            }
        };

        let (bytes, target) = self
            .outstanding
            .clone()
            .ok_or_else(|| TftpError::Tftp("no packet outstanding".to_string()))?;

        warn!(
            "Retransmitting to {} while waiting for block {} ({}/{})",
            target,
            self.block,
            attempt,
            self.timer.max_retries()
        );
        self.transport.send_to(&bytes, target).await?;
        self.retransmissions += 1;

        observer.on_event(&TransferEvent::Retransmit {
            block: self.block,
            attempt,
            reason,
        });
        Ok(())
    }

    /// Tell the peer why the transfer is over. Best effort: the transfer is
    /// already lost, so a failed send is only logged.
    async fn reject(&self, code: ErrorCode, message: &str) {
        let packet = Packet::error(code, message);
        let target = self.peer.unwrap_or(self.server);
        match self.transport.send_to(&packet.encode(), target).await {
            Ok(_) => debug!("Sent {} to {}", packet, target),
            Err(e) => warn!("Failed to send ERROR to {}: {}", target, e),
        }
    }

    async fn illegal(&self, packet: &Packet) -> TftpError {
        let message = format!("Unexpected {} packet", packet.opcode());
        self.reject(ErrorCode::IllegalOperation, &message).await;
        TftpError::IllegalOperation(message)
    }

    fn summary(&self) -> TransferSummary {
        let transfer_size = match self.request.operation {
            Operation::Read => self.negotiated.transfer_size,
            Operation::Write => self.request.transfer_size,
        };
        TransferSummary {
            operation: self.request.operation,
            remote_filename: self.request.remote_filename.clone(),
            peer: self.peer,
            bytes: self.bytes,
            blocks: self.blocks,
            block_size: self.negotiated.block_size,
            transfer_size,
            retransmissions: self.retransmissions,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Fill one block from `source`; a short block means the source is exhausted.
async fn read_block(
    source: &mut (dyn AsyncRead + Unpin + Send),
    block_size: usize,
) -> std::io::Result<Bytes> {
    let mut block = vec![0u8; block_size];
    let mut filled = 0;
    while filled < block_size {
        let n = source.read(&mut block[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    block.truncate(filled);
    Ok(Bytes::from(block))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_block_fills_across_short_reads() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1300).collect();
        // Chain splits the reads at the 100-byte boundary
        let mut source = (&data[..100]).chain(&data[100..]);
        let first = read_block(&mut source, 512).await.unwrap();
        assert_eq!(&first[..], &data[..512]);
        let second = read_block(&mut source, 512).await.unwrap();
        assert_eq!(&second[..], &data[512..1024]);
        let last = read_block(&mut source, 512).await.unwrap();
        assert_eq!(last.len(), 276);
        let empty = read_block(&mut source, 512).await.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn request_validation() {
        assert!(TransferRequest::download("file.bin").validate().is_ok());
        assert!(TransferRequest::download("").validate().is_err());
        assert!(TransferRequest::download("a\0b").validate().is_err());
        assert!(
            TransferRequest::download("file.bin")
                .with_block_size(7)
                .validate()
                .is_err()
        );
        assert!(
            TransferRequest::upload("file.bin", Some(10))
                .with_block_size(MAX_BLOCK_SIZE)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn download_requests_ask_for_size_unless_disabled() {
        let request = TransferRequest::download("x");
        assert_eq!(request.transfer_size, Some(0));
        assert_eq!(request.without_transfer_size().transfer_size, None);
    }
}
