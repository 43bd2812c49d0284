//! Shared helpers: an in-memory transport and a scripted server side.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tftpc::{Packet, RetryTimer, TftpOption, TransferEvent, TransferObserver, Transport};

pub const SERVER: &str = "10.0.0.1:69";
pub const TID: &str = "10.0.0.1:40000";

pub fn server() -> SocketAddr {
    SERVER.parse().unwrap()
}

pub fn tid() -> SocketAddr {
    TID.parse().unwrap()
}

pub fn timer() -> RetryTimer {
    RetryTimer::new(Duration::from_secs(5), 5)
}

/// Client side of an in-memory datagram pipe.
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
    inbound: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        // A finished script is a peer that stopped listening
        let _ = self.outbound.send((Bytes::copy_from_slice(buf), target));
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some((datagram, from)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, from))
            }
            // Script dropped its sender: behave like a silent network
            None => std::future::pending().await,
        }
    }
}

/// Server side of the pipe, driven by a test script.
pub struct ScriptedPeer {
    sent: mpsc::UnboundedReceiver<(Bytes, SocketAddr)>,
    replies: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
}

impl ScriptedPeer {
    /// Next packet the client sent, with its destination.
    pub async fn next_sent(&mut self) -> (Packet, SocketAddr) {
        let (bytes, to) = tokio::time::timeout(Duration::from_secs(600), self.sent.recv())
            .await
            .expect("client sent nothing")
            .expect("client transport dropped");
        (Packet::decode(&bytes).expect("client sent undecodable packet"), to)
    }

    /// Assert the next packet and its destination.
    pub async fn expect(&mut self, packet: Packet, to: SocketAddr) {
        let (sent, dest) = self.next_sent().await;
        assert_eq!(sent, packet);
        assert_eq!(dest, to);
    }

    /// Packets the client has sent that the script has not consumed yet.
    pub fn drain(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok((bytes, _)) = self.sent.try_recv() {
            packets.push(Packet::decode(&bytes).unwrap());
        }
        packets
    }

    pub fn reply(&self, from: SocketAddr, packet: &Packet) {
        self.reply_raw(from, &packet.encode());
    }

    pub fn reply_raw(&self, from: SocketAddr, datagram: &[u8]) {
        self.replies.send((datagram.to_vec(), from)).unwrap();
    }
}

pub fn pipe() -> (MemoryTransport, ScriptedPeer) {
    let (outbound, sent) = mpsc::unbounded_channel();
    let (replies, inbound) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            outbound,
            inbound: Mutex::new(inbound),
        },
        ScriptedPeer { sent, replies },
    )
}

/// Collects every event a session emits.
#[derive(Default)]
pub struct Recorder {
    pub events: Vec<TransferEvent>,
}

impl TransferObserver for Recorder {
    fn on_event(&mut self, event: &TransferEvent) {
        self.events.push(event.clone());
    }
}

impl Recorder {
    pub fn retransmits(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Retransmit { .. }))
            .count()
    }
}

pub fn data(block: u16, payload: &[u8]) -> Packet {
    Packet::Data {
        block,
        payload: Bytes::copy_from_slice(payload),
    }
}

pub fn oack(options: &[(&str, u64)]) -> Packet {
    Packet::Oack {
        options: options
            .iter()
            .map(|(name, value)| TftpOption::new(*name, value))
            .collect(),
    }
}

pub fn rrq(filename: &str, options: &[(&str, u64)]) -> Packet {
    Packet::Rrq {
        filename: filename.to_string(),
        mode: "octet".to_string(),
        options: options
            .iter()
            .map(|(name, value)| TftpOption::new(*name, value))
            .collect(),
    }
}

pub fn wrq(filename: &str, options: &[(&str, u64)]) -> Packet {
    Packet::Wrq {
        filename: filename.to_string(),
        mode: "octet".to_string(),
        options: options
            .iter()
            .map(|(name, value)| TftpOption::new(*name, value))
            .collect(),
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
