//! # Transport Layer Module
//!
//! This module defines the `TransportLayer` trait, which abstracts the datagram socket gossip
//! and heartbeat messages travel over, and the `SequenceTracker` enforcing in-order delivery
//! of the messages received from every sender.
use async_trait::async_trait;
use dashmap::DashMap;
use snafu::location;
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// The `TransportLayer` trait abstracts the network transport layer.
#[async_trait]
pub trait TransportLayer: Send + Sync {
    /// Receives a single datagram into the provided buffer.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Sends a single datagram to the specified target address.
    async fn send_to(&self, buf: &[u8], target: &str) -> Result<usize>;

    /// Retrieves the local address that the socket is bound to.
    fn local_addr(&self) -> Result<String>;
}

#[async_trait]
impl TransportLayer for UdpSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(UdpSocket::recv(self, buf).await?)
    }

    async fn send_to(&self, buf: &[u8], target: &str) -> Result<usize> {
        Ok(UdpSocket::send_to(self, buf, target).await?)
    }

    fn local_addr(&self) -> Result<String> {
        let addr = UdpSocket::local_addr(self)?;
        Ok(addr.to_string())
    }
}

/// Outcome of checking an inbound sequence number.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The next message in order.
    InOrder,
    /// A message at or below the last delivered sequence number.
    Replay,
}

/// Numbers outbound messages per target and checks inbound ones per sender.
///
/// Inbound state is keyed by sender address and reset whenever the sender's epoch changes,
/// so a restarted peer starts a fresh sequence.
#[derive(Debug, Default)]
pub(crate) struct SequenceTracker {
    outbound: DashMap<String, u64>,
    inbound: DashMap<String, (i64, u64)>,
}

impl SequenceTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence number of the next message to `target`, starting at 1.
    ///
    /// The number is only used up by [`commit_outbound`](Self::commit_outbound) once the
    /// message left, so a failed send leaves no gap.
    pub(crate) fn peek_outbound(&self, target: &str) -> u64 {
        self.outbound.get(target).map(|last| *last).unwrap_or(0) + 1
    }

    pub(crate) fn commit_outbound(&self, target: &str, sequence: u64) {
        self.outbound.insert(target.to_string(), sequence);
    }

    /// Checks an inbound message.
    ///
    /// A gap is a protocol violation; tracking restarts at the received number so the
    /// reconnected sender is accepted from there on.
    pub(crate) fn check_inbound(&self, sender: &str, epoch: i64, sequence: u64) -> Result<Delivery> {
        let mut entry = self.inbound.entry(sender.to_string()).or_insert((epoch, 0));
        let (known_epoch, last) = *entry;

        if known_epoch != epoch || last == 0 {
            *entry = (epoch, sequence);
            return Ok(Delivery::InOrder);
        }

        if sequence <= last {
            return Ok(Delivery::Replay);
        }

        *entry = (epoch, sequence);
        if sequence != last + 1 {
            return Err(Error::ProtocolViolation {
                message: format!("sequence gap from {sender}: expected {}, got {sequence}", last + 1),
                location: location!(),
            });
        }

        Ok(Delivery::InOrder)
    }

    /// Forgets the inbound sequence of `peer`, its next message is accepted as in order.
    ///
    /// Outbound numbering is left alone, the peer still tracks it.
    pub(crate) fn reset_inbound(&self, peer: &str) {
        self.inbound.remove(peer);
    }
}
