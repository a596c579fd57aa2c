//! Transport capability seen by the session core.
//!
//! The core only ever talks to a [`SessionTransport`]; [`ChannelTransport`]
//! queues outbound frames for a socket writer task (or a test) to drain.

pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};

/// Outbound capabilities of one device connection.
pub trait SessionTransport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Whether binary audio frames can still be delivered.
    fn is_audio_channel_open(&self) -> bool;

    /// Close the connection. Calling this on a closed transport is a no-op.
    fn close(&self);

    fn send_text(&self, payload: String) -> Result<()>;

    fn send_binary(&self, payload: Bytes) -> Result<()>;
}

/// A frame queued for delivery to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Bytes),
    Close,
}

/// Transport that forwards frames into an unbounded channel.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    fn push(&self, frame: OutboundFrame) -> Result<()> {
        if !self.is_open() {
            return Err(GatewayError::Transport("connection closed".to_owned()));
        }
        self.tx
            .send(frame)
            .map_err(|_| GatewayError::Transport("connection writer gone".to_owned()))
    }
}

impl SessionTransport for ChannelTransport {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn is_audio_channel_open(&self) -> bool {
        self.is_open()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(OutboundFrame::Close);
    }

    fn send_text(&self, payload: String) -> Result<()> {
        self.push(OutboundFrame::Text(payload))
    }

    fn send_binary(&self, payload: Bytes) -> Result<()> {
        self.push(OutboundFrame::Binary(payload))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn close_is_idempotent_and_blocks_sends() {
        let (transport, mut rx) = ChannelTransport::new();
        transport.send_text("hi".to_owned()).unwrap();
        transport.close();
        transport.close();
        assert!(!transport.is_open());
        assert!(transport.send_binary(Bytes::from_static(b"x")).is_err());

        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("hi".to_owned()));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Close);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_reads_as_closed() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        assert!(!transport.is_open());
        assert!(transport.send_text("x".to_owned()).is_err());
    }
}
