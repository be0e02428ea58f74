// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus interface abstraction.
//!
//! Mirrors the surrounding ecosystem's pattern of abstracting the transport
//! behind a trait so the dispatcher doesn't depend on a concrete message
//! director client: implement `BusInterface` against the real bus, or use
//! `MockBusInterface` for tests.

use crate::codec::{self, ControlOp};
use crate::wire::{BusMessage, Channel};
use anyhow::{Context, Result};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

/// Abstract bus transport.
///
/// The Range Subscriber uses this to announce interest in its channel
/// and in the configured DOID range, and to send/receive framed messages.
pub trait BusInterface: Send + Sync {
    /// Subscribe to a single channel (`ADD_CHANNEL`).
    fn add_channel(&self, channel: Channel) -> Result<()>;

    /// Subscribe to a contiguous range of channels in one call, as the Range
    /// Subscriber does for `[min_doid, max_doid]`.
    fn add_channel_range(&self, min: Channel, max: Channel) -> Result<()>;

    /// Unsubscribe from a channel.
    fn remove_channel(&self, channel: Channel) -> Result<()>;

    /// Send a message onto the bus. Non-blocking best-effort.
    fn send(&self, message: BusMessage) -> Result<()>;

    /// Take all messages delivered to subscribed channels since the last call.
    fn take_delivered(&self) -> Vec<BusMessage>;
}

/// In-memory bus for tests: records every send, and lets a test push
/// messages for the dispatcher to take, exactly as `MockDdsInterface` records
/// discovery/sample events for its consumers.
#[derive(Default)]
pub struct MockBusInterface {
    subscribed_channels: Mutex<Vec<(Channel, Channel)>>,
    sent: Mutex<Vec<BusMessage>>,
    inbox: Mutex<Vec<BusMessage>>,
}

impl MockBusInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a message as if it arrived from the bus.
    pub fn deliver(&self, message: BusMessage) {
        self.inbox.lock().unwrap().push(message);
    }

    /// Drain and return everything sent so far, for test assertions.
    pub fn drain_sent(&self) -> Vec<BusMessage> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    /// True if `channel` (or a range containing it) has been subscribed.
    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.subscribed_channels
            .lock()
            .unwrap()
            .iter()
            .any(|(min, max)| channel.0 >= min.0 && channel.0 <= max.0)
    }
}

impl BusInterface for MockBusInterface {
    fn add_channel(&self, channel: Channel) -> Result<()> {
        self.subscribed_channels
            .lock()
            .unwrap()
            .push((channel, channel));
        Ok(())
    }

    fn add_channel_range(&self, min: Channel, max: Channel) -> Result<()> {
        self.subscribed_channels.lock().unwrap().push((min, max));
        Ok(())
    }

    fn remove_channel(&self, channel: Channel) -> Result<()> {
        self.subscribed_channels
            .lock()
            .unwrap()
            .retain(|(min, max)| !(channel.0 >= min.0 && channel.0 <= max.0));
        Ok(())
    }

    fn send(&self, message: BusMessage) -> Result<()> {
        tracing::trace!(?message, "MockBusInterface: send");
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn take_delivered(&self) -> Vec<BusMessage> {
        std::mem::take(&mut self.inbox.lock().unwrap())
    }
}

enum Outbound {
    Message(BusMessage),
    Control(Vec<u8>),
}

/// Bus transport over a TCP connection to the message director, framed as
/// described below: a 2-byte little-endian length prefix around each datagram
/// `codec::encode_message`/`codec::encode_control` produces.
///
/// Reads and writes happen on background tasks so `send`/`take_delivered`
/// stay synchronous and non-blocking for the dispatch loop: `send`
/// enqueues onto an unbounded channel drained by the writer task, and the
/// reader task appends decoded messages to a shared inbox under a mutex.
pub struct TcpBusInterface {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbox: std::sync::Arc<Mutex<Vec<BusMessage>>>,
}

impl TcpBusInterface {
    /// Connect to the message director at `addr` and spin up its reader and
    /// writer tasks.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("connecting to message bus")?;
        let (read_half, mut write_half) = stream.into_split();

        let inbox = std::sync::Arc::new(Mutex::new(Vec::new()));
        let inbox_reader = inbox.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(bytes)) => match codec::decode_message(&bytes) {
                        Ok(message) => inbox_reader.lock().unwrap().push(message),
                        Err(err) => tracing::warn!(%err, "malformed bus frame; discarding"),
                    },
                    Ok(None) => {
                        tracing::info!("bus connection closed by peer");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(%err, "bus read failed");
                        break;
                    }
                }
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let payload = match outbound {
                    Outbound::Message(message) => codec::encode_message(&message),
                    Outbound::Control(bytes) => bytes,
                };
                let framed = match codec::frame(payload) {
                    Ok(framed) => framed,
                    Err(err) => {
                        tracing::error!(%err, "failed to frame outbound bus message");
                        continue;
                    }
                };
                if let Err(err) = write_half.write_all(&framed).await {
                    tracing::error!(%err, "bus write failed");
                    break;
                }
            }
        });

        Ok(Self { outbound: tx, inbox })
    }

    fn send_control(&self, op: ControlOp) -> Result<()> {
        self.outbound
            .send(Outbound::Control(codec::encode_control(op)))
            .map_err(|_| anyhow::anyhow!("bus writer task has shut down"))
    }
}

impl BusInterface for TcpBusInterface {
    fn add_channel(&self, channel: Channel) -> Result<()> {
        self.send_control(ControlOp::AddChannel(channel))
    }

    fn add_channel_range(&self, min: Channel, max: Channel) -> Result<()> {
        self.send_control(ControlOp::AddChannelRange(min, max))
    }

    fn remove_channel(&self, channel: Channel) -> Result<()> {
        self.send_control(ControlOp::RemoveChannel(channel))
    }

    fn send(&self, message: BusMessage) -> Result<()> {
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| anyhow::anyhow!("bus writer task has shut down"))
    }

    fn take_delivered(&self) -> Vec<BusMessage> {
        std::mem::take(&mut self.inbox.lock().unwrap())
    }
}

/// Read one length-prefixed frame's payload (without the prefix). Returns
/// `Ok(None)` on a clean EOF between frames.
async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("reading bus frame length"),
    }
    let len = u16::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("reading bus frame payload")?;
    Ok(Some(payload))
}
