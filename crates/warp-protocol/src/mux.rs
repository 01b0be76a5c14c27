//! Demultiplexes one reliable ordered stream into the three logical channels
//! of the warp protocol: update, state and data.
//!
//! One read pump routes inbound frames to per-channel queues; one write pump
//! drains a shared outbound queue into the framed sink. Dropping a channel
//! handle only closes that handle; `close` (or the cancellation token handed
//! to [`Mux::with_options`]) stops both pumps and releases the underlying
//! stream.

use std::io;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::codec::{Channel, Frame, FrameCodec, MAX_FRAME_BYTES};

const OUTBOUND_QUEUE: usize = 64;
const MESSAGE_QUEUE: usize = 16;
const DATA_QUEUE: usize = 64;

/// Sending half of one logical channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    channel: Channel,
    out: mpsc::Sender<Frame>,
}

impl ChannelSender {
    pub async fn send(&self, payload: Bytes) -> io::Result<()> {
        self.out
            .send(Frame {
                channel: self.channel,
                payload,
            })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))
    }

    pub async fn send_json<T: Serialize>(&self, msg: &T) -> io::Result<()> {
        let payload =
            serde_json::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.send(Bytes::from(payload)).await
    }
}

/// One logical channel: a sender plus the inbound queue for this side.
#[derive(Debug)]
pub struct ChannelHandle {
    tx: ChannelSender,
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelHandle {
    /// Clone the sending half, e.g. to move it into a writer task.
    pub fn sender(&self) -> ChannelSender {
        self.tx.clone()
    }

    /// Next inbound payload on this channel; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub async fn send(&self, payload: Bytes) -> io::Result<()> {
        self.tx.send(payload).await
    }

    pub async fn send_json<T: Serialize>(&self, msg: &T) -> io::Result<()> {
        self.tx.send_json(msg).await
    }
}

/// The three logical channels of one connection.
#[derive(Debug)]
pub struct Mux {
    pub update: ChannelHandle,
    pub state: ChannelHandle,
    pub data: ChannelHandle,
    cancel: CancellationToken,
}

impl Mux {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_options(stream, MAX_FRAME_BYTES, CancellationToken::new())
    }

    /// Build a mux with an explicit frame size limit and cancellation scope.
    /// Cancelling the token stops both pumps and drops the stream halves,
    /// which closes the underlying connection.
    pub fn with_options<S>(stream: S, max_frame_bytes: usize, cancel: CancellationToken) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames_in = FramedRead::new(read_half, FrameCodec::with_max(max_frame_bytes));
        let mut frames_out = FramedWrite::new(write_half, FrameCodec::with_max(max_frame_bytes));

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
        let (update_tx, update_rx) = mpsc::channel::<Bytes>(MESSAGE_QUEUE);
        let (state_tx, state_rx) = mpsc::channel::<Bytes>(MESSAGE_QUEUE);
        let (data_tx, data_rx) = mpsc::channel::<Bytes>(DATA_QUEUE);

        let read_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = read_cancel.cancelled() => break,
                    next = frames_in.next() => match next {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            trace!(error = %e, "read pump stopped");
                            break;
                        }
                        None => break,
                    },
                };
                let inbound = match frame.channel {
                    Channel::Update => &update_tx,
                    Channel::State => &state_tx,
                    Channel::Data => &data_tx,
                };
                tokio::select! {
                    _ = read_cancel.cancelled() => break,
                    sent = inbound.send(frame.payload) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let write_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = write_cancel.cancelled() => break,
                    next = out_rx.recv() => match next {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                tokio::select! {
                    _ = write_cancel.cancelled() => break,
                    sent = frames_out.send(frame) => {
                        if let Err(e) = sent {
                            trace!(error = %e, "write pump stopped");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            update: ChannelHandle {
                tx: ChannelSender {
                    channel: Channel::Update,
                    out: out_tx.clone(),
                },
                rx: update_rx,
            },
            state: ChannelHandle {
                tx: ChannelSender {
                    channel: Channel::State,
                    out: out_tx.clone(),
                },
                rx: state_rx,
            },
            data: ChannelHandle {
                tx: ChannelSender {
                    channel: Channel::Data,
                    out: out_tx,
                },
                rx: data_rx,
            },
            cancel,
        }
    }

    /// Stop both pumps and close the underlying connection.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Break the mux into its channels plus the token controlling the pumps.
    pub fn into_parts(self) -> (ChannelHandle, ChannelHandle, ChannelHandle, CancellationToken) {
        (self.update, self.state, self.data, self.cancel)
    }
}
