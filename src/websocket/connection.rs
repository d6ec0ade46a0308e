//! Connection Lifecycle
//!
//! One accepted duplex stream to a single client. A connection registers
//! itself with the hub when opened, then runs two independent pumps:
//!
//! - **inbound**: drains frames from the socket until it errors or closes
//! - **outbound**: drains the outbound queue and writes each payload
//!
//! The pumps are generic over `Sink`/`Stream` so the same code drives an
//! axum `WebSocket` and in-memory channels in tests.
//!
//! Once the hub drops the connection (unregister or eviction) the writer
//! gets `close_grace` to flush; after that both pumps are aborted, which
//! drops the socket even if the client stopped reading.

use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::hub::{ConnectionHandle, ConnectionId, Hub};
use crate::routing::{ClientId, GroupId};

/// Why the inbound pump stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEnd {
    /// Client sent a close frame
    ClientClosed,
    /// Stream ended without a close frame
    Eof,
    /// Read failed
    ReadError(String),
}

/// Why the outbound pump stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEnd {
    /// Hub closed the queue (unregistered or evicted)
    QueueClosed,
    /// Socket write failed
    WriteError(String),
}

/// A registered connection, ready to run its pumps
pub struct Connection {
    id: ConnectionId,
    client_id: ClientId,
    hub: Arc<Hub>,
    outbound: mpsc::Receiver<Bytes>,
    closed: oneshot::Receiver<()>,
    keepalive: Option<Duration>,
    close_grace: Duration,
}

impl Connection {
    /// Create the connection's queue and register it with the hub
    pub async fn open(hub: Arc<Hub>, client_id: ClientId, groups: HashSet<GroupId>) -> Self {
        let config = hub.config().clone();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (closed_tx, closed_rx) = oneshot::channel();
        let id = Uuid::new_v4();

        hub.register(ConnectionHandle::new(id, client_id, groups, tx).with_close_signal(closed_tx))
            .await;

        Self {
            id,
            client_id,
            hub,
            outbound: rx,
            closed: closed_rx,
            keepalive: config.keepalive_interval,
            close_grace: config.close_grace,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Run both pumps until the connection is finished.
    ///
    /// Always leaves the connection unregistered.
    pub async fn run<W, R, E>(self, sink: W, stream: R)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let Connection {
            id,
            client_id,
            hub,
            outbound,
            mut closed,
            keepalive,
            close_grace,
        } = self;

        let mut send_task = tokio::spawn(outbound_pump(id, sink, outbound, keepalive));
        let mut recv_task = tokio::spawn(inbound_pump(id, stream));

        tokio::select! {
            result = &mut send_task => {
                // Writer is gone, so the socket is closed; stop reading
                recv_task.abort();
                if let Ok(end) = result {
                    tracing::debug!(connection_id = %id, ?end, "Outbound pump finished");
                }
            }
            result = &mut recv_task => {
                if let Ok(end) = result {
                    tracing::debug!(connection_id = %id, ?end, "Inbound pump finished");
                }
                // Closing the queue lets the writer flush and exit on its own
                hub.unregister(id).await;
                finish_writer(id, &mut send_task, close_grace).await;
            }
            _ = &mut closed => {
                // Hub dropped the handle; the writer may be blocked on a client that stopped reading
                tracing::debug!(connection_id = %id, "Removed from hub, closing socket");
                recv_task.abort();
                finish_writer(id, &mut send_task, close_grace).await;
            }
        }

        hub.unregister(id).await;
        tracing::debug!(connection_id = %id, client_id = %client_id, "Connection finished");
    }
}

/// Give the writer `grace` to flush and close the socket, then abort it
async fn finish_writer(
    id: ConnectionId,
    send_task: &mut tokio::task::JoinHandle<OutboundEnd>,
    grace: Duration,
) {
    if tokio::time::timeout(grace, &mut *send_task).await.is_err() {
        tracing::debug!(connection_id = %id, "Outbound pump did not finish in time, aborting");
        send_task.abort();
    }
}

/// Read until the client goes away.
///
/// Client frames carry no commands; anything received is only logged.
async fn inbound_pump<R, E>(id: ConnectionId, mut stream: R) -> InboundEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => {
                tracing::debug!(connection_id = %id, "Client requested close");
                return InboundEnd::ClientClosed;
            }
            Ok(Message::Text(text)) => {
                tracing::trace!(connection_id = %id, len = text.len(), "Ignoring client text frame");
            }
            Ok(Message::Binary(data)) => {
                tracing::trace!(connection_id = %id, len = data.len(), "Ignoring client binary frame");
            }
            // Axum answers pings itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket receive error");
                return InboundEnd::ReadError(e.to_string());
            }
        }
    }
    InboundEnd::Eof
}

/// Write queued payloads in FIFO order until the queue closes or a write fails.
///
/// The sink is closed on every exit path.
async fn outbound_pump<W>(
    id: ConnectionId,
    mut sink: W,
    mut queue: mpsc::Receiver<Bytes>,
    keepalive: Option<Duration>,
) -> OutboundEnd
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ticker = keepalive.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    let end = loop {
        let frame = tokio::select! {
            next = queue.recv() => match next {
                Some(payload) => to_frame(payload),
                None => {
                    tracing::debug!(connection_id = %id, "Hub closed the outbound queue");
                    break OutboundEnd::QueueClosed;
                }
            },
            _ = tick(&mut ticker) => Message::Ping(Vec::new()),
        };

        if let Err(e) = sink.send(frame).await {
            tracing::debug!(connection_id = %id, error = %e, "WebSocket send failed, closing connection");
            break OutboundEnd::WriteError(e.to_string());
        }
    };

    let _ = sink.close().await;
    end
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Payloads that are valid UTF-8 go out as text frames, anything else as binary
fn to_frame(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.to_owned()),
        Err(_) => Message::Binary(payload.to_vec()),
    }
}
