//! WebSocket delivery pump
//!
//! One accepted socket becomes one `Connection`:
//! - the writer task drains the connection's bounded queue onto the socket
//! - the read loop decodes control frames and forwards them to the broker
//!
//! Whichever side stops first ends the connection: the broker is told to
//! disconnect exactly once, which drops the queue, which lets the writer flush
//! what was already queued and close the socket.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::broker::BrokerHandle;
use crate::client::{Connection, ConnectionId, Frame, Outbound};
use crate::config::Settings;
use crate::transport::message::{ClientMessage, FrameError};

#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub queue_capacity: usize,
    pub max_topic_len: usize,
    pub write_timeout: Duration,
}

impl PumpSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            queue_capacity: settings.broker.outbound_queue_capacity,
            max_topic_len: settings.broker.max_topic_len,
            write_timeout: Duration::from_millis(settings.server.write_timeout_ms),
        }
    }
}

/// Why a connection ended.
#[derive(Debug, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    StreamError,
    Protocol(FrameError),
    BrokerUnavailable,
    WriterStopped,
}

/// Serve an upgraded socket for `principal` until it closes.
pub async fn serve_socket(
    socket: WebSocket,
    principal: String,
    broker: BrokerHandle,
    settings: PumpSettings,
) -> CloseReason {
    let (sink, stream) = socket.split();
    run_connection(sink, stream, principal, broker, settings).await
}

/// Transport-independent body of [`serve_socket`].
pub async fn run_connection<W, R, E>(
    sink: W,
    stream: R,
    principal: String,
    broker: BrokerHandle,
    settings: PumpSettings,
) -> CloseReason
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (connection, outbound) = Connection::new(principal.clone(), settings.queue_capacity);
    let id = connection.id;
    if broker.register(connection).await.is_err() {
        warn!(principal, "broker unavailable, refusing connection");
        return CloseReason::BrokerUnavailable;
    }
    info!(connection = %id, principal, "connection opened");

    let mut writer = tokio::spawn(write_loop(sink, outbound, settings.write_timeout));
    let mut writer_done = false;

    let reason = tokio::select! {
        reason = read_loop(stream, id, &principal, &broker, settings.max_topic_len) => reason,
        _ = &mut writer => {
            writer_done = true;
            CloseReason::WriterStopped
        }
    };

    if broker.disconnect(id).await.is_err() {
        debug!(connection = %id, "broker already stopped");
    }
    if !writer_done {
        let _ = writer.await;
    }

    info!(connection = %id, principal, reason = ?reason, "connection closed");
    reason
}

async fn read_loop<R, E>(
    mut stream: R,
    id: ConnectionId,
    principal: &str,
    broker: &BrokerHandle,
    max_topic_len: usize,
) -> CloseReason
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection = %id, error = %e, "read error");
                return CloseReason::StreamError;
            }
        };

        let frame: &[u8] = match &msg {
            Message::Text(text) => text.as_str().as_bytes(),
            Message::Binary(data) => data,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return CloseReason::ClientClosed,
        };

        let result = handle_control(frame, id, principal, broker, max_topic_len).await;

        if let Err(reason) = result {
            return reason;
        }
    }
    CloseReason::ClientClosed
}

async fn handle_control(
    frame: &[u8],
    id: ConnectionId,
    principal: &str,
    broker: &BrokerHandle,
    max_topic_len: usize,
) -> Result<(), CloseReason> {
    let request = ClientMessage::decode(frame)
        .and_then(|request| request.validate(principal, max_topic_len).map(|()| request))
        .map_err(|e| {
            warn!(
                connection = %id,
                error = %e,
                frame = %String::from_utf8_lossy(&frame[..frame.len().min(100)]),
                "invalid control frame"
            );
            CloseReason::Protocol(e)
        })?;

    let result = match request {
        ClientMessage::Subscribe { topic } => broker.subscribe(id, topic).await,
        ClientMessage::Unsubscribe { topic } => broker.unsubscribe(id, topic).await,
    };
    result.map(|_| ()).map_err(|_| CloseReason::BrokerUnavailable)
}

async fn write_loop<W>(mut sink: W, mut outbound: Outbound, write_timeout: Duration)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let id = outbound.id;
    while let Some(frame) = outbound.receiver.recv().await {
        match tokio::time::timeout(write_timeout, sink.send(to_message(frame))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection = %id, error = %e, "write failed");
                return;
            }
            Err(_) => {
                warn!(connection = %id, "write timed out");
                return;
            }
        }
    }

    // queue closed: the broker disconnected us
    let close = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    }));
    let _ = tokio::time::timeout(write_timeout, sink.send(close)).await;
    debug!(connection = %id, evicted = outbound.is_closed(), "send loop closed");
}

/// Text frame when the payload is UTF-8, binary otherwise.
pub fn to_message(frame: Frame) -> Message {
    match std::str::from_utf8(&frame) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame),
    }
}
