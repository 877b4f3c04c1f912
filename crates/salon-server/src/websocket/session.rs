//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use salon_core::Room;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::{CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS};

use super::handler::ChatSession;
use super::heartbeat;

/// How long the writer may take to flush the final close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session settings shared by every connection.
#[derive(Clone)]
pub struct SessionContext {
    pub shutdown: CancellationToken,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

/// Run an authenticated chat session on an upgraded socket.
///
/// 1. Joins the room's group and announces the arrival
/// 2. Relays inbound text frames to the group
/// 3. Forwards queued outbound frames and sends periodic Pings
/// 4. Closes on client close, shutdown (1001), eviction or silence (1008)
/// 5. Leaves the group and announces the departure
#[instrument(skip_all, fields(connection_id = %session.connection().id, room = %room.name))]
pub async fn run_chat_session(
    ws: WebSocket,
    mut session: ChatSession,
    send_rx: mpsc::Receiver<Arc<str>>,
    room: Room,
    ctx: SessionContext,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let connection = Arc::clone(session.connection());
    let (close_tx, close_rx) = oneshot::channel::<CloseFrame>();

    let mut outbound = tokio::spawn(write_outbound(
        ws_tx,
        send_rx,
        close_rx,
        ctx.heartbeat_interval,
    ));

    let _ = session.join(&room);
    info!(username = session.username(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let silence = heartbeat::wait_for_timeout(
        Arc::clone(&connection),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
    );
    tokio::pin!(silence);

    let close: Option<(u16, &'static str)> = loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    connection.mark_alive();
                    let _ = session.receive(text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    connection.mark_alive();
                    debug!(len = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.mark_alive(),
                Some(Ok(Message::Close(frame))) => {
                    info!(code = frame.map(|f| f.code), "client sent close frame");
                    break None;
                }
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    break None;
                }
                None => break None,
            },
            () = ctx.shutdown.cancelled() => break Some((CLOSE_GOING_AWAY, "server shutting down")),
            () = connection.evicted() => break Some((CLOSE_POLICY_VIOLATION, "too many dropped messages")),
            () = &mut silence => {
                warn!(timeout = ?ctx.heartbeat_timeout, "client unresponsive, disconnecting");
                break Some((CLOSE_POLICY_VIOLATION, "heartbeat timeout"));
            }
        }
    };

    let _ = session.disconnect();

    if let Some((code, reason)) = close {
        let _ = close_tx.send(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        });
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut outbound)
            .await
            .is_err()
        {
            outbound.abort();
        }
    } else {
        drop(close_tx);
        outbound.abort();
    }

    info!(code = close.map(|(code, _)| code), "client disconnected");
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Forward queued frames to the socket, pinging every `ping_every`, until a
/// close frame is requested or the socket fails.
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<str>>,
    mut close_rx: oneshot::Receiver<CloseFrame>,
    ping_every: Duration,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            frame = &mut close_rx => {
                if let Ok(frame) = frame {
                    // Queued frames go out ahead of the close.
                    while let Ok(text) = send_rx.try_recv() {
                        if ws_tx.send(Message::Text(text.as_ref().into())).await.is_err() {
                            return;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                }
                break;
            }
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_ref().into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Refuse an upgraded socket: send only the close frame, then wait briefly
/// for the client to finish the closing handshake.
pub async fn reject(mut ws: WebSocket, code: u16) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(""),
    };
    if ws.send(Message::Close(Some(frame))).await.is_err() {
        return;
    }
    let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, async {
        while let Some(Ok(msg)) = ws.recv().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    })
    .await;
}
