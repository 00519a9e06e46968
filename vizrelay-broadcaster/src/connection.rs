//! One task per WebSocket connection.
//!
//! The reader loop stays in the connection task; a writer task drains the
//! connection's outbound queue into the socket and sends the close frame
//! when the hub asks for one.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::broadcaster::RelayHub;
use crate::client::{ClientHandle, Disconnect, PeerInfo};
use crate::error::RelayError;
use crate::role::Role;

/// Drive a freshly upgraded socket until it closes
pub async fn serve_connection(mut socket: WebSocket, hub: Arc<RelayHub>, peer: PeerInfo) {
    let _guard = hub.connection_guard();
    let id = hub.accept();
    let role = hub.classify(peer.user_agent.as_deref());

    tracing::info!(
        conn_id = id,
        peer = %peer,
        user_agent = peer.user_agent.as_deref().unwrap_or(""),
        "New {} connection",
        role
    );

    let (handle, channels) = match hub.register(id, role, peer) {
        Ok(registered) => registered,
        Err(e) => {
            let refusal = match e {
                RelayError::ServerFull { .. } => {
                    tracing::warn!(conn_id = id, "Max clients reached, rejecting connection");
                    Disconnect::server_full()
                }
                _ => {
                    tracing::info!(conn_id = id, "Rejecting connection: {}", e);
                    Disconnect::going_away()
                }
            };
            if let Some(frame) = close_frame(&refusal) {
                let _ = socket.send(Message::Close(Some(frame))).await;
            }
            return;
        }
    };

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        channels.outbound,
        channels.disconnect.clone(),
        handle.clone(),
    ));

    read_loop(stream, channels.disconnect, &hub, &handle).await;

    hub.unregister(&handle);
    // Stops the writer if the peer went away on its own
    handle.disconnect(Disconnect::Terminate);
    if let Err(e) = writer.await {
        tracing::error!(conn_id = id, "Writer task failed: {}", e);
    }

    tracing::debug!(conn_id = id, "Connection closed");
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    mut disconnect: watch::Receiver<Option<Disconnect>>,
    hub: &RelayHub,
    handle: &ClientHandle,
) {
    loop {
        tokio::select! {
            // Hub asked this connection to end; the writer sends the close frame
            _ = disconnect.changed() => break,

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Pong(_))) => handle.mark_alive(),
                Some(Ok(Message::Ping(_))) => {} // answered by the protocol layer
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(message)) => on_message(hub, handle, message),
                Some(Err(e)) => {
                    tracing::warn!(conn_id = handle.id(), role = %handle.role(), "Connection error: {}", e);
                    break;
                }
            },
        }
    }
}

fn on_message(hub: &RelayHub, handle: &ClientHandle, message: Message) {
    match handle.role() {
        Role::Source => match hub.forward(handle.id(), message) {
            Ok(_) => {}
            Err(RelayError::MalformedFrame(reason)) => {
                tracing::error!(conn_id = handle.id(), "❌ Invalid message format from bot: {}", reason);
            }
            Err(e) => tracing::debug!(conn_id = handle.id(), "Frame not relayed: {}", e),
        },
        Role::Viewer => {
            tracing::debug!(conn_id = handle.id(), "Received message from viewer (ignored)");
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Message>,
    mut disconnect: watch::Receiver<Option<Disconnect>>,
    handle: ClientHandle,
) {
    loop {
        tokio::select! {
            biased;

            _ = disconnect.changed() => {
                let request = disconnect.borrow_and_update().clone();
                if let Some(frame) = request.as_ref().and_then(close_frame) {
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(conn_id = handle.id(), "Close frame not delivered: {}", e);
                    }
                }
                break;
            }

            next = outbound.recv() => match next {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        tracing::warn!(conn_id = handle.id(), "Send failed, tearing down: {}", e);
                        handle.disconnect(Disconnect::Terminate);
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

fn close_frame(request: &Disconnect) -> Option<CloseFrame> {
    match request {
        Disconnect::Close { code, reason } => Some(CloseFrame {
            code: *code,
            reason: Utf8Bytes::from_static(*reason),
        }),
        Disconnect::Terminate => None,
    }
}
