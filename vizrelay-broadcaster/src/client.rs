use axum::extract::ws::{close_code, Message};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use crate::role::Role;

pub type ConnectionId = u64;

/// Informational identity of the remote peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub forwarded_for: Option<String>,
    pub user_agent: Option<String>,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            forwarded_for: None,
            user_agent: None,
        }
    }
}

impl std::fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.forwarded_for {
            Some(forwarded) => write!(f, "{}", forwarded),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// How a connection is to be ended by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// Send a close frame, then drop the transport
    Close { code: u16, reason: &'static str },
    /// Drop the transport without a close handshake
    Terminate,
}

impl Disconnect {
    pub fn server_full() -> Self {
        Disconnect::Close {
            code: close_code::POLICY,
            reason: "Server full",
        }
    }

    pub fn superseded() -> Self {
        Disconnect::Close {
            code: close_code::NORMAL,
            reason: "Superseded by new source",
        }
    }

    pub fn shutdown() -> Self {
        Disconnect::Close {
            code: close_code::NORMAL,
            reason: "Server shutting down",
        }
    }

    /// For attempts that arrive after shutdown has started
    pub fn going_away() -> Self {
        Disconnect::Close {
            code: close_code::AWAY,
            reason: "Server shutting down",
        }
    }
}

/// Outcome of handing one message to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound queue full; this message is skipped for the peer
    NotReady,
    /// Connection is gone
    Closed,
}

/// Hub-side handle to one live connection.
///
/// Cloning is cheap; every clone refers to the same connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    role: Role,
    peer: Arc<PeerInfo>,
    outbound: mpsc::Sender<Message>,
    alive: Arc<AtomicBool>,
    disconnect: Arc<watch::Sender<Option<Disconnect>>>,
}

/// Connection-side ends of a [`ClientHandle`]
#[derive(Debug)]
pub struct ClientChannels {
    pub outbound: mpsc::Receiver<Message>,
    pub disconnect: watch::Receiver<Option<Disconnect>>,
}

impl ClientHandle {
    pub fn new(
        id: ConnectionId,
        role: Role,
        peer: PeerInfo,
        queue_capacity: usize,
    ) -> (Self, ClientChannels) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (disconnect_tx, disconnect_rx) = watch::channel(None);

        let handle = Self {
            id,
            role,
            peer: Arc::new(peer),
            outbound: outbound_tx,
            alive: Arc::new(AtomicBool::new(true)),
            disconnect: Arc::new(disconnect_tx),
        };
        let channels = ClientChannels {
            outbound: outbound_rx,
            disconnect: disconnect_rx,
        };

        (handle, channels)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Queue a message without waiting
    pub fn deliver(&self, message: Message) -> Delivery {
        match self.outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::NotReady,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Re-arm liveness (pong received)
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear liveness, returning whether it was set since the last probe
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Ask the connection to end. The first request wins.
    pub fn disconnect(&self, how: Disconnect) -> bool {
        self.disconnect.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(how);
                true
            } else {
                false
            }
        })
    }

    pub fn disconnect_requested(&self) -> Option<Disconnect> {
        self.disconnect.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> (ClientHandle, ClientChannels) {
        let peer = PeerInfo::new("127.0.0.1:9000".parse().unwrap());
        ClientHandle::new(7, Role::Viewer, peer, capacity)
    }

    #[tokio::test]
    async fn test_deliver_queues_in_order() {
        let (client, mut channels) = handle(4);
        assert_eq!(client.deliver(Message::Text("a".into())), Delivery::Queued);
        assert_eq!(client.deliver(Message::Text("b".into())), Delivery::Queued);

        assert_eq!(channels.outbound.recv().await, Some(Message::Text("a".into())));
        assert_eq!(channels.outbound.recv().await, Some(Message::Text("b".into())));
    }

    #[test]
    fn test_full_queue_is_not_ready() {
        let (client, _channels) = handle(1);
        assert_eq!(client.deliver(Message::Text("a".into())), Delivery::Queued);
        assert_eq!(client.deliver(Message::Text("b".into())), Delivery::NotReady);
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (client, channels) = handle(4);
        drop(channels);
        assert_eq!(client.deliver(Message::Text("a".into())), Delivery::Closed);
    }

    #[test]
    fn test_liveness_flag() {
        let (client, _channels) = handle(4);
        assert!(client.take_alive(), "new connections start alive");
        assert!(!client.take_alive(), "no pong since last probe");
        client.mark_alive();
        assert!(client.take_alive());
    }

    #[tokio::test]
    async fn test_first_disconnect_wins() {
        let (client, mut channels) = handle(4);
        assert!(client.disconnect(Disconnect::superseded()));
        assert!(!client.disconnect(Disconnect::Terminate));

        channels.disconnect.changed().await.unwrap();
        assert_eq!(*channels.disconnect.borrow(), Some(Disconnect::superseded()));
        assert_eq!(client.disconnect_requested(), Some(Disconnect::superseded()));
    }

    #[test]
    fn test_peer_display_prefers_forwarded_for() {
        let mut peer = PeerInfo::new("10.0.0.2:4000".parse().unwrap());
        assert_eq!(peer.to_string(), "10.0.0.2:4000");
        peer.forwarded_for = Some("203.0.113.9".to_string());
        assert_eq!(peer.to_string(), "203.0.113.9");
    }
}
