use axum::extract::ws::Message;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::client::{ClientChannels, ClientHandle, ConnectionId, Delivery, Disconnect, PeerInfo};
use crate::error::{RelayError, Result};
use crate::events::{payload_of, validate_frame, StatusUpdate, WireMessage};
use crate::role::{Role, RoleClassifier};
use crate::stats::{RelayStats, StatsSnapshot};

/// Relayed-message count between progress log lines
const PROGRESS_LOG_EVERY: u64 = 100;

/// Smallest outbound queue: room for the welcome and streaming statuses
pub const MIN_OUTBOUND_QUEUE: usize = 2;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub max_viewers: usize,
    pub heartbeat_interval: Duration,
    pub stats_interval: Duration,
    /// Per-connection outbound queue depth, raised to [`MIN_OUTBOUND_QUEUE`]
    pub outbound_queue: usize,
    pub classifier: RoleClassifier,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_viewers: 100,
            heartbeat_interval: Duration::from_secs(30),
            stats_interval: Duration::from_secs(60),
            outbound_queue: 64,
            classifier: RoleClassifier::default(),
        }
    }
}

/// Per-target tally of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub probed: usize,
    /// Queue full, ping not sent; liveness left as it was
    pub skipped: usize,
    pub evicted: usize,
}

/// Source/viewer state together with the counters
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub source_connected: bool,
    pub viewers: usize,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

#[derive(Default)]
struct Registry {
    source: Option<ClientHandle>,
    viewers: HashMap<ConnectionId, ClientHandle>,
    shutting_down: bool,
}

/// Single-source, multi-viewer relay.
///
/// All membership lives behind one lock. Critical sections swap the source
/// slot, add/remove viewers, clone handles or `try_send` frames; nothing
/// awaits or tears down a connection while holding it.
pub struct RelayHub {
    config: HubConfig,
    registry: Mutex<Registry>,
    stats: RelayStats,
    next_id: AtomicU64,
    open_connections: AtomicUsize,
}

impl RelayHub {
    pub fn new(mut config: HubConfig) -> Self {
        config.outbound_queue = config.outbound_queue.max(MIN_OUTBOUND_QUEUE);
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            stats: RelayStats::new(),
            next_id: AtomicU64::new(1),
            open_connections: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn classify(&self, user_agent: Option<&str>) -> Role {
        self.config.classifier.classify(user_agent)
    }

    /// Count an accepted transport connection and hand out its id
    pub fn accept(&self) -> ConnectionId {
        self.stats.record_connection();
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Admit a classified connection.
    ///
    /// A source replaces (and closes) any current source. A viewer is
    /// refused with [`RelayError::ServerFull`] at capacity; otherwise it is
    /// queued a welcome status.
    pub fn register(
        &self,
        id: ConnectionId,
        role: Role,
        peer: PeerInfo,
    ) -> Result<(ClientHandle, ClientChannels)> {
        let (handle, channels) = ClientHandle::new(id, role, peer, self.config.outbound_queue);

        match role {
            Role::Source => {
                let previous = {
                    let mut registry = self.registry.lock();
                    if registry.shutting_down {
                        return Err(RelayError::ShuttingDown);
                    }
                    registry.source.replace(handle.clone())
                };

                if let Some(old) = previous {
                    tracing::info!(
                        conn_id = old.id(),
                        "Source already connected, closing old connection"
                    );
                    old.disconnect(Disconnect::superseded());
                }

                tracing::info!(conn_id = id, peer = %handle.peer(), "Music bot connected");
            }
            Role::Viewer => {
                let (source_connected, viewers) = {
                    let mut registry = self.registry.lock();
                    if registry.shutting_down {
                        return Err(RelayError::ShuttingDown);
                    }
                    if registry.viewers.len() >= self.config.max_viewers {
                        return Err(RelayError::ServerFull {
                            max: self.config.max_viewers,
                        });
                    }
                    registry.viewers.insert(id, handle.clone());
                    (registry.source.is_some(), registry.viewers.len())
                };

                tracing::info!(conn_id = id, peer = %handle.peer(), "Viewer connected ({} total)", viewers);

                self.send_status(&handle, StatusUpdate::welcome(source_connected, viewers));
                if source_connected {
                    self.send_status(&handle, StatusUpdate::streaming());
                }
            }
        }

        Ok((handle, channels))
    }

    /// Relay one message from `from` to every viewer.
    ///
    /// The message is forwarded as-is. It is dropped when it is not a
    /// well-formed frame or when `from` is no longer the installed source.
    pub fn forward(&self, from: ConnectionId, message: Message) -> Result<ForwardReport> {
        let size = match payload_of(&message) {
            Some(payload) => {
                if let Err(e) = validate_frame(payload) {
                    self.stats.record_dropped();
                    return Err(e);
                }
                payload.len()
            }
            None => {
                self.stats.record_dropped();
                return Err(RelayError::MalformedFrame("not a data message".to_string()));
            }
        };

        // Source check and enqueue are one critical section so a superseded
        // source cannot slip a frame in after its replacement registered
        let (report, dead) = {
            let registry = self.registry.lock();
            match &registry.source {
                Some(source) if source.id() == from => {}
                _ => return Err(RelayError::NotSource(from)),
            }
            queue_all(registry.viewers.values(), &message)
        };
        self.remove_dead(dead);

        let total = self.stats.record_relay(size);
        if total % PROGRESS_LOG_EVERY == 0 {
            tracing::debug!("Broadcasted {} messages ({} viewers reached)", total, report.delivered);
        }

        Ok(report)
    }

    /// Cleanup for a closed connection. Safe to call more than once.
    pub fn unregister(&self, handle: &ClientHandle) {
        match handle.role() {
            Role::Source => {
                let viewers = {
                    let mut registry = self.registry.lock();
                    let current = registry.source.as_ref().map(ClientHandle::id) == Some(handle.id());
                    if current {
                        registry.source = None;
                        Some(registry.viewers.values().cloned().collect::<Vec<_>>())
                    } else {
                        None
                    }
                };

                // Only the installed source clears the slot and notifies
                if let Some(viewers) = viewers {
                    tracing::info!(conn_id = handle.id(), "Music bot disconnected");
                    match WireMessage::from(StatusUpdate::source_lost()).to_message() {
                        Ok(message) => {
                            let (_, dead) = queue_all(&viewers, &message);
                            self.remove_dead(dead);
                        }
                        Err(e) => tracing::error!("Failed to encode status: {}", e),
                    }
                }
            }
            Role::Viewer => {
                let removed = {
                    let mut registry = self.registry.lock();
                    registry
                        .viewers
                        .remove(&handle.id())
                        .map(|_| registry.viewers.len())
                };

                if let Some(remaining) = removed {
                    tracing::info!(conn_id = handle.id(), "Viewer disconnected ({} remaining)", remaining);
                }
            }
        }
    }

    /// One liveness sweep over every open connection.
    ///
    /// Connections that have not answered the previous probe are terminated
    /// and cleaned up; the rest get their flag cleared and a fresh ping.
    pub fn heartbeat(&self) -> HeartbeatReport {
        let connections = {
            let registry = self.registry.lock();
            registry
                .source
                .iter()
                .chain(registry.viewers.values())
                .cloned()
                .collect::<Vec<_>>()
        };

        let mut report = HeartbeatReport::default();
        for connection in connections {
            if connection.take_alive() {
                match connection.deliver(Message::Ping(Bytes::new())) {
                    Delivery::Queued => report.probed += 1,
                    Delivery::NotReady => {
                        // Unprobed peers must not be counted as silent
                        connection.mark_alive();
                        report.skipped += 1;
                    }
                    Delivery::Closed => {
                        tracing::warn!(conn_id = connection.id(), "Failed to send ping, removing");
                        connection.disconnect(Disconnect::Terminate);
                        self.unregister(&connection);
                        report.evicted += 1;
                    }
                }
            } else {
                tracing::info!(
                    conn_id = connection.id(),
                    role = %connection.role(),
                    "Connection timed out, terminating"
                );
                connection.disconnect(Disconnect::Terminate);
                self.unregister(&connection);
                report.evicted += 1;
            }
        }

        report
    }

    /// Close every connection and refuse new ones
    pub fn shutdown(&self) -> usize {
        let connections = {
            let mut registry = self.registry.lock();
            registry.shutting_down = true;
            let mut all: Vec<ClientHandle> = registry.viewers.drain().map(|(_, h)| h).collect();
            all.extend(registry.source.take());
            all
        };

        for connection in &connections {
            connection.disconnect(Disconnect::shutdown());
        }

        tracing::info!("Closing {} connections", connections.len());
        connections.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.registry.lock().shutting_down
    }

    pub fn source_connected(&self) -> bool {
        self.registry.lock().source.is_some()
    }

    pub fn viewer_count(&self) -> usize {
        self.registry.lock().viewers.len()
    }

    pub fn status(&self) -> RelayStatus {
        let (source_connected, viewers) = {
            let registry = self.registry.lock();
            (registry.source.is_some(), registry.viewers.len())
        };

        RelayStatus {
            source_connected,
            viewers,
            stats: self.stats.snapshot(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.stats.uptime()
    }

    /// Number of connection tasks still running
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }

    /// Track a running connection task until the guard drops
    pub fn connection_guard(self: &Arc<Self>) -> ConnectionGuard {
        self.open_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            hub: Arc::clone(self),
        }
    }

    /// Wait until every connection task has ended, up to `timeout`
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.open_connections() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Start the periodic liveness sweep
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if hub.is_shutting_down() {
                    break;
                }
                let report = hub.heartbeat();
                tracing::debug!(
                    probed = report.probed,
                    evicted = report.evicted,
                    "Heartbeat sweep"
                );
            }
            tracing::info!("Heartbeat task stopped");
        })
    }

    /// Start the periodic statistics report
    pub fn spawn_stats_reporter(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let period = self.config.stats_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if hub.is_shutting_down() {
                    break;
                }
                log_status(&hub.status());
            }
        })
    }

    fn send_status(&self, handle: &ClientHandle, status: StatusUpdate) {
        match WireMessage::from(status).to_message() {
            Ok(message) => {
                if handle.deliver(message) != Delivery::Queued {
                    tracing::warn!(conn_id = handle.id(), "Could not queue status message");
                }
            }
            Err(e) => tracing::error!("Failed to encode status: {}", e),
        }
    }

    /// Tear down viewers whose queues were found closed. Must run unlocked.
    fn remove_dead(&self, dead: Vec<ClientHandle>) {
        for target in dead {
            tracing::warn!(conn_id = target.id(), "Failed to send to viewer, removing");
            target.disconnect(Disconnect::Terminate);
            self.unregister(&target);
        }
    }
}

/// Queue `message` for each target without blocking.
///
/// Full queues skip the message; targets with closed queues are returned
/// for removal.
fn queue_all<'a>(
    targets: impl IntoIterator<Item = &'a ClientHandle>,
    message: &Message,
) -> (ForwardReport, Vec<ClientHandle>) {
    let mut report = ForwardReport::default();
    let mut dead = Vec::new();

    for target in targets {
        match target.deliver(message.clone()) {
            Delivery::Queued => report.delivered += 1,
            Delivery::NotReady => report.skipped += 1,
            Delivery::Closed => {
                report.failed += 1;
                dead.push(target.clone());
            }
        }
    }

    (report, dead)
}

/// Decrements the open-connection count on drop
pub struct ConnectionGuard {
    hub: Arc<RelayHub>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

fn log_status(status: &RelayStatus) {
    let stats = &status.stats;
    tracing::info!("📊 Relay statistics");
    tracing::info!(
        "  Bot: {}",
        if status.source_connected { "Connected" } else { "Disconnected" }
    );
    tracing::info!("  Viewers: {}", status.viewers);
    tracing::info!("  Total connections: {}", stats.total_connections);
    tracing::info!("  Total messages: {} ({} dropped)", stats.total_messages, stats.frames_dropped);
    tracing::info!("  Avg msg/sec: {:.2}", stats.avg_messages_per_sec);
    tracing::info!("  Avg KB/sec: {:.2}", stats.avg_kb_per_sec);
    tracing::info!("  Uptime: {}s", stats.uptime_secs);
}
