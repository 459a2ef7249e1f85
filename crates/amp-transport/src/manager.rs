//! The transport manager: owns every peer connection.
//!
//! Holds at most one connection per peer id, drives offer/answer
//! negotiation, and pumps inbound bytes up as typed events. Retry policy
//! deliberately lives elsewhere (fault coordinator); a failed connect is
//! reported once and left alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use amp_protocol::{MessageKind, NetworkMessage, NodeId, SeenCache, Signer};
use tokio::sync::{mpsc, watch, Mutex, RwLock};

use crate::channel::{ChannelOpener, PeerChannel};
use crate::connection::{Connection, ConnectionStatus};
use crate::error::TransportError;
use crate::signaling::{SignalMessage, Signaling};

/// Transport configuration.
#[derive(Clone)]
pub struct TransportConfig {
    /// Ceiling for one connection attempt, offer to open channel.
    pub connect_timeout: std::time::Duration,
    /// Maximum simultaneous peer connections.
    pub max_connections: usize,
    /// Drop inbound messages whose signature does not verify.
    pub require_signatures: bool,
    /// Capacity of the duplicate-message window.
    pub dedup_capacity: usize,
    /// Protocol names offered during negotiation, most preferred first.
    pub protocols: Vec<String>,
    /// When set, offers from peers outside this list are rejected.
    pub trusted_peers: Option<Vec<NodeId>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: std::time::Duration::from_secs(10),
            max_connections: 64,
            require_signatures: false,
            dedup_capacity: amp_protocol::DEDUP_CACHE_CAPACITY,
            protocols: vec![amp_protocol::PROTOCOL_NAME.to_string()],
            trusted_peers: None,
        }
    }
}

/// Events delivered to the layer above, per-sender FIFO.
#[derive(Debug)]
pub enum TransportEvent {
    PeerConnected { peer: NodeId },
    PeerDisconnected { peer: NodeId },
    MessageReceived { from: NodeId, message: NetworkMessage },
}

struct PeerLink {
    connection: Connection,
    channel: Option<Box<dyn PeerChannel>>,
    status_tx: watch::Sender<ConnectionStatus>,
    session: String,
}

impl PeerLink {
    fn new(peer: NodeId, session: String) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            connection: Connection::connecting(peer),
            channel: None,
            status_tx,
            session,
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.connection.status
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.connection.status = status;
        let _ = self.status_tx.send(status);
    }
}

/// Owns all peer connections and the inbound dispatch path.
pub struct TransportManager {
    local: NodeId,
    config: TransportConfig,
    signaling: Arc<dyn Signaling>,
    opener: Arc<dyn ChannelOpener>,
    signer: Arc<dyn Signer>,
    links: RwLock<HashMap<NodeId, PeerLink>>,
    seen: Mutex<SeenCache>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    shutdown_tx: watch::Sender<bool>,
    total_sent: AtomicU64,
    total_received: AtomicU64,
}

impl TransportManager {
    /// Create a manager. Returns the manager and the event stream for the
    /// layer above. Call [`TransportManager::run`] with the inbound signal
    /// stream to start negotiation handling.
    pub fn new(
        local: NodeId,
        config: TransportConfig,
        signaling: Arc<dyn Signaling>,
        opener: Arc<dyn ChannelOpener>,
        signer: Arc<dyn Signer>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let dedup_capacity = config.dedup_capacity;
        let manager = Arc::new(Self {
            local,
            config,
            signaling,
            opener,
            signer,
            links: RwLock::new(HashMap::new()),
            seen: Mutex::new(SeenCache::new(dedup_capacity)),
            event_tx,
            shutdown_tx,
            total_sent: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
        });
        (manager, event_rx)
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    /// Process inbound signaling until shutdown. Spawn this once.
    pub async fn run(
        self: Arc<Self>,
        mut signal_rx: mpsc::UnboundedReceiver<(NodeId, SignalMessage)>,
    ) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                signal = signal_rx.recv() => {
                    match signal {
                        Some((from, signal)) => self.handle_signal(from, signal).await,
                        None => break,
                    }
                }
            }
        }
        tracing::debug!(node = %self.local, "signal loop stopped");
    }

    /// Connect to a peer. Idempotent: a call against an already-connected
    /// peer succeeds immediately, and a call against an in-progress
    /// attempt resolves together with it. Never retries on its own.
    pub async fn connect_to_peer(&self, peer: &NodeId) -> Result<(), TransportError> {
        if *peer == self.local {
            return Ok(());
        }

        enum Plan {
            Done,
            Wait(watch::Receiver<ConnectionStatus>),
            Start(watch::Receiver<ConnectionStatus>, String),
        }

        let plan = {
            let mut links = self.links.write().await;
            match links.get(peer).map(|l| l.status()) {
                Some(ConnectionStatus::Connected) => Plan::Done,
                Some(ConnectionStatus::Connecting) => {
                    Plan::Wait(links[peer].status_tx.subscribe())
                }
                _ => {
                    let active = links
                        .values()
                        .filter(|l| {
                            matches!(
                                l.status(),
                                ConnectionStatus::Connected | ConnectionStatus::Connecting
                            )
                        })
                        .count();
                    if active >= self.config.max_connections {
                        return Err(TransportError::AtCapacity(self.config.max_connections));
                    }
                    let session = uuid::Uuid::new_v4().to_string();
                    let link = PeerLink::new(peer.clone(), session.clone());
                    let status_rx = link.status_tx.subscribe();
                    // Replaces any previous failed/disconnected record.
                    links.insert(peer.clone(), link);
                    Plan::Start(status_rx, session)
                }
            }
        };

        match plan {
            Plan::Done => Ok(()),
            Plan::Wait(rx) => self.await_connected(peer, rx).await,
            Plan::Start(rx, session) => {
                let offer = SignalMessage::Offer {
                    session,
                    protocols: self.config.protocols.clone(),
                };
                if let Err(e) = self.signaling.send(peer, offer) {
                    self.fail_link(peer).await;
                    return Err(TransportError::Connect {
                        peer: peer.clone(),
                        reason: e.to_string(),
                    });
                }
                self.await_connected(peer, rx).await
            }
        }
    }

    async fn await_connected(
        &self,
        peer: &NodeId,
        mut rx: watch::Receiver<ConnectionStatus>,
    ) -> Result<(), TransportError> {
        let wait = async {
            loop {
                match *rx.borrow_and_update() {
                    ConnectionStatus::Connected => return Ok(()),
                    ConnectionStatus::Failed | ConnectionStatus::Disconnected => {
                        return Err(TransportError::Connect {
                            peer: peer.clone(),
                            reason: "negotiation rejected or channel failed".into(),
                        })
                    }
                    ConnectionStatus::Connecting => {}
                }
                if rx.changed().await.is_err() {
                    return Err(TransportError::Connect {
                        peer: peer.clone(),
                        reason: "transport shut down".into(),
                    });
                }
            }
        };
        match tokio::time::timeout(self.config.connect_timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                self.fail_link(peer).await;
                Err(TransportError::Timeout(peer.clone()))
            }
        }
    }

    async fn fail_link(&self, peer: &NodeId) {
        let mut links = self.links.write().await;
        if let Some(link) = links.get_mut(peer) {
            if link.status() == ConnectionStatus::Connecting {
                link.set_status(ConnectionStatus::Failed);
            }
        }
    }

    async fn handle_signal(self: &Arc<Self>, from: NodeId, signal: SignalMessage) {
        match signal {
            SignalMessage::Offer { session, protocols } => {
                self.handle_offer(from, session, protocols).await;
            }
            SignalMessage::Answer {
                session,
                accepted_protocol,
            } => {
                self.handle_answer(from, session, accepted_protocol).await;
            }
            SignalMessage::IceCandidate { session, candidate } => {
                tracing::trace!(peer = %from, session, candidate, "ice candidate");
            }
            SignalMessage::Reject { session, reason } => {
                tracing::warn!(peer = %from, session, reason, "connection rejected");
                self.fail_link(&from).await;
            }
        }
    }

    async fn handle_offer(self: &Arc<Self>, from: NodeId, session: String, protocols: Vec<String>) {
        if let Some(trusted) = &self.config.trusted_peers {
            if !trusted.contains(&from) {
                tracing::warn!(peer = %from, "offer from untrusted peer rejected");
                self.reject(&from, &session, "not in trusted peer list");
                return;
            }
        }

        let accepted = protocols
            .iter()
            .find(|p| self.config.protocols.contains(p))
            .cloned();
        let Some(accepted_protocol) = accepted else {
            self.reject(&from, &session, "no common protocol");
            return;
        };

        let inbound_rx = {
            let mut links = self.links.write().await;
            let active = links
                .values()
                .filter(|l| l.status() == ConnectionStatus::Connected)
                .count();
            if active >= self.config.max_connections {
                drop(links);
                self.reject(&from, &session, "connection limit reached");
                return;
            }

            let (channel, inbound_rx) = match self.opener.open(&from, &session) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(peer = %from, error = %e, "channel open failed");
                    drop(links);
                    self.reject(&from, &session, "channel open failed");
                    return;
                }
            };

            // A reconnect replaces the old record wholesale.
            if let Some(old) = links.remove(&from) {
                if let Some(channel) = old.channel {
                    channel.close();
                }
            }
            let mut link = PeerLink::new(from.clone(), session.clone());
            link.channel = Some(channel);
            link.connection.establish();
            let _ = link.status_tx.send(ConnectionStatus::Connected);
            links.insert(from.clone(), link);
            inbound_rx
        };

        let answer = SignalMessage::Answer {
            session: session.clone(),
            accepted_protocol,
        };
        if let Err(e) = self.signaling.send(&from, answer) {
            tracing::warn!(peer = %from, error = %e, "answer send failed");
            // Not yet announced upward: remove the link without an event.
            if let Some(link) = self.links.write().await.remove(&from) {
                if let Some(channel) = link.channel {
                    channel.close();
                }
            }
            return;
        }

        tracing::info!(peer = %from, "peer connected (inbound)");
        self.spawn_pump(from.clone(), session, inbound_rx);
        let _ = self
            .event_tx
            .send(TransportEvent::PeerConnected { peer: from });
    }

    async fn handle_answer(self: &Arc<Self>, from: NodeId, session: String, protocol: String) {
        let inbound_rx = {
            let mut links = self.links.write().await;
            let Some(link) = links.get_mut(&from) else {
                tracing::debug!(peer = %from, "answer for unknown attempt ignored");
                return;
            };
            if link.session != session || link.status() != ConnectionStatus::Connecting {
                tracing::debug!(peer = %from, session, "stale answer ignored");
                return;
            }
            match self.opener.open(&from, &session) {
                Ok((channel, inbound_rx)) => {
                    link.channel = Some(channel);
                    link.connection.establish();
                    let _ = link.status_tx.send(ConnectionStatus::Connected);
                    inbound_rx
                }
                Err(e) => {
                    tracing::warn!(peer = %from, error = %e, "channel open failed");
                    link.set_status(ConnectionStatus::Failed);
                    return;
                }
            }
        };

        tracing::info!(peer = %from, protocol, "peer connected (outbound)");
        self.spawn_pump(from.clone(), session, inbound_rx);
        let _ = self
            .event_tx
            .send(TransportEvent::PeerConnected { peer: from });
    }

    fn reject(&self, to: &NodeId, session: &str, reason: &str) {
        let signal = SignalMessage::Reject {
            session: session.to_string(),
            reason: reason.to_string(),
        };
        if let Err(e) = self.signaling.send(to, signal) {
            tracing::debug!(peer = %to, error = %e, "reject send failed");
        }
    }

    /// Pump inbound bytes from one peer up as events, in arrival order.
    /// Every malformed, unverified, expired, or duplicate envelope is a
    /// logged drop; nothing a peer sends can fault this task.
    fn spawn_pump(
        self: &Arc<Self>,
        peer: NodeId,
        session: String,
        mut inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(bytes) = inbound_rx.recv().await {
                let message = match NetworkMessage::from_bytes(&bytes) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "dropping malformed envelope");
                        continue;
                    }
                };
                if manager.config.require_signatures
                    && !manager.signer.verify(
                        &message.source,
                        &message.signing_payload(),
                        &message.signature,
                    )
                {
                    tracing::debug!(peer = %peer, id = %message.id, "dropping unverified message");
                    continue;
                }
                if message.expired() {
                    tracing::trace!(id = %message.id, hop = message.hop, "dropping expired message");
                    continue;
                }
                if !manager.seen.lock().await.check_and_insert(&message.id) {
                    tracing::trace!(id = %message.id, "dropping duplicate message");
                    continue;
                }
                if message.kind == MessageKind::Direct {
                    if let Some(destination) = &message.destination {
                        if *destination != manager.local {
                            tracing::debug!(
                                id = %message.id,
                                destination = %destination,
                                "dropping misdelivered direct message"
                            );
                            continue;
                        }
                    }
                }
                {
                    let mut links = manager.links.write().await;
                    if let Some(link) = links.get_mut(&peer) {
                        link.connection.messages_received += 1;
                        link.connection.touch();
                    }
                }
                manager.total_received.fetch_add(1, Ordering::Relaxed);
                let _ = manager.event_tx.send(TransportEvent::MessageReceived {
                    from: peer.clone(),
                    message,
                });
            }
            manager.drop_link(&peer, &session).await;
        });
    }

    /// Called when a peer's inbound stream ends or its channel dies.
    async fn drop_link(&self, peer: &NodeId, session: &str) {
        let mut links = self.links.write().await;
        let Some(link) = links.get_mut(peer) else {
            return;
        };
        if link.session != session || link.status() != ConnectionStatus::Connected {
            return;
        }
        if let Some(channel) = link.channel.take() {
            channel.close();
        }
        link.set_status(ConnectionStatus::Disconnected);
        tracing::info!(peer = %peer, "peer disconnected");
        let _ = self
            .event_tx
            .send(TransportEvent::PeerDisconnected { peer: peer.clone() });
    }

    /// Best-effort fan-out to every peer with an open channel. Peers whose
    /// channel is not open are skipped, never queued. Returns the number
    /// of successful sends.
    pub async fn broadcast(&self, mut message: NetworkMessage) -> usize {
        message.source = self.local.clone();
        if message.id.is_empty() {
            message.id = uuid::Uuid::new_v4().to_string();
        }
        if message.signature.is_empty() {
            message.signature = self.signer.sign(&message.signing_payload());
        }
        // Our own id goes into the window so a relayed echo is dropped.
        self.seen.lock().await.check_and_insert(&message.id);
        self.fanout(&message, None).await
    }

    /// Relay a received broadcast onward, spending one hop of its budget.
    /// Returns 0 once the budget is exhausted.
    pub async fn relay(&self, message: &NetworkMessage) -> usize {
        match message.relayed() {
            Some(copy) => self.fanout(&copy, Some(&message.source)).await,
            None => 0,
        }
    }

    async fn fanout(&self, message: &NetworkMessage, exclude: Option<&NodeId>) -> usize {
        let bytes = message.to_bytes();
        let mut sent = 0;
        let mut links = self.links.write().await;
        for (peer, link) in links.iter_mut() {
            if exclude == Some(peer) {
                continue;
            }
            let Some(channel) = link.channel.as_ref() else {
                continue;
            };
            if !channel.is_open() {
                continue;
            }
            if channel.send(bytes.clone()).is_ok() {
                link.connection.messages_sent += 1;
                link.connection.touch();
                sent += 1;
            }
        }
        self.total_sent.fetch_add(sent as u64, Ordering::Relaxed);
        sent
    }

    /// Send to one peer. Fails if no open channel exists; sends once, no
    /// retry.
    pub async fn send_direct(
        &self,
        peer: &NodeId,
        mut message: NetworkMessage,
    ) -> Result<(), TransportError> {
        message.source = self.local.clone();
        message.destination = Some(peer.clone());
        if message.signature.is_empty() {
            message.signature = self.signer.sign(&message.signing_payload());
        }
        let mut links = self.links.write().await;
        let link = links
            .get_mut(peer)
            .ok_or_else(|| TransportError::NotConnected(peer.clone()))?;
        let channel = link
            .channel
            .as_ref()
            .filter(|c| c.is_open())
            .ok_or_else(|| TransportError::NotConnected(peer.clone()))?;
        channel.send(message.to_bytes())?;
        link.connection.messages_sent += 1;
        link.connection.touch();
        self.total_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Tear down the connection to one peer.
    pub async fn disconnect(&self, peer: &NodeId) {
        let mut links = self.links.write().await;
        if let Some(link) = links.get_mut(peer) {
            if let Some(channel) = link.channel.take() {
                channel.close();
            }
            if matches!(
                link.status(),
                ConnectionStatus::Connected | ConnectionStatus::Connecting
            ) {
                link.set_status(ConnectionStatus::Disconnected);
                let _ = self
                    .event_tx
                    .send(TransportEvent::PeerDisconnected { peer: peer.clone() });
            }
        }
    }

    /// Forget a peer entirely (isolation). The record is removed, not just
    /// marked disconnected, so a later connect starts clean.
    pub async fn forget(&self, peer: &NodeId) {
        self.disconnect(peer).await;
        self.links.write().await.remove(peer);
    }

    /// Close every connection and stop the signal loop. In-flight
    /// best-effort sends may be dropped.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut links = self.links.write().await;
        for link in links.values_mut() {
            if let Some(channel) = link.channel.take() {
                channel.close();
            }
            if link.status() == ConnectionStatus::Connected {
                link.set_status(ConnectionStatus::Disconnected);
            }
        }
        tracing::info!(node = %self.local, "transport shut down");
    }

    /// Peers with an open channel right now.
    pub async fn connected_peers(&self) -> Vec<NodeId> {
        let links = self.links.read().await;
        let mut peers: Vec<NodeId> = links
            .iter()
            .filter(|(_, l)| {
                l.status() == ConnectionStatus::Connected
                    && l.channel.as_ref().is_some_and(|c| c.is_open())
            })
            .map(|(p, _)| p.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Copy-on-read snapshot of every connection record.
    pub async fn connection_snapshot(&self) -> HashMap<NodeId, Connection> {
        self.links
            .read()
            .await
            .iter()
            .map(|(p, l)| (p.clone(), l.connection.clone()))
            .collect()
    }

    /// Record a measured round-trip latency for a peer.
    pub async fn record_latency(&self, peer: &NodeId, latency_ms: u32) {
        if let Some(link) = self.links.write().await.get_mut(peer) {
            link.connection.latency_ms = Some(latency_ms);
        }
    }

    /// Total messages sent/received since startup.
    pub fn message_totals(&self) -> (u64, u64) {
        (
            self.total_sent.load(Ordering::Relaxed),
            self.total_received.load(Ordering::Relaxed),
        )
    }
}
