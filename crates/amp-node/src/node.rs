//! The mesh coordinator: owns the four layers and the event loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use amp_consensus::{
    CommittedEntry, ConsensusAction, ConsensusConfig, ConsensusEngine, ConsensusOutcome,
};
use amp_fault::{FaultAction, FaultConfig, FaultCoordinator, FaultSignal};
use amp_protocol::{
    AgentDescriptor, ConsensusPayload, HeartbeatPayload, MessageKind, NetworkMessage, NodeId,
    Signer, SpawnDirective, Transaction, TransactionKind,
};
use amp_topology::{NetworkTopology, PeerInfo, TopologyConfig, TopologyEvent, TopologyManager};
use amp_transport::{
    ChannelOpener, SignalMessage, Signaling, TransportConfig, TransportEvent, TransportManager,
};
use tokio::sync::{mpsc, watch, RwLock};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::events::{MeshEvent, NetworkStats};

/// Shared mutable state behind the coordinator's lock. All mutation goes
/// through the event loop or the public API; readers get snapshots.
struct NodeState {
    topology: TopologyManager,
    consensus: Option<ConsensusEngine>,
    faults: FaultCoordinator,
    local_agents: HashMap<String, AgentDescriptor>,
}

/// Inbound streams handed over when the node starts.
struct PendingInputs {
    signal_rx: mpsc::UnboundedReceiver<(NodeId, SignalMessage)>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// An AMP mesh node. Explicitly constructed, explicitly shut down.
pub struct MeshNode {
    local: NodeId,
    config: NodeConfig,
    signer: Arc<dyn Signer>,
    transport: Arc<TransportManager>,
    state: Arc<RwLock<NodeState>>,
    events_tx: mpsc::UnboundedSender<MeshEvent>,
    pending_inputs: StdMutex<Option<PendingInputs>>,
    shutdown_tx: watch::Sender<bool>,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl MeshNode {
    /// Build a node over a transport (signaling + channel opener) and a
    /// signer. Validates the configuration; a bad config never joins the
    /// network. Returns the node and the application event stream.
    pub fn new(
        local: NodeId,
        config: NodeConfig,
        signaling: Arc<dyn Signaling>,
        opener: Arc<dyn ChannelOpener>,
        signal_rx: mpsc::UnboundedReceiver<(NodeId, SignalMessage)>,
        signer: Arc<dyn Signer>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<MeshEvent>), NodeError> {
        config.validate()?;

        let transport_config = TransportConfig {
            connect_timeout: Duration::from_secs(config.network.connect_timeout_secs),
            max_connections: config.network.max_connections,
            require_signatures: config.network.require_signatures,
            trusted_peers: if config.network.trusted_peers.is_empty() {
                None
            } else {
                Some(
                    config
                        .network
                        .trusted_peers
                        .iter()
                        .map(|p| NodeId::new(p.clone()))
                        .collect(),
                )
            },
            ..TransportConfig::default()
        };
        let (transport, transport_events) = TransportManager::new(
            local.clone(),
            transport_config,
            signaling,
            opener,
            Arc::clone(&signer),
        );

        let consensus = if config.consensus.enabled {
            let mut validators: Vec<NodeId> = config
                .consensus
                .validators
                .iter()
                .map(|v| NodeId::new(v.clone()))
                .collect();
            if !validators.contains(&local) {
                validators.push(local.clone());
            }
            let consensus_config = ConsensusConfig {
                validators,
                bft_ratio: config.consensus.bft_ratio,
                epoch_timeout: Duration::from_secs(config.consensus.epoch_timeout_secs),
                leader_proposal_timeout: Duration::from_secs(
                    config.consensus.leader_proposal_timeout_secs,
                ),
                algorithm: config.consensus.algorithm.clone(),
            };
            Some(ConsensusEngine::new(
                local.clone(),
                consensus_config,
                Arc::clone(&signer),
            )?)
        } else {
            None
        };

        let topology = TopologyManager::new(
            local.clone(),
            TopologyConfig {
                heartbeat_interval: Duration::from_secs(config.network.heartbeat_interval_secs),
                ..TopologyConfig::default()
            },
        );

        let faults = FaultCoordinator::new(
            local.clone(),
            FaultConfig {
                reconnect_base_delay: Duration::from_millis(config.fault.reconnect_base_ms),
                reconnect_max_delay: Duration::from_millis(config.fault.reconnect_max_ms),
                reconnect_ceiling: config.fault.reconnect_ceiling,
                byzantine_threshold: config.fault.byzantine_threshold,
                degradation_threshold: config.fault.degradation_threshold,
                latency_degraded_ms: config.fault.latency_degraded_ms,
                manual_escalation_threshold: config.fault.manual_escalation_threshold,
            },
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let node = Arc::new(Self {
            local,
            config,
            signer,
            transport,
            state: Arc::new(RwLock::new(NodeState {
                topology,
                consensus,
                faults,
                local_agents: HashMap::new(),
            })),
            events_tx,
            pending_inputs: StdMutex::new(Some(PendingInputs {
                signal_rx,
                transport_events,
            })),
            shutdown_tx,
            started_at: chrono::Utc::now(),
        });
        Ok((node, events_rx))
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    /// Start the transport and the event loop, then dial the bootstrap
    /// peers. Call once.
    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        let inputs = self
            .pending_inputs
            .lock()
            .expect("pending_inputs lock poisoned")
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        tokio::spawn(Arc::clone(&self.transport).run(inputs.signal_rx));
        tokio::spawn(Arc::clone(self).event_loop(inputs.transport_events));

        for peer in &self.config.network.bootstrap_peers {
            let node = Arc::clone(self);
            let peer = NodeId::new(peer.clone());
            tokio::spawn(async move {
                if let Err(e) = node.transport.connect_to_peer(&peer).await {
                    tracing::warn!(peer = %peer, error = %e, "bootstrap connect failed");
                    let actions = {
                        let mut state = node.state.write().await;
                        node.observe_fault(
                            &mut state,
                            FaultSignal::PeerUnreachable { peer: peer.clone() },
                        )
                    };
                    node.execute_fault_actions(actions).await;
                }
            });
        }
        tracing::info!(node = %self.local, name = %self.config.node.name, "mesh node started");
        Ok(())
    }

    /// Close every peer connection, cancel the timers, and stop the
    /// loops. Idempotent; in-flight best-effort sends may be dropped.
    pub async fn shutdown(&self) {
        if *self.shutdown_tx.borrow() {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        self.transport.shutdown().await;
        tracing::info!(node = %self.local, "mesh node shut down");
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    // ── Event loop ──────────────────────────────────────────────────────

    /// The timers run on independent schedules: a stalled peer cannot
    /// starve heartbeating or fault detection.
    async fn event_loop(
        self: Arc<Self>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let heartbeat_every =
            Duration::from_secs(self.config.network.heartbeat_interval_secs);
        let mut heartbeat = tokio::time::interval(heartbeat_every);
        let mut liveness = tokio::time::interval(heartbeat_every);
        let mut health = tokio::time::interval(Duration::from_secs(2));
        let mut consensus_tick = tokio::time::interval(Duration::from_secs(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = transport_events.recv() => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => break,
                },
                _ = heartbeat.tick() => self.send_heartbeat().await,
                _ = liveness.tick() => self.sweep_liveness().await,
                _ = health.tick() => self.recompute_health().await,
                _ = consensus_tick.tick() => self.drive_consensus().await,
            }
        }
        tracing::debug!(node = %self.local, "event loop stopped");
    }

    async fn on_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected { peer } => {
                let (topo_events, fault_actions) = {
                    let mut state = self.state.write().await;
                    let events = state.topology.handle_peer_join(PeerInfo::new(peer.clone()));
                    let actions = self.observe_fault(
                        &mut state,
                        FaultSignal::PeerRecovered { peer: peer.clone() },
                    );
                    (events, actions)
                };
                self.emit(MeshEvent::PeerConnected { peer });
                self.emit_topology_events(topo_events);
                self.execute_fault_actions(fault_actions).await;
            }
            TransportEvent::PeerDisconnected { peer } => self.on_peer_down(peer).await,
            TransportEvent::MessageReceived { from, message } => {
                self.on_message(from, message).await
            }
        }
    }

    async fn on_peer_down(self: &Arc<Self>, peer: NodeId) {
        let (topo_events, fault_actions) = {
            let mut state = self.state.write().await;
            let mut events = state.topology.record_connection_failure(&peer);
            events.extend(state.topology.handle_peer_leave(&peer));
            let actions = self.observe_fault(
                &mut state,
                FaultSignal::PeerUnreachable { peer: peer.clone() },
            );
            (events, actions)
        };
        self.emit(MeshEvent::PeerDisconnected { peer });
        self.emit_topology_events(topo_events);
        self.execute_fault_actions(fault_actions).await;
    }

    async fn on_message(self: &Arc<Self>, from: NodeId, message: NetworkMessage) {
        match message.kind {
            MessageKind::Heartbeat => self.on_heartbeat(message).await,
            MessageKind::Consensus => self.on_consensus_message(message).await,
            MessageKind::Broadcast => {
                self.transport.relay(&message).await;
                self.emit(MeshEvent::MessageReceived { from, message });
            }
            MessageKind::AgentCoordination => {
                if message.destination.is_none() {
                    self.transport.relay(&message).await;
                }
                self.emit(MeshEvent::MessageReceived { from, message });
            }
            MessageKind::Direct => {
                self.emit(MeshEvent::MessageReceived { from, message });
            }
        }
    }

    async fn on_heartbeat(self: &Arc<Self>, message: NetworkMessage) {
        let payload: HeartbeatPayload = match serde_json::from_value(message.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(peer = %message.source, error = %e, "malformed heartbeat dropped");
                return;
            }
        };
        let source = message.source.clone();
        let latency_ms = (chrono::Utc::now() - message.sent_at)
            .num_milliseconds()
            .max(0) as u32;
        self.transport.record_latency(&source, latency_ms).await;

        let (topo_events, fault_actions) = {
            let mut state = self.state.write().await;
            let events = state.topology.record_heartbeat(&source, &payload);
            let mut actions = self.observe_fault(
                &mut state,
                FaultSignal::ReachabilityReport {
                    from: source.clone(),
                    reachable: payload.reachable.clone(),
                },
            );
            actions.extend(self.observe_fault(
                &mut state,
                FaultSignal::LatencySample {
                    peer: source.clone(),
                    latency_ms,
                },
            ));
            (events, actions)
        };
        self.emit_topology_events(topo_events);
        self.execute_fault_actions(fault_actions).await;

        // Heartbeats gossip across the mesh within their relay budget.
        self.transport.relay(&message).await;
    }

    async fn on_consensus_message(self: &Arc<Self>, message: NetworkMessage) {
        let payload: ConsensusPayload = match serde_json::from_value(message.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(peer = %message.source, error = %e, "malformed consensus payload dropped");
                return;
            }
        };
        let source = message.source.clone();
        let actions = {
            let mut state = self.state.write().await;
            match state.consensus.as_mut() {
                Some(engine) => engine.handle_message(&source, payload, chrono::Utc::now()),
                None => Vec::new(),
            }
        };
        self.execute_consensus_actions(actions).await;
        self.transport.relay(&message).await;
    }

    // ── Timers ──────────────────────────────────────────────────────────

    async fn send_heartbeat(self: &Arc<Self>) {
        let connected = self.transport.connected_peers().await;
        let payload = {
            let state = self.state.read().await;
            let mut capabilities: Vec<String> = state
                .local_agents
                .values()
                .flat_map(|a| a.capabilities.clone())
                .collect();
            capabilities.sort();
            capabilities.dedup();
            HeartbeatPayload {
                agents: state.local_agents.values().cloned().collect(),
                cpu_load: read_cpu_load(),
                memory_load: read_memory_load(),
                capabilities,
                addresses: self.config.network.listen_addrs.clone(),
                protocols: vec![amp_protocol::PROTOCOL_NAME.to_string()],
                link_count: connected.len() as u32,
                reachable: connected,
            }
        };
        let value = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "heartbeat serialization failed");
                return;
            }
        };
        let mut message = NetworkMessage::new(MessageKind::Heartbeat, self.local.clone(), value);
        message.ttl = self.config.network.message_ttl;
        self.transport.broadcast(message).await;
    }

    async fn sweep_liveness(self: &Arc<Self>) {
        let now = chrono::Utc::now();
        let (events, evicted) = {
            let mut state = self.state.write().await;
            let events = state.topology.sweep_stale(now);
            let evicted: Vec<NodeId> = events
                .iter()
                .filter_map(|e| match e {
                    TopologyEvent::PeerLeft { peer } => Some(peer.clone()),
                    _ => None,
                })
                .collect();
            (events, evicted)
        };
        self.emit_topology_events(events);
        // Tearing down the channel feeds the normal disconnect pipeline:
        // transport event → topology leave → fault classification.
        for peer in evicted {
            self.transport.disconnect(&peer).await;
        }
    }

    async fn recompute_health(self: &Arc<Self>) {
        let connections = self.transport.connection_snapshot().await;
        let events = {
            let mut state = self.state.write().await;
            state.topology.sync_connections(connections)
        };
        self.emit_topology_events(events);
    }

    async fn drive_consensus(self: &Arc<Self>) {
        let now = chrono::Utc::now();
        let actions = {
            let mut state = self.state.write().await;
            match state.consensus.as_mut() {
                Some(engine) => {
                    let mut actions = engine.tick(now);
                    actions.extend(engine.maybe_start_round(now));
                    actions
                }
                None => Vec::new(),
            }
        };
        self.execute_consensus_actions(actions).await;
    }

    // ── Action execution ────────────────────────────────────────────────

    async fn execute_consensus_actions(self: &Arc<Self>, actions: Vec<ConsensusAction>) {
        for action in actions {
            match action {
                ConsensusAction::Broadcast(payload) => {
                    let value = match serde_json::to_value(&payload) {
                        Ok(value) => value,
                        Err(e) => {
                            tracing::error!(error = %e, "consensus payload serialization failed");
                            continue;
                        }
                    };
                    let mut message =
                        NetworkMessage::new(MessageKind::Consensus, self.local.clone(), value);
                    message.ttl = self.config.network.message_ttl;
                    self.transport.broadcast(message).await;
                }
                ConsensusAction::Outcome(outcome) => {
                    if let ConsensusOutcome::Aborted { epoch, reason, .. } = &outcome {
                        let fault_actions = {
                            let mut state = self.state.write().await;
                            let suspect = state
                                .consensus
                                .as_ref()
                                .and_then(|e| e.current_leader())
                                .filter(|leader| *leader != self.local);
                            self.observe_fault(
                                &mut state,
                                FaultSignal::ConsensusAborted {
                                    epoch: *epoch,
                                    suspect,
                                    reason: reason.clone(),
                                },
                            )
                        };
                        self.execute_fault_actions(fault_actions).await;
                    }
                    self.emit(MeshEvent::ConsensusReached(outcome));
                }
                ConsensusAction::Suspect { peer, reason } => {
                    let fault_actions = {
                        let mut state = self.state.write().await;
                        self.observe_fault(&mut state, FaultSignal::InvalidMessage { peer, reason })
                    };
                    self.execute_fault_actions(fault_actions).await;
                }
            }
        }
    }

    fn execute_fault_actions<'a>(
        self: &'a Arc<Self>,
        actions: Vec<FaultAction>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        for action in actions {
            self.emit(MeshEvent::RecoveryInitiated {
                action: action.clone(),
            });
            match action {
                FaultAction::Reconnect { peer, delay, attempt } => {
                    tracing::info!(peer = %peer, attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                    let node = Arc::clone(self);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if node.is_shut_down() {
                            return;
                        }
                        match node.transport.connect_to_peer(&peer).await {
                            Ok(()) => {
                                tracing::info!(peer = %peer, "reconnect succeeded");
                            }
                            Err(e) => {
                                tracing::warn!(peer = %peer, error = %e, "reconnect failed");
                                let (topo_events, fault_actions) = {
                                    let mut state = node.state.write().await;
                                    let events =
                                        state.topology.record_connection_failure(&peer);
                                    let actions = node.observe_fault(
                                        &mut state,
                                        FaultSignal::PeerUnreachable { peer: peer.clone() },
                                    );
                                    (events, actions)
                                };
                                node.emit_topology_events(topo_events);
                                node.execute_fault_actions(fault_actions).await;
                            }
                        }
                    });
                }
                FaultAction::Reroute { peer, via } => {
                    tracing::info!(peer = %peer, via = ?via, "rerouting traffic");
                    // Strengthen the alternate path when one exists.
                    if let Some(via) = via {
                        let node = Arc::clone(self);
                        tokio::spawn(async move {
                            if let Err(e) = node.transport.connect_to_peer(&via).await {
                                tracing::debug!(peer = %via, error = %e, "alternate route connect failed");
                            }
                        });
                    }
                }
                FaultAction::Isolate { peer } => {
                    tracing::warn!(peer = %peer, "isolating peer");
                    {
                        let mut state = self.state.write().await;
                        if let Some(engine) = state.consensus.as_mut() {
                            engine.remove_validator(&peer);
                        }
                        let events = state.topology.handle_peer_leave(&peer);
                        drop(state);
                        self.emit_topology_events(events);
                    }
                    self.transport.forget(&peer).await;
                }
                FaultAction::FlagForReview { fault_id } => {
                    tracing::error!(fault = %fault_id, "fault flagged for manual review");
                }
            }
        }
        })
    }

    /// Run a fault observation and surface any newly created records.
    fn observe_fault(&self, state: &mut NodeState, signal: FaultSignal) -> Vec<FaultAction> {
        let before = state.faults.faults().len();
        let actions = state.faults.observe(signal);
        for record in &state.faults.faults()[before..] {
            self.emit(MeshEvent::FaultDetected(record.clone()));
        }
        actions
    }

    fn emit_topology_events(&self, events: Vec<TopologyEvent>) {
        for event in events {
            match event {
                TopologyEvent::HealthChanged { score } => {
                    self.emit(MeshEvent::NetworkHealthChanged { score });
                }
                TopologyEvent::PeerStale { peer } => {
                    tracing::warn!(peer = %peer, "peer stale");
                }
                // Joins and leaves surface through the transport pipeline.
                TopologyEvent::PeerJoined { .. } | TopologyEvent::PeerLeft { .. } => {}
            }
        }
    }

    fn emit(&self, event: MeshEvent) {
        let _ = self.events_tx.send(event);
    }

    // ── Application API ─────────────────────────────────────────────────

    /// Connect to a peer on demand.
    pub async fn connect_to_peer(&self, peer: &NodeId) -> Result<(), NodeError> {
        self.transport.connect_to_peer(peer).await?;
        Ok(())
    }

    /// Publish a local agent descriptor; carried by every heartbeat from
    /// now on.
    pub async fn register_local_agent(&self, agent: AgentDescriptor) {
        let mut state = self.state.write().await;
        tracing::info!(agent = %agent.agent_id, name = %agent.name, "local agent registered");
        state.local_agents.insert(agent.agent_id.clone(), agent);
    }

    /// Retract a local agent descriptor.
    pub async fn unregister_local_agent(&self, agent_id: &str) {
        let mut state = self.state.write().await;
        if state.local_agents.remove(agent_id).is_some() {
            tracing::info!(agent = %agent_id, "local agent unregistered");
        }
    }

    /// Submit a coordination transaction to the consensus engine. Returns
    /// the transaction id, or `None` when it was already pending or
    /// committed.
    pub async fn submit_transaction(
        self: &Arc<Self>,
        kind: TransactionKind,
    ) -> Result<Option<String>, NodeError> {
        let mut tx = Transaction::new(kind, self.local.clone());
        tx.signature = self.signer.sign(&tx.signing_payload());
        let tx_id = tx.id.clone();

        let (queued, actions) = {
            let mut state = self.state.write().await;
            let Some(engine) = state.consensus.as_mut() else {
                return Err(NodeError::Config("consensus is disabled".into()));
            };
            let queued = engine.submit_transaction(tx)?;
            let actions = engine.maybe_start_round(chrono::Utc::now());
            (queued, actions)
        };
        self.execute_consensus_actions(actions).await;
        Ok(queued.then_some(tx_id))
    }

    /// Coordinate an agent spawn. With a target node this is a directed
    /// coordination message; without one it is a network-wide placement
    /// decision through consensus (or a best-effort broadcast when
    /// consensus is disabled).
    pub async fn coordinate_agent_spawn(
        self: &Arc<Self>,
        config: serde_json::Value,
        target: Option<NodeId>,
    ) -> Result<Option<String>, NodeError> {
        match target {
            Some(peer) => {
                let directive = SpawnDirective {
                    config,
                    requested_by: self.local.clone(),
                };
                let value = serde_json::to_value(&directive)
                    .map_err(|e| NodeError::Config(e.to_string()))?;
                let mut message = NetworkMessage::direct(self.local.clone(), peer.clone(), value);
                message.kind = MessageKind::AgentCoordination;
                self.transport.send_direct(&peer, message).await?;
                Ok(None)
            }
            None => {
                let consensus_enabled = {
                    let state = self.state.read().await;
                    state.consensus.is_some()
                };
                if consensus_enabled {
                    let agent = agent_from_spawn_config(&config);
                    self.submit_transaction(TransactionKind::SpawnAgent { agent })
                        .await
                } else {
                    let directive = SpawnDirective {
                        config,
                        requested_by: self.local.clone(),
                    };
                    let value = serde_json::to_value(&directive)
                        .map_err(|e| NodeError::Config(e.to_string()))?;
                    let mut message = NetworkMessage::new(
                        MessageKind::AgentCoordination,
                        self.local.clone(),
                        value,
                    );
                    message.ttl = self.config.network.message_ttl;
                    self.transport.broadcast(message).await;
                    Ok(None)
                }
            }
        }
    }

    // ── Snapshot accessors ──────────────────────────────────────────────

    pub async fn get_network_topology(&self) -> NetworkTopology {
        self.state.read().await.topology.snapshot()
    }

    pub async fn get_network_health(&self) -> f64 {
        self.state.read().await.topology.health_score()
    }

    pub async fn get_network_stats(&self) -> NetworkStats {
        let snapshot = {
            let state = self.state.read().await;
            state.topology.snapshot()
        };
        let (sent, received) = self.transport.message_totals();
        let connection_count = self.transport.connected_peers().await.len();
        NetworkStats {
            peer_count: snapshot.total_nodes - 1,
            connection_count,
            messages_sent: sent,
            messages_received: received,
            average_latency_ms: snapshot.average_latency_ms,
            health_score: snapshot.health_score,
            uptime_secs: (chrono::Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    pub async fn connected_peers(&self) -> Vec<NodeId> {
        self.transport.connected_peers().await
    }

    /// The ordered committed log.
    pub async fn committed_log(&self) -> Vec<CommittedEntry> {
        let state = self.state.read().await;
        state
            .consensus
            .as_ref()
            .map(|e| e.committed_log().to_vec())
            .unwrap_or_default()
    }

    /// Complete fault audit trail.
    pub async fn fault_records(&self) -> Vec<amp_fault::FaultRecord> {
        self.state.read().await.faults.faults().to_vec()
    }
}

fn agent_from_spawn_config(config: &serde_json::Value) -> AgentDescriptor {
    let name = config
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or("agent")
        .to_string();
    let capabilities = config
        .get("capabilities")
        .and_then(|c| c.as_array())
        .map(|caps| {
            caps.iter()
                .filter_map(|c| c.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    AgentDescriptor::new(name, capabilities)
}

#[cfg(unix)]
fn read_cpu_load() -> f64 {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse().ok()))
        .unwrap_or(0.0)
}

#[cfg(not(unix))]
fn read_cpu_load() -> f64 {
    0.0
}

#[cfg(unix)]
fn read_memory_load() -> f64 {
    let Some(meminfo) = std::fs::read_to_string("/proc/meminfo").ok() else {
        return 0.0;
    };
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse().ok())
    };
    match (field("MemTotal:"), field("MemAvailable:")) {
        (Some(total), Some(available)) if total > 0.0 => (total - available) / total,
        _ => 0.0,
    }
}

#[cfg(not(unix))]
fn read_memory_load() -> f64 {
    0.0
}
