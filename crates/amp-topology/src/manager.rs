//! The topology manager and its wholesale-replaced snapshots.

use std::collections::{HashMap, HashSet};

use amp_protocol::{HeartbeatPayload, NodeId};
use amp_transport::{Connection, ConnectionStatus};
use serde::Serialize;

use crate::health::{mesh_density, HealthTracker};
use crate::peer::PeerInfo;

/// Health changes smaller than this are not announced.
const HEALTH_EPSILON: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct TopologyConfig {
    pub heartbeat_interval: std::time::Duration,
    /// Missed heartbeats before a peer is marked stale.
    pub stale_after_missed: u32,
    /// Further intervals of silence before a stale peer is evicted.
    pub grace_intervals: u32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: std::time::Duration::from_secs(5),
            stale_after_missed: 2,
            grace_intervals: 1,
        }
    }
}

/// Topology change notifications, consumed by the fault coordinator and
/// re-exported to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologyEvent {
    PeerJoined { peer: NodeId },
    PeerLeft { peer: NodeId },
    PeerStale { peer: NodeId },
    HealthChanged { score: f64 },
}

/// Read-mostly snapshot of the network. Rebuilt and swapped whole on
/// every topology-affecting event; readers always see a consistent view.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkTopology {
    pub local_node: NodeId,
    pub peers: HashMap<NodeId, PeerInfo>,
    pub connections: HashMap<NodeId, Connection>,
    /// Always `peers.len() + 1` (self).
    pub total_nodes: usize,
    pub mesh_density: f64,
    pub average_latency_ms: f64,
    pub health_score: f64,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// Maintains the authoritative peer view and aggregate scores.
pub struct TopologyManager {
    local: NodeId,
    config: TopologyConfig,
    peers: HashMap<NodeId, PeerInfo>,
    connections: HashMap<NodeId, Connection>,
    last_heartbeat: HashMap<NodeId, chrono::DateTime<chrono::Utc>>,
    stale: HashSet<NodeId>,
    health: HealthTracker,
    snapshot: NetworkTopology,
}

impl TopologyManager {
    pub fn new(local: NodeId, config: TopologyConfig) -> Self {
        let snapshot = NetworkTopology {
            local_node: local.clone(),
            peers: HashMap::new(),
            connections: HashMap::new(),
            total_nodes: 1,
            mesh_density: 1.0,
            average_latency_ms: 0.0,
            health_score: 100.0,
            generated_at: chrono::Utc::now(),
        };
        Self {
            local,
            config,
            peers: HashMap::new(),
            connections: HashMap::new(),
            last_heartbeat: HashMap::new(),
            stale: HashSet::new(),
            health: HealthTracker::new(),
            snapshot,
        }
    }

    /// Insert or refresh a peer entry.
    pub fn handle_peer_join(&mut self, info: PeerInfo) -> Vec<TopologyEvent> {
        let peer = info.id.clone();
        let known = self.peers.contains_key(&peer);
        self.peers.insert(peer.clone(), info);
        self.last_heartbeat.insert(peer.clone(), chrono::Utc::now());
        self.stale.remove(&peer);

        let mut events = Vec::new();
        if !known {
            tracing::info!(peer = %peer, "peer joined");
            events.push(TopologyEvent::PeerJoined { peer });
        }
        events.extend(self.rebuild());
        events
    }

    /// Remove a peer and everything known about it.
    pub fn handle_peer_leave(&mut self, peer: &NodeId) -> Vec<TopologyEvent> {
        let known = self.peers.remove(peer).is_some();
        self.connections.remove(peer);
        self.last_heartbeat.remove(peer);
        self.stale.remove(peer);

        let mut events = Vec::new();
        if known {
            tracing::info!(peer = %peer, "peer left");
            events.push(TopologyEvent::PeerLeft { peer: peer.clone() });
        }
        events.extend(self.rebuild());
        events
    }

    /// Fold a heartbeat into the peer's metadata. An unknown sender is a
    /// discovery event and joins the view.
    pub fn record_heartbeat(
        &mut self,
        from: &NodeId,
        heartbeat: &HeartbeatPayload,
    ) -> Vec<TopologyEvent> {
        let mut events = Vec::new();
        if !self.peers.contains_key(from) {
            events.push(TopologyEvent::PeerJoined { peer: from.clone() });
            self.peers.insert(from.clone(), PeerInfo::new(from.clone()));
        }
        if let Some(info) = self.peers.get_mut(from) {
            info.apply_heartbeat(heartbeat);
        }
        self.last_heartbeat.insert(from.clone(), chrono::Utc::now());
        if self.stale.remove(from) {
            tracing::debug!(peer = %from, "stale peer recovered");
        }
        events.extend(self.rebuild());
        events
    }

    /// Liveness sweep, run on the heartbeat schedule. Marks peers stale
    /// after `stale_after_missed` silent intervals and evicts them after
    /// the grace period on top.
    pub fn sweep_stale(&mut self, now: chrono::DateTime<chrono::Utc>) -> Vec<TopologyEvent> {
        let interval_ms = self.config.heartbeat_interval.as_millis().max(1) as i64;
        let stale_after = self.config.stale_after_missed as i64 * interval_ms;
        let evict_after = stale_after + self.config.grace_intervals as i64 * interval_ms;

        let mut newly_stale = Vec::new();
        let mut to_evict = Vec::new();
        for (peer, last) in &self.last_heartbeat {
            let silent_ms = now.signed_duration_since(*last).num_milliseconds();
            if silent_ms >= evict_after {
                to_evict.push(peer.clone());
            } else if silent_ms >= stale_after && !self.stale.contains(peer) {
                newly_stale.push(peer.clone());
            }
        }

        let mut events = Vec::new();
        for peer in newly_stale {
            tracing::warn!(peer = %peer, "peer missed heartbeats, marking stale");
            self.stale.insert(peer.clone());
            events.push(TopologyEvent::PeerStale { peer });
        }
        for peer in to_evict {
            events.extend(self.handle_peer_leave(&peer));
        }
        events
    }

    /// Replace the connection mirror with a fresh transport snapshot.
    pub fn sync_connections(
        &mut self,
        connections: HashMap<NodeId, Connection>,
    ) -> Vec<TopologyEvent> {
        self.connections = connections;
        self.rebuild()
    }

    /// Charge a connection failure against the health score.
    pub fn record_connection_failure(&mut self, peer: &NodeId) -> Vec<TopologyEvent> {
        tracing::debug!(peer = %peer, "connection failure charged to health");
        self.health.record_failure();
        self.rebuild()
    }

    fn rebuild(&mut self) -> Vec<TopologyEvent> {
        let total_nodes = self.peers.len() + 1;

        let our_links = self
            .connections
            .values()
            .filter(|c| c.status == ConnectionStatus::Connected)
            .count() as u64;
        let gossiped_links: u64 = self
            .peers
            .values()
            .map(|p| p.metadata.link_count as u64)
            .sum();
        let density = mesh_density(our_links + gossiped_links, total_nodes);

        let latencies: Vec<f64> = self
            .connections
            .values()
            .filter_map(|c| c.latency_ms)
            .map(f64::from)
            .collect();
        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        let previous_score = self.health.score();
        let score = self.health.update(density, average_latency_ms);

        self.snapshot = NetworkTopology {
            local_node: self.local.clone(),
            peers: self.peers.clone(),
            connections: self.connections.clone(),
            total_nodes,
            mesh_density: density,
            average_latency_ms,
            health_score: score,
            generated_at: chrono::Utc::now(),
        };

        if (score - previous_score).abs() > HEALTH_EPSILON {
            vec![TopologyEvent::HealthChanged { score }]
        } else {
            Vec::new()
        }
    }

    /// Copy-on-read snapshot for the application.
    pub fn snapshot(&self) -> NetworkTopology {
        self.snapshot.clone()
    }

    pub fn health_score(&self) -> f64 {
        self.health.score()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_known(&self, peer: &NodeId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn peer(&self, peer: &NodeId) -> Option<&PeerInfo> {
        self.peers.get(peer)
    }

    /// Peers currently marked stale.
    pub fn stale_peers(&self) -> Vec<NodeId> {
        self.stale.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TopologyManager {
        TopologyManager::new(NodeId::new("local"), TopologyConfig::default())
    }

    #[test]
    fn test_total_nodes_tracks_peers_plus_self() {
        let mut topo = manager();
        assert_eq!(topo.snapshot().total_nodes, 1);

        topo.handle_peer_join(PeerInfo::new(NodeId::new("a")));
        topo.handle_peer_join(PeerInfo::new(NodeId::new("b")));
        assert_eq!(topo.snapshot().total_nodes, 3);

        // Re-join is an update, not a duplicate entry.
        topo.handle_peer_join(PeerInfo::new(NodeId::new("a")));
        assert_eq!(topo.snapshot().total_nodes, 3);

        topo.handle_peer_leave(&NodeId::new("a"));
        assert_eq!(topo.snapshot().total_nodes, 2);

        topo.handle_peer_leave(&NodeId::new("missing"));
        assert_eq!(topo.snapshot().total_nodes, 2);
    }

    #[test]
    fn test_join_and_leave_emit_events() {
        let mut topo = manager();
        let events = topo.handle_peer_join(PeerInfo::new(NodeId::new("a")));
        assert!(events.contains(&TopologyEvent::PeerJoined {
            peer: NodeId::new("a")
        }));

        let events = topo.handle_peer_leave(&NodeId::new("a"));
        assert!(events.contains(&TopologyEvent::PeerLeft {
            peer: NodeId::new("a")
        }));
    }

    #[test]
    fn test_heartbeat_from_unknown_peer_is_discovery() {
        let mut topo = manager();
        let events = topo.record_heartbeat(&NodeId::new("new"), &HeartbeatPayload::default());
        assert!(events.contains(&TopologyEvent::PeerJoined {
            peer: NodeId::new("new")
        }));
        assert!(topo.is_known(&NodeId::new("new")));
    }

    #[test]
    fn test_two_missed_heartbeats_then_grace_then_eviction() {
        let mut topo = manager();
        topo.handle_peer_join(PeerInfo::new(NodeId::new("c")));

        let interval = chrono::Duration::seconds(5);
        // Margin over the wall-clock captured inside handle_peer_join.
        let joined_at = chrono::Utc::now() + chrono::Duration::milliseconds(100);

        // One missed interval: still fine.
        let events = topo.sweep_stale(joined_at + interval);
        assert!(events.is_empty());

        // Two missed intervals: stale.
        let events = topo.sweep_stale(joined_at + interval * 2);
        assert!(events.contains(&TopologyEvent::PeerStale {
            peer: NodeId::new("c")
        }));
        assert_eq!(topo.peer_count(), 1, "stale peer is not yet removed");

        // Grace expired: treated as left.
        let events = topo.sweep_stale(joined_at + interval * 3);
        assert!(events.contains(&TopologyEvent::PeerLeft {
            peer: NodeId::new("c")
        }));
        assert_eq!(topo.peer_count(), 0);
        assert_eq!(topo.snapshot().total_nodes, 1);
    }

    #[test]
    fn test_heartbeat_clears_staleness() {
        let mut topo = manager();
        topo.handle_peer_join(PeerInfo::new(NodeId::new("c")));

        let joined_at = chrono::Utc::now() + chrono::Duration::milliseconds(100);
        topo.sweep_stale(joined_at + chrono::Duration::seconds(10));
        assert_eq!(topo.stale_peers(), vec![NodeId::new("c")]);

        topo.record_heartbeat(&NodeId::new("c"), &HeartbeatPayload::default());
        assert!(topo.stale_peers().is_empty());
    }

    #[test]
    fn test_connection_failure_degrades_health_without_full_recovery() {
        let mut topo = manager();
        topo.handle_peer_join(PeerInfo::new(NodeId::new("a")));
        let before = topo.health_score();

        topo.record_connection_failure(&NodeId::new("a"));
        let after = topo.health_score();
        assert!(after < before);

        // Clean recomputes recover gradually, never in a single step.
        let events = topo.sync_connections(HashMap::new());
        let recovered = topo.health_score();
        assert!(recovered >= after);
        assert!(recovered < before);
        let _ = events;
    }

    #[test]
    fn test_density_uses_gossiped_link_counts() {
        let mut topo = manager();
        let mut info = PeerInfo::new(NodeId::new("a"));
        info.metadata.link_count = 1;
        topo.handle_peer_join(info);

        let mut conn = Connection::connecting(NodeId::new("a"));
        conn.establish();
        let mut connections = HashMap::new();
        connections.insert(NodeId::new("a"), conn);
        topo.sync_connections(connections);

        // Two nodes, the one edge reported from both ends: density 1.0.
        assert!((topo.snapshot().mesh_density - 1.0).abs() < 1e-9);
    }
}
