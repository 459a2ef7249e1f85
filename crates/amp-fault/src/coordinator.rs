//! The fault coordinator state machine.
//!
//! Like the consensus engine, it is pure: the embedding node feeds it
//! signals and executes the recovery actions it returns through the
//! transport layer.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use amp_protocol::NodeId;

use crate::backoff::Backoff;
use crate::types::{
    FaultKind, FaultRecord, FaultResolution, PartitionRecord, RecoveryAction, RecoveryOutcome,
    RecoveryStrategy, Severity,
};

#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Reconnect attempts before giving up and isolating.
    pub reconnect_ceiling: u32,
    /// Invalid messages from one peer before it is byzantine.
    pub byzantine_threshold: u32,
    /// Consecutive degraded-latency reports before rerouting.
    pub degradation_threshold: u32,
    /// Latency considered degraded.
    pub latency_degraded_ms: u32,
    /// Automatic partition retries before manual escalation.
    pub manual_escalation_threshold: u32,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            reconnect_ceiling: 5,
            byzantine_threshold: 3,
            degradation_threshold: 3,
            latency_degraded_ms: 500,
            manual_escalation_threshold: 3,
        }
    }
}

/// Inputs observed from the topology and consensus layers.
#[derive(Debug, Clone)]
pub enum FaultSignal {
    /// A peer stopped answering (missed heartbeats, dead channel).
    PeerUnreachable { peer: NodeId },
    /// A previously unreachable peer is back.
    PeerRecovered { peer: NodeId },
    /// A peer gossiped the set of peers it can reach.
    ReachabilityReport { from: NodeId, reachable: Vec<NodeId> },
    /// A peer sent something invalid (bad signature, conflicting vote).
    InvalidMessage { peer: NodeId, reason: String },
    /// A consensus round died; `suspect` is the leader that failed it.
    ConsensusAborted {
        epoch: u64,
        suspect: Option<NodeId>,
        reason: String,
    },
    /// Measured latency for a live peer.
    LatencySample { peer: NodeId, latency_ms: u32 },
}

/// Recovery work for the embedding node to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultAction {
    /// Reconnect to the peer after the delay.
    Reconnect {
        peer: NodeId,
        delay: Duration,
        attempt: u32,
    },
    /// Route traffic for `peer` through `via` (or away from `peer` when
    /// no alternate exists).
    Reroute { peer: NodeId, via: Option<NodeId> },
    /// Drop the peer and exclude it from the validator set.
    Isolate { peer: NodeId },
    /// Surface the fault for human attention.
    FlagForReview { fault_id: String },
}

/// Classifies anomalies and selects recovery, keeping the audit trail.
pub struct FaultCoordinator {
    local: NodeId,
    config: FaultConfig,
    unreachable: HashSet<NodeId>,
    isolated: HashSet<NodeId>,
    /// Last gossiped reachability per peer.
    reports: HashMap<NodeId, Vec<NodeId>>,
    invalid_counts: HashMap<NodeId, u32>,
    degradation_counts: HashMap<NodeId, u32>,
    leader_failures: HashMap<NodeId, u32>,
    reconnect: HashMap<NodeId, Backoff>,
    /// Open node-failure fault per peer, to keep one record per outage.
    open_failures: HashMap<NodeId, String>,
    faults: Vec<FaultRecord>,
    partitions: Vec<PartitionRecord>,
}

impl FaultCoordinator {
    pub fn new(local: NodeId, config: FaultConfig) -> Self {
        Self {
            local,
            config,
            unreachable: HashSet::new(),
            isolated: HashSet::new(),
            reports: HashMap::new(),
            invalid_counts: HashMap::new(),
            degradation_counts: HashMap::new(),
            leader_failures: HashMap::new(),
            reconnect: HashMap::new(),
            open_failures: HashMap::new(),
            faults: Vec::new(),
            partitions: Vec::new(),
        }
    }

    /// Feed one observation; returns the recovery work it warrants.
    pub fn observe(&mut self, signal: FaultSignal) -> Vec<FaultAction> {
        match signal {
            FaultSignal::PeerUnreachable { peer } => self.on_unreachable(peer),
            FaultSignal::PeerRecovered { peer } => self.on_recovered(peer),
            FaultSignal::ReachabilityReport { from, reachable } => {
                self.reports.insert(from, reachable);
                Vec::new()
            }
            FaultSignal::InvalidMessage { peer, reason } => self.on_invalid(peer, &reason),
            FaultSignal::ConsensusAborted {
                epoch,
                suspect,
                reason,
            } => self.on_consensus_abort(epoch, suspect, &reason),
            FaultSignal::LatencySample { peer, latency_ms } => {
                self.on_latency(peer, latency_ms)
            }
        }
    }

    fn on_unreachable(&mut self, peer: NodeId) -> Vec<FaultAction> {
        if self.isolated.contains(&peer) || peer == self.local {
            return Vec::new();
        }
        self.unreachable.insert(peer.clone());

        // Partition: the unreachable peers still report reaching each
        // other, so they are alive on the far side of a split.
        let island = self.corroborated_island();
        if island.len() >= 2 && island.contains(&peer) {
            return self.on_partition(island, peer);
        }

        // Node failure: reconnect with backoff up to the ceiling, then
        // isolate.
        let backoff = self.reconnect.entry(peer.clone()).or_insert_with(|| {
            Backoff::new(
                self.config.reconnect_base_delay,
                self.config.reconnect_max_delay,
            )
        });
        if backoff.attempt() >= self.config.reconnect_ceiling {
            tracing::warn!(peer = %peer, "reconnect ceiling reached, isolating");
            return self.isolate(peer, FaultKind::NodeFailure);
        }
        let delay = backoff.next_delay();
        let attempt = backoff.attempt();

        let action = RecoveryAction::Reconnect {
            attempt,
            delay_ms: delay.as_millis() as u64,
        };
        match self.open_failures.get(&peer).cloned() {
            Some(fault_id) => {
                // Same outage, next attempt: escalate the open record.
                if let Some(record) = self.faults.iter_mut().find(|f| f.id == fault_id) {
                    record.severity = record.severity.escalated();
                    record.action = action;
                }
            }
            None => {
                tracing::warn!(peer = %peer, "node failure detected");
                let record = FaultRecord::new(FaultKind::NodeFailure, vec![peer.clone()], action);
                self.open_failures.insert(peer.clone(), record.id.clone());
                self.faults.push(record);
            }
        }

        vec![FaultAction::Reconnect {
            peer,
            delay,
            attempt,
        }]
    }

    fn on_partition(&mut self, island: Vec<NodeId>, trigger: NodeId) -> Vec<FaultAction> {
        // No alternate path at all makes the partition complete.
        let via = self.alternate_route_to(&trigger);
        let complete = island
            .iter()
            .all(|member| self.alternate_route_to(member).is_none());

        let open_index = self
            .partitions
            .iter()
            .position(|p| !p.is_healed() && p.affected.iter().any(|m| island.contains(m)));
        match open_index {
            Some(index) => {
                let partition = &mut self.partitions[index];
                partition.affected = island.clone();
                partition.complete = complete;
                partition.retry_attempts += 1;
                if partition.retry_attempts >= self.config.manual_escalation_threshold
                    && partition.strategy == RecoveryStrategy::Automatic
                {
                    tracing::warn!(
                        partition = %partition.id,
                        "automatic partition recovery exhausted, escalating to manual"
                    );
                    partition.strategy = RecoveryStrategy::Manual;
                    let fault_id = self
                        .faults
                        .iter()
                        .rev()
                        .find(|f| f.kind == FaultKind::NetworkPartition && f.is_open())
                        .map(|f| f.id.clone())
                        .unwrap_or_default();
                    return vec![FaultAction::FlagForReview { fault_id }];
                }
            }
            None => {
                tracing::warn!(
                    island = ?island,
                    complete,
                    "network partition detected"
                );
                let strategy = if via.is_some() {
                    RecoveryStrategy::Hybrid
                } else {
                    RecoveryStrategy::Automatic
                };
                self.partitions
                    .push(PartitionRecord::new(island.clone(), complete, strategy));
                self.faults.push(FaultRecord::new(
                    FaultKind::NetworkPartition,
                    island,
                    RecoveryAction::Reroute { via: via.clone() },
                ));
            }
        }

        match via {
            // A live peer still sees the far side: route through it.
            Some(via) => vec![FaultAction::Reroute {
                peer: trigger,
                via: Some(via),
            }],
            // No path: keep retrying the direct connection.
            None => vec![FaultAction::Reconnect {
                peer: trigger,
                delay: self.config.reconnect_base_delay,
                attempt: 1,
            }],
        }
    }

    fn on_recovered(&mut self, peer: NodeId) -> Vec<FaultAction> {
        self.unreachable.remove(&peer);
        self.reconnect.remove(&peer);
        self.degradation_counts.remove(&peer);

        if let Some(fault_id) = self.open_failures.remove(&peer) {
            self.resolve(&fault_id, RecoveryOutcome::Resolved);
        }
        for partition in self.partitions.iter_mut().filter(|p| !p.is_healed()) {
            partition.affected.retain(|m| *m != peer);
            if partition.affected.is_empty() {
                tracing::info!(partition = %partition.id, "partition healed");
                partition.healed_at = Some(chrono::Utc::now());
            }
        }
        // Heal the matching partition fault records too.
        let healed_ids: Vec<String> = self
            .faults
            .iter()
            .filter(|f| {
                f.kind == FaultKind::NetworkPartition
                    && f.is_open()
                    && f.affected.iter().all(|m| !self.unreachable.contains(m))
            })
            .map(|f| f.id.clone())
            .collect();
        for id in healed_ids {
            self.resolve(&id, RecoveryOutcome::Resolved);
        }
        Vec::new()
    }

    fn on_invalid(&mut self, peer: NodeId, reason: &str) -> Vec<FaultAction> {
        if self.isolated.contains(&peer) {
            return Vec::new();
        }
        let count = self.invalid_counts.entry(peer.clone()).or_insert(0);
        *count += 1;
        tracing::warn!(peer = %peer, reason, count = *count, "invalid message observed");
        if *count < self.config.byzantine_threshold {
            return Vec::new();
        }
        tracing::warn!(peer = %peer, "byzantine behavior: isolating and flagging for review");
        let mut actions = self.isolate(peer, FaultKind::ByzantineBehavior);
        let fault_id = self
            .faults
            .last()
            .map(|f| f.id.clone())
            .unwrap_or_default();
        actions.push(FaultAction::FlagForReview { fault_id });
        actions
    }

    fn on_consensus_abort(
        &mut self,
        epoch: u64,
        suspect: Option<NodeId>,
        reason: &str,
    ) -> Vec<FaultAction> {
        tracing::debug!(epoch, reason, "consensus round aborted");
        let Some(leader) = suspect else {
            return Vec::new();
        };
        let count = self.leader_failures.entry(leader.clone()).or_insert(0);
        *count += 1;
        if *count < self.config.degradation_threshold {
            return Vec::new();
        }
        self.leader_failures.remove(&leader);
        tracing::warn!(peer = %leader, "repeated round failures as leader, rerouting");
        self.faults.push(FaultRecord::new(
            FaultKind::PerformanceDegradation,
            vec![leader.clone()],
            RecoveryAction::Reroute { via: None },
        ));
        vec![FaultAction::Reroute {
            peer: leader,
            via: None,
        }]
    }

    fn on_latency(&mut self, peer: NodeId, latency_ms: u32) -> Vec<FaultAction> {
        if latency_ms < self.config.latency_degraded_ms {
            self.degradation_counts.remove(&peer);
            return Vec::new();
        }
        let count = self.degradation_counts.entry(peer.clone()).or_insert(0);
        *count += 1;
        if *count < self.config.degradation_threshold {
            return Vec::new();
        }
        self.degradation_counts.remove(&peer);
        tracing::warn!(peer = %peer, latency_ms, "sustained degradation, rerouting");
        let via = self.alternate_route_to(&peer);
        self.faults.push(FaultRecord::new(
            FaultKind::PerformanceDegradation,
            vec![peer.clone()],
            RecoveryAction::Reroute { via: via.clone() },
        ));
        vec![FaultAction::Reroute { peer, via }]
    }

    fn isolate(&mut self, peer: NodeId, kind: FaultKind) -> Vec<FaultAction> {
        self.isolated.insert(peer.clone());
        self.unreachable.remove(&peer);
        self.reconnect.remove(&peer);
        if let Some(fault_id) = self.open_failures.remove(&peer) {
            self.resolve(&fault_id, RecoveryOutcome::Failed);
        }
        let mut record = FaultRecord::new(kind, vec![peer.clone()], RecoveryAction::Isolate);
        record.severity = Severity::High;
        self.faults.push(record);
        vec![FaultAction::Isolate { peer }]
    }

    /// Record the outcome of an executed recovery. Failure escalates the
    /// record's severity.
    pub fn record_outcome(&mut self, fault_id: &str, success: bool) {
        let outcome = if success {
            RecoveryOutcome::Resolved
        } else {
            RecoveryOutcome::Failed
        };
        self.resolve(fault_id, outcome);
    }

    fn resolve(&mut self, fault_id: &str, outcome: RecoveryOutcome) {
        if let Some(record) = self.faults.iter_mut().find(|f| f.id == fault_id) {
            if outcome == RecoveryOutcome::Failed {
                record.severity = record.severity.escalated();
            }
            record.resolution = Some(FaultResolution {
                resolved_at: chrono::Utc::now(),
                outcome,
            });
        }
    }

    /// Unreachable peers corroborated as mutually reachable by gossip.
    fn corroborated_island(&self) -> Vec<NodeId> {
        let mut island: Vec<NodeId> = self
            .unreachable
            .iter()
            .filter(|peer| {
                self.unreachable.iter().any(|other| {
                    *other != **peer
                        && (self
                            .reports
                            .get(other)
                            .is_some_and(|r| r.contains(*peer))
                            || self
                                .reports
                                .get(*peer)
                                .is_some_and(|r| r.contains(other)))
                })
            })
            .cloned()
            .collect();
        island.sort();
        island
    }

    /// A reachable peer that reports seeing `target`, if any.
    fn alternate_route_to(&self, target: &NodeId) -> Option<NodeId> {
        self.reports
            .iter()
            .filter(|(reporter, _)| {
                !self.unreachable.contains(*reporter)
                    && !self.isolated.contains(*reporter)
                    && **reporter != self.local
            })
            .find(|(_, reachable)| reachable.contains(target))
            .map(|(reporter, _)| reporter.clone())
    }

    pub fn is_isolated(&self, peer: &NodeId) -> bool {
        self.isolated.contains(peer)
    }

    /// Complete audit trail, resolved records included.
    pub fn faults(&self) -> &[FaultRecord] {
        &self.faults
    }

    pub fn open_faults(&self) -> impl Iterator<Item = &FaultRecord> {
        self.faults.iter().filter(|f| f.is_open())
    }

    pub fn partitions(&self) -> &[PartitionRecord] {
        &self.partitions
    }
}
