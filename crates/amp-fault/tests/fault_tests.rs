//! Scenario tests for fault classification and recovery selection.

use std::time::Duration;

use amp_fault::{
    FaultAction, FaultConfig, FaultCoordinator, FaultKind, FaultSignal, RecoveryOutcome,
    RecoveryStrategy, Severity,
};
use amp_protocol::NodeId;

fn coordinator() -> FaultCoordinator {
    FaultCoordinator::new(NodeId::new("local"), FaultConfig::default())
}

fn unreachable(peer: &str) -> FaultSignal {
    FaultSignal::PeerUnreachable {
        peer: NodeId::new(peer),
    }
}

fn report(from: &str, reachable: &[&str]) -> FaultSignal {
    FaultSignal::ReachabilityReport {
        from: NodeId::new(from),
        reachable: reachable.iter().map(|r| NodeId::new(*r)).collect(),
    }
}

// ─── Node failure ────────────────────────────────────────────────────────────

#[test]
fn test_single_unreachable_peer_is_node_failure_with_backoff() {
    let mut faults = coordinator();

    let actions = faults.observe(unreachable("c"));
    assert_eq!(
        actions,
        vec![FaultAction::Reconnect {
            peer: NodeId::new("c"),
            delay: Duration::from_secs(1),
            attempt: 1,
        }]
    );

    // Next attempt doubles the delay.
    let actions = faults.observe(unreachable("c"));
    assert_eq!(
        actions,
        vec![FaultAction::Reconnect {
            peer: NodeId::new("c"),
            delay: Duration::from_secs(2),
            attempt: 2,
        }]
    );

    let records = faults.faults();
    assert_eq!(records.len(), 1, "one outage, one record");
    assert_eq!(records[0].kind, FaultKind::NodeFailure);
    assert!(records[0].is_open());
    assert_eq!(records[0].severity, Severity::Medium, "retry escalates");
}

#[test]
fn test_reconnect_ceiling_leads_to_isolation() {
    let mut faults = coordinator();

    for _ in 0..5 {
        let actions = faults.observe(unreachable("c"));
        assert!(matches!(actions[0], FaultAction::Reconnect { .. }));
    }
    let actions = faults.observe(unreachable("c"));
    assert_eq!(
        actions,
        vec![FaultAction::Isolate {
            peer: NodeId::new("c")
        }]
    );
    assert!(faults.is_isolated(&NodeId::new("c")));

    // The exhausted outage is closed as failed; the audit trail keeps it.
    let failed = faults
        .faults()
        .iter()
        .find(|f| f.kind == FaultKind::NodeFailure)
        .unwrap();
    assert_eq!(
        failed.resolution.as_ref().unwrap().outcome,
        RecoveryOutcome::Failed
    );

    // Further signals about an isolated peer are ignored.
    assert!(faults.observe(unreachable("c")).is_empty());
}

#[test]
fn test_recovery_resolves_the_open_fault() {
    let mut faults = coordinator();
    faults.observe(unreachable("c"));
    faults.observe(FaultSignal::PeerRecovered {
        peer: NodeId::new("c"),
    });

    let records = faults.faults();
    assert_eq!(records.len(), 1, "resolved records are kept, not deleted");
    assert_eq!(
        records[0].resolution.as_ref().unwrap().outcome,
        RecoveryOutcome::Resolved
    );

    // A later outage starts a fresh record with a fresh backoff.
    let actions = faults.observe(unreachable("c"));
    assert_eq!(
        actions,
        vec![FaultAction::Reconnect {
            peer: NodeId::new("c"),
            delay: Duration::from_secs(1),
            attempt: 1,
        }]
    );
    assert_eq!(faults.faults().len(), 2);
}

// ─── Partition ───────────────────────────────────────────────────────────────

#[test]
fn test_mutually_reachable_unreachable_peers_are_a_complete_partition() {
    let mut faults = coordinator();
    faults.observe(report("x", &["y"]));
    faults.observe(report("y", &["x"]));

    faults.observe(unreachable("x"));
    let actions = faults.observe(unreachable("y"));

    let partitions = faults.partitions();
    assert_eq!(partitions.len(), 1);
    assert!(partitions[0].complete, "no alternate path at all");
    assert_eq!(partitions[0].strategy, RecoveryStrategy::Automatic);
    assert!(!partitions[0].is_healed());

    // No route: the partition retries the direct connection.
    assert!(matches!(actions[0], FaultAction::Reconnect { .. }));
    assert!(faults
        .faults()
        .iter()
        .any(|f| f.kind == FaultKind::NetworkPartition));
}

#[test]
fn test_partial_partition_reroutes_through_alternate() {
    let mut faults = coordinator();
    faults.observe(report("x", &["y"]));
    faults.observe(report("y", &["x"]));
    // z is still reachable and sees y.
    faults.observe(report("z", &["y"]));

    faults.observe(unreachable("x"));
    let actions = faults.observe(unreachable("y"));

    assert_eq!(
        actions,
        vec![FaultAction::Reroute {
            peer: NodeId::new("y"),
            via: Some(NodeId::new("z")),
        }]
    );
    let partitions = faults.partitions();
    assert!(!partitions[0].complete);
    assert_eq!(partitions[0].strategy, RecoveryStrategy::Hybrid);
}

#[test]
fn test_partition_heals_when_members_recover() {
    let mut faults = coordinator();
    faults.observe(report("x", &["y"]));
    faults.observe(report("y", &["x"]));
    faults.observe(unreachable("x"));
    faults.observe(unreachable("y"));

    faults.observe(FaultSignal::PeerRecovered {
        peer: NodeId::new("x"),
    });
    assert!(!faults.partitions()[0].is_healed());

    faults.observe(FaultSignal::PeerRecovered {
        peer: NodeId::new("y"),
    });
    assert!(faults.partitions()[0].is_healed());
    assert!(faults
        .faults()
        .iter()
        .filter(|f| f.kind == FaultKind::NetworkPartition)
        .all(|f| !f.is_open()));
}

#[test]
fn test_exhausted_automatic_recovery_escalates_to_manual() {
    let mut faults = coordinator();
    faults.observe(report("x", &["y"]));
    faults.observe(report("y", &["x"]));
    faults.observe(unreachable("x"));
    faults.observe(unreachable("y"));

    // Three more failed retries on the open partition.
    faults.observe(unreachable("y"));
    faults.observe(unreachable("y"));
    let actions = faults.observe(unreachable("y"));

    assert!(matches!(actions[0], FaultAction::FlagForReview { .. }));
    assert_eq!(faults.partitions()[0].strategy, RecoveryStrategy::Manual);
}

// ─── Byzantine behavior ──────────────────────────────────────────────────────

#[test]
fn test_repeated_invalid_messages_isolate_the_peer() {
    let mut faults = coordinator();
    for _ in 0..2 {
        let actions = faults.observe(FaultSignal::InvalidMessage {
            peer: NodeId::new("evil"),
            reason: "bad signature".into(),
        });
        assert!(actions.is_empty(), "below threshold nothing happens");
    }

    let actions = faults.observe(FaultSignal::InvalidMessage {
        peer: NodeId::new("evil"),
        reason: "bad signature".into(),
    });
    assert!(matches!(actions[0], FaultAction::Isolate { .. }));
    assert!(matches!(actions[1], FaultAction::FlagForReview { .. }));
    assert!(faults.is_isolated(&NodeId::new("evil")));

    let record = faults
        .faults()
        .iter()
        .find(|f| f.kind == FaultKind::ByzantineBehavior)
        .unwrap();
    assert_eq!(record.severity, Severity::High);
}

// ─── Performance degradation ─────────────────────────────────────────────────

#[test]
fn test_sustained_latency_degradation_reroutes() {
    let mut faults = coordinator();
    for _ in 0..2 {
        assert!(faults
            .observe(FaultSignal::LatencySample {
                peer: NodeId::new("slow"),
                latency_ms: 800,
            })
            .is_empty());
    }
    let actions = faults.observe(FaultSignal::LatencySample {
        peer: NodeId::new("slow"),
        latency_ms: 900,
    });
    assert_eq!(
        actions,
        vec![FaultAction::Reroute {
            peer: NodeId::new("slow"),
            via: None,
        }]
    );
    assert!(faults
        .faults()
        .iter()
        .any(|f| f.kind == FaultKind::PerformanceDegradation));
}

#[test]
fn test_healthy_sample_resets_degradation_count() {
    let mut faults = coordinator();
    for _ in 0..2 {
        faults.observe(FaultSignal::LatencySample {
            peer: NodeId::new("slow"),
            latency_ms: 800,
        });
    }
    // Back under the threshold: the streak restarts.
    faults.observe(FaultSignal::LatencySample {
        peer: NodeId::new("slow"),
        latency_ms: 50,
    });
    let actions = faults.observe(FaultSignal::LatencySample {
        peer: NodeId::new("slow"),
        latency_ms: 800,
    });
    assert!(actions.is_empty());
}

#[test]
fn test_repeated_leader_failures_reroute() {
    let mut faults = coordinator();
    for epoch in 1..=2 {
        assert!(faults
            .observe(FaultSignal::ConsensusAborted {
                epoch,
                suspect: Some(NodeId::new("leader")),
                reason: "leader silent".into(),
            })
            .is_empty());
    }
    let actions = faults.observe(FaultSignal::ConsensusAborted {
        epoch: 3,
        suspect: Some(NodeId::new("leader")),
        reason: "leader silent".into(),
    });
    assert_eq!(
        actions,
        vec![FaultAction::Reroute {
            peer: NodeId::new("leader"),
            via: None,
        }]
    );
}
