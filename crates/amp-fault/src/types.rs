use amp_protocol::NodeId;
use serde::{Deserialize, Serialize};

/// Classified anomaly kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    NodeFailure,
    NetworkPartition,
    ByzantineBehavior,
    PerformanceDegradation,
}

/// Escalates when the same recovery strategy keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn escalated(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// The recovery chosen for a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RecoveryAction {
    Reconnect { attempt: u32, delay_ms: u64 },
    Reroute { via: Option<NodeId> },
    Isolate,
    Restart,
}

/// How a partition is driven back to health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    Automatic,
    Manual,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryOutcome {
    Resolved,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultResolution {
    pub resolved_at: chrono::DateTime<chrono::Utc>,
    pub outcome: RecoveryOutcome,
}

/// One detected fault. Records are resolved, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: String,
    pub kind: FaultKind,
    pub affected: Vec<NodeId>,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    pub severity: Severity,
    pub action: RecoveryAction,
    pub resolution: Option<FaultResolution>,
}

impl FaultRecord {
    pub fn new(kind: FaultKind, affected: Vec<NodeId>, action: RecoveryAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            affected,
            detected_at: chrono::Utc::now(),
            severity: Severity::Low,
            action,
            resolution: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolution.is_none()
    }
}

/// A detected partition, kept for audit with its healing time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub id: String,
    /// Peers on the far side of the split.
    pub affected: Vec<NodeId>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub healed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// True when no path to the far side exists at all.
    pub complete: bool,
    pub strategy: RecoveryStrategy,
    pub retry_attempts: u32,
}

impl PartitionRecord {
    pub fn new(affected: Vec<NodeId>, complete: bool, strategy: RecoveryStrategy) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            affected,
            started_at: chrono::Utc::now(),
            healed_at: None,
            complete,
            strategy,
            retry_attempts: 0,
        }
    }

    pub fn is_healed(&self) -> bool {
        self.healed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_escalation_saturates() {
        assert_eq!(Severity::Low.escalated(), Severity::Medium);
        assert_eq!(Severity::High.escalated(), Severity::Critical);
        assert_eq!(Severity::Critical.escalated(), Severity::Critical);
    }

    #[test]
    fn test_fault_record_starts_open() {
        let record = FaultRecord::new(
            FaultKind::NodeFailure,
            vec![NodeId::new("a")],
            RecoveryAction::Reconnect {
                attempt: 1,
                delay_ms: 1000,
            },
        );
        assert!(record.is_open());
        assert_eq!(record.severity, Severity::Low);
    }
}
