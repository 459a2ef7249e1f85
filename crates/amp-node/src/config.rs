//! Node configuration, loaded from TOML. Invalid configuration is fatal
//! at startup — the node refuses to join the network rather than limp.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::NodeError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub consensus: ConsensusSection,
    #[serde(default)]
    pub fault: FaultSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Human-readable node name.
    pub name: String,
    /// Identity key file; created on first start when missing.
    pub key_file: Option<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: "amp-node".to_string(),
            key_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Addresses this node announces for inbound signaling.
    pub listen_addrs: Vec<String>,
    /// Node ids dialed at startup to join the mesh.
    pub bootstrap_peers: Vec<String>,
    pub max_connections: usize,
    pub connect_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Relay budget stamped on outbound broadcasts.
    pub message_ttl: u32,
    pub require_signatures: bool,
    pub encryption_enabled: bool,
    pub compression_enabled: bool,
    /// When non-empty, only these peers may connect.
    pub trusted_peers: Vec<String>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addrs: vec!["/mem/local".to_string()],
            bootstrap_peers: Vec::new(),
            max_connections: 64,
            connect_timeout_secs: 10,
            heartbeat_interval_secs: 5,
            message_ttl: amp_protocol::DEFAULT_TTL,
            require_signatures: false,
            encryption_enabled: false,
            compression_enabled: false,
            trusted_peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSection {
    pub enabled: bool,
    /// "raft" (default rotation) or "pbft".
    pub algorithm: String,
    pub bft_ratio: f64,
    pub epoch_timeout_secs: u64,
    pub leader_proposal_timeout_secs: u64,
    /// Validator node ids. The local node is added automatically.
    pub validators: Vec<String>,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: "raft".to_string(),
            bft_ratio: 2.0 / 3.0,
            epoch_timeout_secs: 30,
            leader_proposal_timeout_secs: 10,
            validators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultSection {
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_ceiling: u32,
    pub byzantine_threshold: u32,
    pub degradation_threshold: u32,
    pub latency_degraded_ms: u32,
    pub manual_escalation_threshold: u32,
}

impl Default for FaultSection {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
            reconnect_ceiling: 5,
            byzantine_threshold: 3,
            degradation_threshold: 3,
            latency_degraded_ms: 500,
            manual_escalation_threshold: 3,
        }
    }
}

impl NodeConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let raw = std::fs::read_to_string(path)?;
        let config: NodeConfig =
            toml::from_str(&raw).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the node cannot safely run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.network.max_connections == 0 {
            return Err(NodeError::Config("max_connections must be >= 1".into()));
        }
        if self.network.connect_timeout_secs == 0 {
            return Err(NodeError::Config("connect_timeout_secs must be > 0".into()));
        }
        if self.network.heartbeat_interval_secs == 0 {
            return Err(NodeError::Config(
                "heartbeat_interval_secs must be > 0".into(),
            ));
        }
        if self.network.message_ttl == 0 {
            return Err(NodeError::Config("message_ttl must be >= 1".into()));
        }
        if self.consensus.enabled {
            if !(self.consensus.bft_ratio > 0.5 && self.consensus.bft_ratio <= 1.0) {
                return Err(NodeError::Config(format!(
                    "bft_ratio {} must be in (0.5, 1.0]",
                    self.consensus.bft_ratio
                )));
            }
            amp_consensus::algorithm_by_name(&self.consensus.algorithm)
                .map_err(|e| NodeError::Config(e.to_string()))?;
            if self.consensus.epoch_timeout_secs == 0 {
                return Err(NodeError::Config("epoch_timeout_secs must be > 0".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_connections_is_fatal() {
        let mut config = NodeConfig::default();
        config.network.max_connections = 0;
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_bad_bft_ratio_is_fatal() {
        let mut config = NodeConfig::default();
        config.consensus.bft_ratio = 0.4;
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_unknown_algorithm_is_fatal() {
        let mut config = NodeConfig::default();
        config.consensus.algorithm = "gospel".to_string();
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_disabled_consensus_skips_algorithm_check() {
        let mut config = NodeConfig::default();
        config.consensus.enabled = false;
        config.consensus.algorithm = "gospel".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            r#"
[node]
name = "test-node"

[network]
heartbeat_interval_secs = 2
bootstrap_peers = ["did:mesh:abc"]

[consensus]
enabled = true
algorithm = "raft"
"#,
        )
        .unwrap();
        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.node.name, "test-node");
        assert_eq!(config.network.heartbeat_interval_secs, 2);
        assert_eq!(config.network.bootstrap_peers, vec!["did:mesh:abc"]);
    }

    #[test]
    fn test_malformed_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[network\nmax_connections = ").unwrap();
        assert!(matches!(
            NodeConfig::load(&path),
            Err(NodeError::Config(_))
        ));
    }
}
