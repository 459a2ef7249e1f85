//! amp-node: run a mesh coordinator.
//!
//! Without a deployed signaling network this binary runs a loopback
//! mesh over the in-process transport: the local node plus a few demo
//! peers that heartbeat, reach consensus, and report health.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use amp_node::{MeshEvent, MeshNode, NodeConfig};
use amp_protocol::{AgentDescriptor, NodeId, NullSigner};
use amp_transport::MemoryHub;

#[derive(Parser, Debug)]
#[command(name = "amp-node", about = "Agent Mesh Protocol coordinator node")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter (tracing env-filter syntax).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of loopback demo peers to run alongside the local node.
    #[arg(long, default_value_t = 2)]
    demo_peers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NodeConfig::default(),
    };

    // Loopback mesh: every participant is a validator and bootstraps off
    // the local node.
    let hub = MemoryHub::new();
    let local_id = NodeId::new(format!("did:mesh:{}", config.node.name));
    let peer_ids: Vec<NodeId> = (0..args.demo_peers)
        .map(|i| NodeId::new(format!("did:mesh:demo-{i}")))
        .collect();

    let mut validators: Vec<String> = peer_ids.iter().map(|p| p.to_string()).collect();
    validators.push(local_id.to_string());
    config.consensus.validators = validators;

    let mut nodes = Vec::new();
    let (local_node, mut events) = spawn_node(&hub, local_id.clone(), config.clone())?;
    for peer_id in &peer_ids {
        let mut peer_config = config.clone();
        peer_config.node.name = peer_id.to_string();
        peer_config.network.bootstrap_peers = vec![local_id.to_string()];
        let (node, peer_events) = spawn_node(&hub, peer_id.clone(), peer_config)?;
        drop(peer_events);
        nodes.push(node);
    }

    // Publish a local agent and ask the mesh where to place another one.
    local_node
        .register_local_agent(AgentDescriptor::new(
            "coordinator",
            vec!["orchestration".to_string()],
        ))
        .await;
    local_node
        .coordinate_agent_spawn(
            serde_json::json!({"name": "worker", "capabilities": ["compute"]}),
            None,
        )
        .await?;

    tracing::info!(node = %local_id, peers = args.demo_peers, "mesh running; ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(MeshEvent::ConsensusReached(outcome)) => {
                    tracing::info!(?outcome, "consensus reached");
                }
                Some(MeshEvent::NetworkHealthChanged { score }) => {
                    tracing::info!(score, "network health changed");
                }
                Some(event) => tracing::debug!(?event, "mesh event"),
                None => break,
            },
        }
    }

    let stats = local_node.get_network_stats().await;
    tracing::info!(
        peers = stats.peer_count,
        sent = stats.messages_sent,
        received = stats.messages_received,
        health = stats.health_score,
        uptime_secs = stats.uptime_secs,
        "final stats"
    );

    for node in &nodes {
        node.shutdown().await;
    }
    local_node.shutdown().await;
    Ok(())
}

fn spawn_node(
    hub: &MemoryHub,
    id: NodeId,
    config: NodeConfig,
) -> anyhow::Result<(
    Arc<MeshNode>,
    tokio::sync::mpsc::UnboundedReceiver<MeshEvent>,
)> {
    let (endpoint, signal_rx) = hub.endpoint(id.clone());
    let endpoint = Arc::new(endpoint);
    let (node, events) = MeshNode::new(
        id,
        config,
        endpoint.clone(),
        endpoint,
        signal_rx,
        Arc::new(NullSigner),
    )?;
    node.start()?;
    Ok((node, events))
}
