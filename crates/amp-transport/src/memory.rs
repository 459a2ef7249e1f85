//! In-process transport: signaling and data channels over tokio mpsc.
//!
//! Every node registers an endpoint against a shared hub. Channel wires
//! are cross-connected pairs of unbounded channels; the two ends share an
//! open flag, so closing either side closes the wire. Used by tests and
//! loopback/demo nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use amp_protocol::NodeId;
use tokio::sync::mpsc;

use crate::channel::{ChannelOpener, PeerChannel};
use crate::error::TransportError;
use crate::signaling::{SignalMessage, Signaling};

/// Shared in-process hub connecting memory endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    signals: HashMap<NodeId, mpsc::UnboundedSender<(NodeId, SignalMessage)>>,
    /// Half-built wires keyed by session id; the first `open` for a
    /// session creates both ends, the second picks up the counterpart.
    pending_wires: HashMap<String, PendingWire>,
}

struct PendingWire {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    open: Arc<AtomicBool>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node on the hub. Returns its endpoint (outbound
    /// signaling + channel opener) and the inbound signal stream.
    pub fn endpoint(
        &self,
        node: NodeId,
    ) -> (
        MemoryEndpoint,
        mpsc::UnboundedReceiver<(NodeId, SignalMessage)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .expect("hub lock poisoned")
            .signals
            .insert(node.clone(), tx);
        (
            MemoryEndpoint {
                node,
                inner: self.inner.clone(),
            },
            rx,
        )
    }
}

/// One node's attachment to a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryEndpoint {
    node: NodeId,
    inner: Arc<Mutex<HubInner>>,
}

impl Signaling for MemoryEndpoint {
    fn send(&self, to: &NodeId, signal: SignalMessage) -> Result<(), TransportError> {
        let inner = self.inner.lock().expect("hub lock poisoned");
        let tx = inner
            .signals
            .get(to)
            .ok_or_else(|| TransportError::Signaling(format!("unknown peer {to}")))?;
        tx.send((self.node.clone(), signal))
            .map_err(|_| TransportError::Signaling(format!("peer {to} is gone")))
    }
}

impl ChannelOpener for MemoryEndpoint {
    fn open(
        &self,
        _peer: &NodeId,
        session: &str,
    ) -> Result<(Box<dyn PeerChannel>, mpsc::UnboundedReceiver<Vec<u8>>), TransportError> {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let Some(wire) = inner.pending_wires.remove(session) {
            return Ok((
                Box::new(MemoryChannel {
                    tx: wire.tx,
                    open: wire.open,
                }),
                wire.rx,
            ));
        }
        let (here_tx, here_rx) = mpsc::unbounded_channel();
        let (there_tx, there_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        inner.pending_wires.insert(
            session.to_string(),
            PendingWire {
                tx: there_tx,
                rx: here_rx,
                open: open.clone(),
            },
        );
        Ok((Box::new(MemoryChannel { tx: here_tx, open }), there_rx))
    }
}

/// One end of an in-memory wire.
struct MemoryChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    open: Arc<AtomicBool>,
}

impl PeerChannel for MemoryChannel {
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Channel("channel closed".into()));
        }
        self.tx.send(bytes).map_err(|_| {
            self.open.store(false, Ordering::SeqCst);
            TransportError::Channel("peer hung up".into())
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_is_cross_connected() {
        let hub = MemoryHub::new();
        let (a, _a_signals) = hub.endpoint(NodeId::new("a"));
        let (b, _b_signals) = hub.endpoint(NodeId::new("b"));

        let (a_chan, mut a_rx) = a.open(&NodeId::new("b"), "s1").unwrap();
        let (b_chan, mut b_rx) = b.open(&NodeId::new("a"), "s1").unwrap();

        a_chan.send(b"from a".to_vec()).unwrap();
        b_chan.send(b"from b".to_vec()).unwrap();

        assert_eq!(b_rx.try_recv().unwrap(), b"from a".to_vec());
        assert_eq!(a_rx.try_recv().unwrap(), b"from b".to_vec());
    }

    #[test]
    fn test_closing_either_end_closes_the_wire() {
        let hub = MemoryHub::new();
        let (a, _a_signals) = hub.endpoint(NodeId::new("a"));
        let (b, _b_signals) = hub.endpoint(NodeId::new("b"));

        let (a_chan, _a_rx) = a.open(&NodeId::new("b"), "s1").unwrap();
        let (b_chan, _b_rx) = b.open(&NodeId::new("a"), "s1").unwrap();

        b_chan.close();
        assert!(!a_chan.is_open());
        assert!(a_chan.send(b"too late".to_vec()).is_err());
    }

    #[test]
    fn test_signaling_reaches_registered_peer() {
        let hub = MemoryHub::new();
        let (a, _a_signals) = hub.endpoint(NodeId::new("a"));
        let (_b, mut b_signals) = hub.endpoint(NodeId::new("b"));

        a.send(
            &NodeId::new("b"),
            SignalMessage::Offer {
                session: "s1".into(),
                protocols: vec!["amp/1".into()],
            },
        )
        .unwrap();

        let (from, signal) = b_signals.try_recv().unwrap();
        assert_eq!(from, NodeId::new("a"));
        assert_eq!(signal.session(), "s1");
    }

    #[test]
    fn test_unknown_peer_is_a_signaling_error() {
        let hub = MemoryHub::new();
        let (a, _a_signals) = hub.endpoint(NodeId::new("a"));
        let result = a.send(
            &NodeId::new("ghost"),
            SignalMessage::IceCandidate {
                session: "s1".into(),
                candidate: "memory/0".into(),
            },
        );
        assert!(matches!(result, Err(TransportError::Signaling(_))));
    }
}
