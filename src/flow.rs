use crate::packet::Packet;
use crate::protocol::{ClassificationResult, ClassificationSource, Protocol};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
struct FlowState {
    packets: Vec<Arc<Packet>>,
    classification: ClassificationResult,
}

/// The packets of one bidirectional conversation and its latest classification.
///
/// Flows are shared as `Arc<Flow>` between the tracker and its callers. Packet
/// appends and result updates take the write lock; snapshots take the read
/// lock only for the copy.
#[derive(Debug, Default)]
pub struct Flow {
    state: RwLock<FlowState>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_packet(packet: Packet) -> Self {
        let flow = Self::new();
        flow.add_packet(packet);
        flow
    }

    pub fn add_packet(&self, packet: impl Into<Arc<Packet>>) {
        self.state.write().packets.push(packet.into());
    }

    /// A copy of the packet sequence in arrival order.
    pub fn packets(&self) -> Vec<Arc<Packet>> {
        self.state.read().packets.clone()
    }

    pub fn packet_count(&self) -> usize {
        self.state.read().packets.len()
    }

    pub fn set_classification_result(&self, protocol: Protocol, source: ClassificationSource) {
        self.state.write().classification = ClassificationResult::new(protocol, source);
    }

    pub fn classification_result(&self) -> ClassificationResult {
        self.state.read().classification.clone()
    }
}
