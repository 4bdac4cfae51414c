//! Payload and header heuristics, one per protocol, and the module that
//! applies them in order.

mod dns;
mod ftp;
mod http;
mod icmp;
mod jabber;
mod mqtt;
mod netbios;
pub mod port;
mod rdp;
mod rpc;
mod smb;
mod smtp;
mod ssh;
mod ssl;

pub use dns::DnsClassifier;
pub use ftp::FtpClassifier;
pub use http::HttpClassifier;
pub use icmp::IcmpClassifier;
pub use jabber::JabberClassifier;
pub use mqtt::MqttClassifier;
pub use netbios::NetBiosClassifier;
pub use port::PortClassifier;
pub use rdp::RdpClassifier;
pub use rpc::RpcClassifier;
pub use smb::SmbClassifier;
pub use smtp::SmtpClassifier;
pub use ssh::SshClassifier;
pub use ssl::SslClassifier;

use crate::error::ModuleError;
use crate::flow::Flow;
use crate::module::Module;
use crate::packet::{NetworkLayer, Packet, TransportKind, TransportLayer};
use crate::protocol::{ClassificationResult, ClassificationSource, Protocol};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Source reported for heuristic classifications.
pub const HEURISTICS_SOURCE: ClassificationSource = ClassificationSource::from_static("flowdpi");

/// A stateless test for one protocol.
pub trait HeuristicClassifier: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Whether the flow's packets look like this protocol. Malformed input
    /// is a non-match.
    fn detects(&self, flow: &Flow) -> bool;
}

/// Applies `check` to the transport layer of every packet of the given kind,
/// returning on the first success.
pub(crate) fn check_flow_layer<F>(packets: &[Arc<Packet>], kind: TransportKind, check: F) -> bool
where
    F: Fn(&TransportLayer) -> bool,
{
    packets
        .iter()
        .filter_map(|packet| packet.transport_of(kind))
        .any(check)
}

pub(crate) fn check_network_layer<F>(packets: &[Arc<Packet>], check: F) -> bool
where
    F: Fn(&NetworkLayer) -> bool,
{
    packets
        .iter()
        .filter_map(|packet| packet.network.as_ref())
        .any(check)
}

/// Finds the first packet of the given kind with a non-empty payload and
/// returns `check(payload, packets_after_it)`, or false if there is none.
pub(crate) fn check_first_payload<F>(packets: &[Arc<Packet>], kind: TransportKind, check: F) -> bool
where
    F: FnOnce(&[u8], &[Arc<Packet>]) -> bool,
{
    packets
        .iter()
        .enumerate()
        .find_map(|(i, packet)| {
            packet
                .transport_of(kind)
                .filter(|layer| !layer.payload.is_empty())
                .map(|layer| (i, layer))
        })
        .is_some_and(|(i, layer)| check(&layer.payload, &packets[i + 1..]))
}

pub(crate) fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

pub(crate) fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let b = bytes.get(at..at + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

pub(crate) fn be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// The default classifier list, in dispatch order.
pub fn default_classifiers() -> Vec<Arc<dyn HeuristicClassifier>> {
    vec![
        Arc::new(FtpClassifier),
        Arc::new(HttpClassifier),
        Arc::new(IcmpClassifier),
        Arc::new(NetBiosClassifier),
        Arc::new(DnsClassifier),
        Arc::new(RdpClassifier),
        Arc::new(RpcClassifier),
        Arc::new(SmbClassifier),
        Arc::new(SmtpClassifier),
        Arc::new(SshClassifier),
        Arc::new(SslClassifier),
    ]
}

/// Module that runs heuristic classifiers in order and stops at the first match.
pub struct ClassifierModule {
    classifiers: RwLock<Vec<Arc<dyn HeuristicClassifier>>>,
}

impl Default for ClassifierModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassifierModule {
    pub fn new() -> Self {
        Self::with_classifiers(default_classifiers())
    }

    pub fn with_classifiers(classifiers: Vec<Arc<dyn HeuristicClassifier>>) -> Self {
        Self {
            classifiers: RwLock::new(classifiers),
        }
    }

    /// Replaces the active classifiers. Call before `initialize`, or destroy
    /// and re-initialize the module afterwards.
    pub fn configure(&self, classifiers: Vec<Arc<dyn HeuristicClassifier>>) {
        *self.classifiers.write() = classifiers;
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.classifiers.read().iter().map(|c| c.protocol()).collect()
    }
}

impl Module for ClassifierModule {
    fn name(&self) -> ClassificationSource {
        HEURISTICS_SOURCE
    }

    fn initialize(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    fn destroy(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    fn classify(&self, flow: &Flow) -> ClassificationResult {
        let classifiers = self.classifiers.read().clone();
        for classifier in classifiers {
            if classifier.detects(flow) {
                let protocol = classifier.protocol();
                debug!(%protocol, "Heuristic match");
                flow.set_classification_result(protocol, HEURISTICS_SOURCE);
                return ClassificationResult::new(protocol, HEURISTICS_SOURCE);
            }
        }
        ClassificationResult::unknown()
    }
}
