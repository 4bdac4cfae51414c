//! Port-number fallback, used when payload heuristics are not wanted.
//!
//! Ports say nothing reliable about the payload, so this classifier is not
//! part of the default list. Add it after the payload heuristics with
//! [`ClassifierModule::configure`](super::ClassifierModule::configure).

use super::{check_flow_layer, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

/// The protocol conventionally served on a port, if any.
pub fn well_known_protocol(kind: TransportKind, port: u16) -> Option<Protocol> {
    match (kind, port) {
        (TransportKind::Tcp, 80 | 8080) => Some(Protocol::Http),
        (TransportKind::Tcp, 443 | 8443 | 465 | 993 | 995) => Some(Protocol::Ssl),
        (_, 53) => Some(Protocol::Dns),
        (TransportKind::Tcp, 22) => Some(Protocol::Ssh),
        (TransportKind::Tcp, 135) => Some(Protocol::Rpc),
        (TransportKind::Tcp, 25 | 587) => Some(Protocol::Smtp),
        (TransportKind::Tcp, 3389) => Some(Protocol::Rdp),
        (TransportKind::Tcp, 445) => Some(Protocol::Smb),
        (TransportKind::Tcp, 21) => Some(Protocol::Ftp),
        (TransportKind::Tcp, 139) | (TransportKind::Udp, 137 | 138) => Some(Protocol::NetBios),
        (TransportKind::Tcp, 5222 | 5269) => Some(Protocol::Jabber),
        (TransportKind::Tcp, 1883) => Some(Protocol::Mqtt),
        (_, 6881..=6889) => Some(Protocol::BitTorrent),
        _ => None,
    }
}

/// Matches flows where any packet uses a port conventionally assigned to
/// `protocol`, on either side.
#[derive(Debug, Clone, Copy)]
pub struct PortClassifier {
    protocol: Protocol,
}

impl PortClassifier {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }
}

impl HeuristicClassifier for PortClassifier {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn detects(&self, flow: &Flow) -> bool {
        let packets = flow.packets();
        [TransportKind::Tcp, TransportKind::Udp].into_iter().any(|kind| {
            check_flow_layer(&packets, kind, |layer| {
                [layer.src_port, layer.dst_port]
                    .into_iter()
                    .any(|port| well_known_protocol(kind, port) == Some(self.protocol))
            })
        })
    }
}
