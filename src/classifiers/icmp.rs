use super::{check_network_layer, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::{NetworkLayer, IP_PROTOCOL_ICMPV4, IP_PROTOCOL_ICMPV6};
use crate::protocol::Protocol;

/// Detects flows carrying ICMPv4 or ICMPv6.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpClassifier;

impl HeuristicClassifier for IcmpClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Icmp
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_network_layer(&flow.packets(), |network| match network {
            NetworkLayer::Ipv4 { protocol, .. } => *protocol == IP_PROTOCOL_ICMPV4,
            NetworkLayer::Ipv6 { next_header, .. } => *next_header == IP_PROTOCOL_ICMPV6,
        })
    }
}
