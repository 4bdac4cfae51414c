use super::{be_u16, check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::{NetworkLayer, TransportKind};
use crate::protocol::Protocol;

const SESSION_REQUEST: u8 = 0x81;
const ONE_QUESTION: [u8; 8] = [0, 1, 0, 0, 0, 0, 0, 0];
const NAME_QUERY_LEN: usize = 50;

/// Detects NetBIOS session requests over TCP and name queries over UDP.
///
/// Whether a UDP query must look like a broadcast or a node-status query is
/// decided by the destination of the flow's first packet only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetBiosClassifier;

fn is_session_request(payload: &[u8]) -> bool {
    if payload.len() < 8 {
        return false;
    }
    let Some(len) = be_u16(payload, 2) else {
        return false;
    };
    let names: Vec<&[u8]> = payload[4..].split(|b| *b == 0).collect();
    let names_padded = names.len() == 3
        && names[0].first() == Some(&b' ')
        && names[1].first() == Some(&b' ');
    usize::from(len) + 4 == payload.len()
        && payload[0] == SESSION_REQUEST
        && payload[1] == 0
        && names_padded
}

fn is_name_query(payload: &[u8], first_packet_broadcast: bool) -> bool {
    if payload.len() != NAME_QUERY_LEN || payload[4..12] != ONE_QUESTION {
        return false;
    }
    if first_packet_broadcast {
        payload[2] == 1 && payload[3] == 0x10
    } else {
        payload[2] == 0 && payload[3] == 0
    }
}

impl HeuristicClassifier for NetBiosClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::NetBios
    }

    fn detects(&self, flow: &Flow) -> bool {
        let packets = flow.packets();
        let first_packet_broadcast = packets
            .first()
            .and_then(|packet| match packet.network {
                Some(NetworkLayer::Ipv4 { dst, .. }) => Some(dst.octets()[3] == 0xFF),
                _ => None,
            })
            .unwrap_or(false);

        check_first_payload(&packets, TransportKind::Tcp, |payload, _| {
            is_session_request(payload)
        }) || check_first_payload(&packets, TransportKind::Udp, |payload, _| {
            is_name_query(payload, first_packet_broadcast)
        })
    }
}
