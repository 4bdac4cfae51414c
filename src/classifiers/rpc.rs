use super::{check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

/// DCE/RPC v5.0 bind request, packed little-endian.
const BIND_HEADER: [u8; 8] = [5, 0, 11, 3, 16, 0, 0, 0];

/// Detects a DCE/RPC bind request whose fragment length equals the payload length.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcClassifier;

fn is_bind_request(payload: &[u8]) -> bool {
    payload.len() >= 24
        && payload.starts_with(&BIND_HEADER)
        && usize::from(u16::from_le_bytes([payload[8], payload[9]])) == payload.len()
}

impl HeuristicClassifier for RpcClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Rpc
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Tcp, |payload, _| {
            is_bind_request(payload)
        })
    }
}
