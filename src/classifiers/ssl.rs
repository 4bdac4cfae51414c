use super::{be_u16, check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

const HANDSHAKE_RECORD: u8 = 22;
const CLIENT_HELLO: u8 = 1;

/// Detects a TLS/SSL ClientHello whose record and handshake lengths both
/// match the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct SslClassifier;

fn is_client_hello(payload: &[u8]) -> bool {
    let (Some(record_len), Some(hello_len)) = (be_u16(payload, 3), be_u24(payload, 6)) else {
        return false;
    };
    let is_record = payload[0] == HANDSHAKE_RECORD
        && payload[1] <= 3
        && usize::from(record_len) == payload.len() - 5;
    let is_hello = payload[5] == CLIENT_HELLO && hello_len as usize == payload.len() - 9;
    is_record && is_hello
}

fn be_u24(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 3)?;
    Some(u32::from_be_bytes([0, b[0], b[1], b[2]]))
}

impl HeuristicClassifier for SslClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Ssl
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Tcp, |payload, _| {
            is_client_hello(payload)
        })
    }
}
