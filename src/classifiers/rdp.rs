use super::{be_u16, check_first_payload, contains_subslice, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

const COTP_CONNECTION_REQUEST: u8 = 0xE0;

/// Detects an RDP connection request: TPKT, COTP CR and a `mstshash=` or
/// `msts=` cookie.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdpClassifier;

fn is_connection_request(payload: &[u8]) -> bool {
    if payload.len() < 20 {
        return false;
    }
    let is_tpkt = payload[0] == 3
        && payload[1] == 0
        && be_u16(payload, 2).is_some_and(|len| usize::from(len) == payload.len());
    let is_cotp =
        usize::from(payload[4]) == payload.len() - 5 && payload[5] == COTP_CONNECTION_REQUEST;
    let cookie = &payload[11..];
    let has_cookie =
        contains_subslice(cookie, b"mstshash=") || contains_subslice(cookie, b"msts=");
    is_tpkt && is_cotp && has_cookie
}

impl HeuristicClassifier for RdpClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Rdp
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Tcp, |payload, _| {
            is_connection_request(payload)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::test_support::*;

    fn request(cookie: &[u8]) -> Vec<u8> {
        let total = 11 + cookie.len();
        let mut payload = vec![3, 0];
        payload.extend_from_slice(&(total as u16).to_be_bytes());
        payload.push((total - 5) as u8);
        payload.extend_from_slice(&[0xE0, 0, 0, 0, 0, 0]);
        payload.extend_from_slice(cookie);
        payload
    }

    #[test]
    fn test_connection_request_with_cookie() {
        let payload = request(b"Cookie: mstshash=admin\r\n");
        assert!(RdpClassifier.detects(&tcp_flow(&[&payload])));
        let payload = request(b"Cookie: msts=12345\r\n");
        assert!(RdpClassifier.detects(&tcp_flow(&[&payload])));
    }

    #[test]
    fn test_missing_cookie() {
        let payload = request(b"Cookie: other=admin\r\n");
        assert!(!RdpClassifier.detects(&tcp_flow(&[&payload])));
    }

    #[test]
    fn test_bad_headers() {
        let mut wrong_length = request(b"Cookie: mstshash=a\r\n");
        wrong_length[3] += 1;
        assert!(!RdpClassifier.detects(&tcp_flow(&[&wrong_length])));

        let mut wrong_cotp = request(b"Cookie: mstshash=a\r\n");
        wrong_cotp[5] = 0xD0;
        assert!(!RdpClassifier.detects(&tcp_flow(&[&wrong_cotp])));

        let mut wrong_li = request(b"Cookie: mstshash=a\r\n");
        wrong_li[4] -= 1;
        assert!(!RdpClassifier.detects(&tcp_flow(&[&wrong_li])));
    }

    #[test]
    fn test_too_short() {
        let payload = request(b"msts=");
        assert_eq!(payload.len(), 16);
        assert!(!RdpClassifier.detects(&tcp_flow(&[&payload])));
    }
}
