use super::{be_u32, check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

const SMB_MAGIC: &[u8] = b"\xFFSMB";
const NEGOTIATE_PROTOCOL: u8 = 0x72;
const FLAG_REPLY: u8 = 0x80;

/// Detects an SMB1 negotiate-protocol request, with or without a NetBIOS
/// session header in front.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmbClassifier;

/// Drops a 4-byte NetBIOS session header when its length covers the rest.
fn strip_session_header(payload: &[u8]) -> &[u8] {
    if payload.len() > 4 && payload[0] == 0 {
        if let Some(len) = be_u32(payload, 0) {
            if len as usize == payload.len() - 4 {
                return &payload[4..];
            }
        }
    }
    payload
}

fn is_negotiate_request(payload: &[u8]) -> bool {
    let payload = strip_session_header(payload);
    if payload.len() < 10 {
        return false;
    }
    payload.starts_with(SMB_MAGIC)
        && payload[4] == NEGOTIATE_PROTOCOL
        && be_u32(payload, 5) == Some(0)
        && payload[9] & FLAG_REPLY == 0
}

impl HeuristicClassifier for SmbClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Smb
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Tcp, |payload, _| {
            is_negotiate_request(payload)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::test_support::*;

    fn negotiate() -> Vec<u8> {
        let mut smb = SMB_MAGIC.to_vec();
        smb.extend_from_slice(&[NEGOTIATE_PROTOCOL, 0, 0, 0, 0, 0x18, 0x53, 0xc8]);
        smb.extend_from_slice(&[0; 22]);
        smb
    }

    fn with_session_header(smb: &[u8]) -> Vec<u8> {
        let mut payload = (smb.len() as u32).to_be_bytes().to_vec();
        payload.extend_from_slice(smb);
        payload
    }

    #[test]
    fn test_bare_negotiate() {
        assert!(SmbClassifier.detects(&tcp_flow(&[&negotiate()])));
    }

    #[test]
    fn test_negotiate_behind_session_header() {
        let payload = with_session_header(&negotiate());
        assert!(SmbClassifier.detects(&tcp_flow(&[&payload])));
    }

    #[test]
    fn test_session_header_with_wrong_length_is_kept() {
        let mut payload = with_session_header(&negotiate());
        payload[3] += 1;
        assert!(!SmbClassifier.detects(&tcp_flow(&[&payload])));
    }

    #[test]
    fn test_reply_or_error_is_rejected() {
        let mut reply = negotiate();
        reply[9] |= FLAG_REPLY;
        assert!(!SmbClassifier.detects(&tcp_flow(&[&reply])));

        let mut error = negotiate();
        error[7] = 1;
        assert!(!SmbClassifier.detects(&tcp_flow(&[&error])));

        let mut other_command = negotiate();
        other_command[4] = 0x73;
        assert!(!SmbClassifier.detects(&tcp_flow(&[&other_command])));
    }

    #[test]
    fn test_short_payload() {
        assert!(!SmbClassifier.detects(&tcp_flow(&[b"\xFFSMBr"])));
    }
}
