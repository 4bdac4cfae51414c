use super::{check_first_payload, contains_subslice, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

/// Detects an SSH identification line.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshClassifier;

impl HeuristicClassifier for SshClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Tcp, |payload, _| {
            payload.ends_with(b"\n")
                && (payload.starts_with(b"SSH") || contains_subslice(payload, b"OpenSSH"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::test_support::*;

    #[test]
    fn test_identification_string() {
        assert!(SshClassifier.detects(&tcp_flow(&[b"SSH-2.0-OpenSSH_9.6\r\n"])));
        assert!(SshClassifier.detects(&tcp_flow(&[b"banner OpenSSH ready\n"])));
    }

    #[test]
    fn test_requires_trailing_newline() {
        assert!(!SshClassifier.detects(&tcp_flow(&[b"SSH-2.0-OpenSSH_9.6"])));
    }

    #[test]
    fn test_other_banners() {
        assert!(!SshClassifier.detects(&tcp_flow(&[b"220 ftp ready\r\n"])));
        assert!(!SshClassifier.detects(&udp_flow(&[b"SSH-2.0-x\r\n"])));
    }
}
