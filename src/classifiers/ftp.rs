use super::{check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

/// True when every non-empty line of the payload is a `220` reply.
pub(crate) fn is_service_ready_greeting(payload: &[u8]) -> bool {
    payload
        .split(|b| *b == b'\n')
        .all(|line| line.is_empty() || line.starts_with(b"220"))
}

/// Checks a server greeting followed directly by a client command.
///
/// The command must be the next payload-bearing TCP packet after the greeting.
pub(crate) fn greeting_then_command(flow: &Flow, commands: &[&[u8]]) -> bool {
    check_first_payload(&flow.packets(), TransportKind::Tcp, |greeting, rest| {
        is_service_ready_greeting(greeting)
            && check_first_payload(rest, TransportKind::Tcp, |command, _| {
                commands.iter().any(|c| command.starts_with(c)) && command.ends_with(b"\n")
            })
    })
}

/// Detects an FTP `220` greeting answered with `USER`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpClassifier;

impl HeuristicClassifier for FtpClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn detects(&self, flow: &Flow) -> bool {
        greeting_then_command(flow, &[b"USER "])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::test_support::*;

    #[test]
    fn test_greeting_and_user() {
        let flow = tcp_flow(&[b"220 welcome\r\n", b"USER anonymous\r\n"]);
        assert!(FtpClassifier.detects(&flow));
    }

    #[test]
    fn test_multiline_greeting() {
        let flow = tcp_flow(&[
            b"220-FileZilla Server\r\n220-written by Tim Kosse\r\n220 Please visit\r\n",
            b"USER bob\n",
        ]);
        assert!(FtpClassifier.detects(&flow));
    }

    #[test]
    fn test_wrong_greeting_or_command() {
        assert!(!FtpClassifier.detects(&tcp_flow(&[b"220 ok\r\n421 busy\r\n", b"USER a\r\n"])));
        assert!(!FtpClassifier.detects(&tcp_flow(&[b"220 ok\r\n", b"EHLO host\r\n"])));
        assert!(!FtpClassifier.detects(&tcp_flow(&[b"220 ok\r\n", b"USER a"])));
        assert!(!FtpClassifier.detects(&tcp_flow(&[b"220 ok\r\n"])));
    }

    #[test]
    fn test_command_must_follow_greeting() {
        let flow = tcp_flow(&[b"220 ok\r\n", b"", b"NOOP\r\n", b"USER a\r\n"]);
        assert!(!FtpClassifier.detects(&flow));

        // empty packets in between are skipped
        let flow = tcp_flow(&[b"220 ok\r\n", b"", b"USER a\r\n"]);
        assert!(FtpClassifier.detects(&flow));
    }
}
