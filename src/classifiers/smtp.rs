use super::ftp::greeting_then_command;
use super::HeuristicClassifier;
use crate::flow::Flow;
use crate::protocol::Protocol;

/// Detects an SMTP `220` greeting answered with `EHLO` or `HELO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpClassifier;

impl HeuristicClassifier for SmtpClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Smtp
    }

    fn detects(&self, flow: &Flow) -> bool {
        greeting_then_command(flow, &[b"EHLO ", b"HELO "])
    }
}
