use super::{check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

// Request line, header lines, blank line.
static REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?-u)^(OPTIONS|GET|HEAD|POST|PUT|DELETE|TRACE|CONNECT) [^\s]+ HTTP/[12](\.[01])?\r\n",
        r"(.*\r\n)*\r\n",
    ))
    .expect("HTTP request pattern is valid")
});

/// Detects an HTTP/1.x or HTTP/2 upgrade request in the first TCP payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClassifier;

impl HeuristicClassifier for HttpClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Tcp, |payload, _| {
            REQUEST.is_match(payload)
        })
    }
}
