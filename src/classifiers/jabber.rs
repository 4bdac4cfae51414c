use super::{check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

static XML_PROLOG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?-u)<\?xml\s+version=['"]\d+\.\d+['"]"#).expect("XML prolog pattern is valid")
});

/// Detects an XMPP stream by its XML prolog.
#[derive(Debug, Clone, Copy, Default)]
pub struct JabberClassifier;

impl HeuristicClassifier for JabberClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Jabber
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Tcp, |payload, _| {
            XML_PROLOG.is_match(payload)
        })
    }
}
