use super::{check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

const CONNECT: u8 = 0x10;

/// Detects an MQTT CONNECT packet with a single-byte remaining length.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttClassifier;

fn is_connect(payload: &[u8]) -> bool {
    payload.len() >= 6
        && payload[0] == CONNECT
        && usize::from(payload[1]) == payload.len() - 2
        && payload[4..].starts_with(b"MQ")
}

impl HeuristicClassifier for MqttClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Mqtt
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Tcp, |payload, _| {
            is_connect(payload)
        })
    }
}
