use crate::metrics::{Metrics, ParseErrorKind};
use crate::orchestrator::Orchestrator;
use crate::packet::{Packet, PacketMetadata};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// How a captured frame begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    #[default]
    Ethernet,
    Ip,
}

impl LinkType {
    fn as_str(&self) -> &'static str {
        match self {
            LinkType::Ethernet => "ethernet",
            LinkType::Ip => "ip",
        }
    }
}

/// One input line: a hex-encoded frame and its capture time.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameRecord {
    #[serde(default)]
    pub timestamp_ns: u64,
    #[serde(default)]
    pub link: LinkType,
    pub frame: String,
}

impl FrameRecord {
    fn decode(&self) -> Result<Packet, ParseErrorKind> {
        let data = hex::decode(self.frame.trim()).map_err(|_| ParseErrorKind::Hex)?;
        let metadata = PacketMetadata {
            timestamp_ns: self.timestamp_ns,
            capture_length: data.len(),
            length: data.len(),
        };
        match self.link {
            LinkType::Ethernet => Packet::from_ethernet(data, metadata),
            LinkType::Ip => Packet::from_ip(data, metadata),
        }
        .map_err(|_| ParseErrorKind::Frame)
    }
}

pub async fn process_stdin(orchestrator: Arc<Orchestrator>, metrics: Arc<Metrics>) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    process_reader(reader, &orchestrator, &metrics).await
}

/// Resolves every frame record to its flow and classifies flows that are
/// still unknown. Undecodable lines are logged, counted and skipped.
pub async fn process_reader<R>(
    mut reader: R,
    orchestrator: &Orchestrator,
    metrics: &Metrics,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = buf.trim_ascii();
        if line.is_empty() {
            continue;
        }

        // invalid UTF-8 is rejected here as well
        let record = match serde_json::from_slice::<FrameRecord>(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Failed to parse frame record: {} - Line: {}",
                    e,
                    String::from_utf8_lossy(line)
                );
                metrics.increment_parse_errors(ParseErrorKind::Json);
                continue;
            }
        };

        let packet = match record.decode() {
            Ok(packet) => packet,
            Err(kind) => {
                warn!(?kind, "Failed to decode frame: {}", record.frame);
                metrics.increment_parse_errors(kind);
                continue;
            }
        };
        metrics.record_frame(record.link.as_str());

        let transport = packet.transport.as_ref().map(|t| t.kind);
        let (flow, is_new) = orchestrator.get_packet_flow(packet);
        if is_new {
            metrics.record_new_flow(transport);
        }

        if flow.classification_result().is_unknown() {
            let result = orchestrator.classify(&flow);
            if !result.is_unknown() {
                debug!(packets = flow.packet_count(), "{}", result);
                flow.set_classification_result(result.protocol, result.source.clone());
                metrics.record_classification(&result);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::ClassifierModule;

    #[test]
    fn test_record_defaults_to_ethernet() {
        let record: FrameRecord = serde_json::from_str(r#"{"frame": "00"}"#).unwrap();
        assert_eq!(record.link, LinkType::Ethernet);
        assert_eq!(record.timestamp_ns, 0);

        let record: FrameRecord =
            serde_json::from_str(r#"{"timestamp_ns": 5, "link": "ip", "frame": "00"}"#).unwrap();
        assert_eq!(record.link, LinkType::Ip);
        assert_eq!(record.timestamp_ns, 5);
    }

    #[test]
    fn test_decode_errors_are_classified() {
        let bad_hex = FrameRecord {
            timestamp_ns: 0,
            link: LinkType::Ip,
            frame: "zz".to_string(),
        };
        assert_eq!(bad_hex.decode().unwrap_err(), ParseErrorKind::Hex);

        let truncated = FrameRecord {
            timestamp_ns: 0,
            link: LinkType::Ip,
            frame: "4500".to_string(),
        };
        assert_eq!(truncated.decode().unwrap_err(), ParseErrorKind::Frame);
    }

    #[test]
    fn test_decode_ip_frame() {
        // IPv4 + UDP 10.0.0.1:1234 -> 10.0.0.2:53, payload "hi"
        let frame = concat!(
            "4500001e00000000401100000a0000010a000002",
            "04d20035000a0000",
            "6869"
        );
        let record = FrameRecord {
            timestamp_ns: 42,
            link: LinkType::Ip,
            frame: frame.to_string(),
        };
        let packet = record.decode().unwrap();
        assert_eq!(packet.metadata.timestamp_ns, 42);
        assert_eq!(packet.metadata.capture_length, 30);
        let (src, dst) = packet.endpoints().unwrap();
        assert_eq!(src, "10.0.0.1:1234".parse().unwrap());
        assert_eq!(dst, "10.0.0.2:53".parse().unwrap());
        assert_eq!(packet.transport.unwrap().payload, b"hi");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let orchestrator = Orchestrator::with_modules(vec![Arc::new(ClassifierModule::new())]);
        orchestrator.initialize_all();
        let metrics = Metrics::new();

        let mut input = b"{\"frame\": \"\xff\xfe\"}\n".to_vec();
        input.extend_from_slice(b"\xc3\x28 not text\r\n");
        let frame = concat!(
            "4500001e00000000401100000a0000010a000002",
            "04d20035000a0000",
            "6869"
        );
        input.extend_from_slice(format!(r#"{{"link": "ip", "frame": "{}"}}"#, frame).as_bytes());

        process_reader(input.as_slice(), &orchestrator, &metrics)
            .await
            .unwrap();

        let output = String::from_utf8(metrics.gather()).unwrap();
        assert!(output.contains(r#"flowdpi_parse_errors_total{error_type="json"} 2"#));
        assert!(output.contains(r#"flowdpi_frames_total{link="ip"} 1"#));
        assert_eq!(orchestrator.tracker().tracked_flows(), 1);
    }
}
