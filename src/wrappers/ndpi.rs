use super::Wrapper;
use crate::error::WrapperError;
use crate::flow::Flow;
use crate::packet::Packet;
use crate::protocol::{ClassificationSource, Protocol};
use std::sync::Arc;

pub const NDPI_WRAPPER_NAME: ClassificationSource = ClassificationSource::from_static("nDPI");

const NDPI_IPV6_UNSUPPORTED: i32 = -10;
const NDPI_FRAGMENTED_PACKET: i32 = -11;
const NDPI_FLOW_CREATION: i32 = -12;

/// Native side of the nDPI wrapper.
pub trait NdpiProvider: Send + Sync {
    fn initialize(&self) -> i32;

    fn destroy(&self);

    /// Allocates native flow state from the flow's first packet. The state
    /// is released when the returned value is dropped.
    fn new_flow(&self, first: &Packet) -> Option<Box<dyn NdpiFlow>>;
}

/// Per-flow native state.
pub trait NdpiFlow {
    /// Feeds one packet. Returns the detected nDPI protocol id, or a negative
    /// error code.
    fn process_packet(&mut self, packet: &Packet) -> i32;
}

fn protocol_for_code(code: i32) -> Option<Protocol> {
    match code {
        7 => Some(Protocol::Http),
        5 => Some(Protocol::Dns),
        92 => Some(Protocol::Ssh),
        127 => Some(Protocol::Rpc),
        3 => Some(Protocol::Smtp),
        88 => Some(Protocol::Rdp),
        16 => Some(Protocol::Smb),
        81 => Some(Protocol::Icmp),
        1 => Some(Protocol::Ftp),
        // SSL, SSL without certificate
        91 | 64 => Some(Protocol::Ssl),
        10 => Some(Protocol::NetBios),
        _ => None,
    }
}

fn error_for_code(code: i32) -> WrapperError {
    let wrapper = NDPI_WRAPPER_NAME;
    match code {
        NDPI_IPV6_UNSUPPORTED => WrapperError::Ipv6Unsupported { wrapper },
        NDPI_FRAGMENTED_PACKET => WrapperError::FragmentedPacket { wrapper },
        NDPI_FLOW_CREATION => WrapperError::FlowCreation { wrapper },
        code => WrapperError::Native { wrapper, code },
    }
}

pub struct NdpiWrapper {
    provider: Arc<dyn NdpiProvider>,
}

impl NdpiWrapper {
    pub fn new(provider: Arc<dyn NdpiProvider>) -> Self {
        Self { provider }
    }
}

impl Wrapper for NdpiWrapper {
    fn name(&self) -> ClassificationSource {
        NDPI_WRAPPER_NAME
    }

    fn initialize(&self) -> i32 {
        self.provider.initialize()
    }

    fn destroy(&self) -> Result<(), WrapperError> {
        self.provider.destroy();
        Ok(())
    }

    /// Feeds packets in order until nDPI names a known protocol or reports
    /// an error.
    fn classify(&self, flow: &Flow) -> Result<Protocol, WrapperError> {
        let packets = flow.packets();
        let Some(first) = packets.first() else {
            return Ok(Protocol::Unknown);
        };
        let mut native_flow = self
            .provider
            .new_flow(first)
            .ok_or_else(|| error_for_code(NDPI_FLOW_CREATION))?;

        for packet in &packets {
            let code = native_flow.process_packet(packet);
            if let Some(protocol) = protocol_for_code(code) {
                return Ok(protocol);
            }
            if code < 0 {
                return Err(error_for_code(code));
            }
        }
        Ok(Protocol::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted protocol codes and counts live native flows.
    struct ScriptedNdpi {
        codes: Mutex<VecDeque<i32>>,
        live_flows: Arc<AtomicUsize>,
        processed: Arc<AtomicUsize>,
    }

    struct ScriptedFlow {
        codes: VecDeque<i32>,
        live_flows: Arc<AtomicUsize>,
        processed: Arc<AtomicUsize>,
    }

    impl NdpiFlow for ScriptedFlow {
        fn process_packet(&mut self, _packet: &Packet) -> i32 {
            self.processed.fetch_add(1, Ordering::SeqCst);
            self.codes.pop_front().unwrap_or(0)
        }
    }

    impl Drop for ScriptedFlow {
        fn drop(&mut self) {
            self.live_flows.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ScriptedNdpi {
        fn new(codes: &[i32]) -> Self {
            Self {
                codes: Mutex::new(codes.iter().copied().collect()),
                live_flows: Arc::new(AtomicUsize::new(0)),
                processed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl NdpiProvider for ScriptedNdpi {
        fn initialize(&self) -> i32 {
            0
        }

        fn destroy(&self) {}

        fn new_flow(&self, _first: &Packet) -> Option<Box<dyn NdpiFlow>> {
            self.live_flows.fetch_add(1, Ordering::SeqCst);
            Some(Box::new(ScriptedFlow {
                codes: std::mem::take(&mut *self.codes.lock()),
                live_flows: self.live_flows.clone(),
                processed: self.processed.clone(),
            }))
        }
    }

    fn flow_of(n: usize) -> Flow {
        let flow = Flow::new();
        for _ in 0..n {
            flow.add_packet(Packet::tcp(
                "10.0.0.1:1000".parse().unwrap(),
                "10.0.0.2:80".parse().unwrap(),
                b"x",
            ));
        }
        flow
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(protocol_for_code(7), Some(Protocol::Http));
        assert_eq!(protocol_for_code(64), Some(Protocol::Ssl));
        assert_eq!(protocol_for_code(91), Some(Protocol::Ssl));
        assert_eq!(protocol_for_code(0), None);
        assert_eq!(protocol_for_code(-10), None);
    }

    #[test]
    fn test_detects_on_later_packet_and_frees_flow() {
        let provider = Arc::new(ScriptedNdpi::new(&[0, 0, 92]));
        let wrapper = NdpiWrapper::new(provider.clone());

        assert_eq!(wrapper.classify(&flow_of(5)), Ok(Protocol::Ssh));
        assert_eq!(provider.processed.load(Ordering::SeqCst), 3);
        assert_eq!(provider.live_flows.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_native_errors() {
        for (code, expected) in [
            (-10, WrapperError::Ipv6Unsupported { wrapper: NDPI_WRAPPER_NAME }),
            (-11, WrapperError::FragmentedPacket { wrapper: NDPI_WRAPPER_NAME }),
            (-12, WrapperError::FlowCreation { wrapper: NDPI_WRAPPER_NAME }),
            (-99, WrapperError::Native { wrapper: NDPI_WRAPPER_NAME, code: -99 }),
        ] {
            let wrapper = NdpiWrapper::new(Arc::new(ScriptedNdpi::new(&[code])));
            assert_eq!(wrapper.classify(&flow_of(2)), Err(expected));
        }
    }

    #[test]
    fn test_undetected_and_empty_flows() {
        let wrapper = NdpiWrapper::new(Arc::new(ScriptedNdpi::new(&[0, 200])));
        assert_eq!(wrapper.classify(&flow_of(2)), Ok(Protocol::Unknown));
        assert_eq!(wrapper.classify(&Flow::new()), Ok(Protocol::Unknown));
    }

    #[test]
    fn test_disabled_provider() {
        let wrapper = NdpiWrapper::new(Arc::new(super::super::DisabledLibrary));
        assert_eq!(wrapper.initialize(), crate::error::ERROR_LIBRARY_DISABLED);
        assert_eq!(
            wrapper.classify(&flow_of(1)),
            Err(WrapperError::FlowCreation { wrapper: NDPI_WRAPPER_NAME })
        );
    }
}
