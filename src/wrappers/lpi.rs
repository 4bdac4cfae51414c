use super::Wrapper;
use crate::error::WrapperError;
use crate::flow::Flow;
use crate::protocol::{ClassificationSource, Protocol};
use std::sync::Arc;

pub const LPI_WRAPPER_NAME: ClassificationSource =
    ClassificationSource::from_static("libprotoident");

/// Native side of the libprotoident wrapper.
pub trait LpiProvider: Send + Sync {
    fn initialize(&self) -> i32;

    fn destroy(&self);

    /// Native flow state, released on drop. `None` when unavailable.
    fn new_flow(&self) -> Option<Box<dyn LpiFlow>>;
}

pub trait LpiFlow {
    fn add_packet(&mut self, frame: &[u8]);

    fn guess_protocol(&self) -> u32;
}

fn protocol_for_code(code: u32) -> Option<Protocol> {
    match code {
        0 => Some(Protocol::Http),
        14 | 201 => Some(Protocol::Dns),
        8 => Some(Protocol::Ssh),
        23 => Some(Protocol::Rpc),
        1 | 92 => Some(Protocol::Smtp),
        21 => Some(Protocol::Rdp),
        24 => Some(Protocol::Smb),
        380 => Some(Protocol::Icmp),
        27 => Some(Protocol::Ftp),
        12 => Some(Protocol::Ssl),
        37 => Some(Protocol::NetBios),
        _ => None,
    }
}

/// Hands every raw frame of the flow to libprotoident, then asks for its guess.
pub struct LpiWrapper {
    provider: Arc<dyn LpiProvider>,
}

impl LpiWrapper {
    pub fn new(provider: Arc<dyn LpiProvider>) -> Self {
        Self { provider }
    }
}

impl Wrapper for LpiWrapper {
    fn name(&self) -> ClassificationSource {
        LPI_WRAPPER_NAME
    }

    fn initialize(&self) -> i32 {
        self.provider.initialize()
    }

    fn destroy(&self) -> Result<(), WrapperError> {
        self.provider.destroy();
        Ok(())
    }

    fn classify(&self, flow: &Flow) -> Result<Protocol, WrapperError> {
        let Some(mut native_flow) = self.provider.new_flow() else {
            return Err(WrapperError::FlowCreation {
                wrapper: LPI_WRAPPER_NAME,
            });
        };
        for packet in flow.packets().iter().filter(|p| !p.data.is_empty()) {
            native_flow.add_packet(&packet.data);
        }
        Ok(protocol_for_code(native_flow.guess_protocol()).unwrap_or(Protocol::Unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, PacketMetadata};
    use parking_lot::Mutex;

    struct RecordingLpi {
        guess: u32,
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    struct RecordingFlow {
        guess: u32,
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl LpiFlow for RecordingFlow {
        fn add_packet(&mut self, frame: &[u8]) {
            self.frames.lock().push(frame.to_vec());
        }

        fn guess_protocol(&self) -> u32 {
            self.guess
        }
    }

    impl LpiProvider for RecordingLpi {
        fn initialize(&self) -> i32 {
            0
        }

        fn destroy(&self) {}

        fn new_flow(&self) -> Option<Box<dyn LpiFlow>> {
            Some(Box::new(RecordingFlow {
                guess: self.guess,
                frames: self.frames.clone(),
            }))
        }
    }

    fn raw_packet(data: &[u8]) -> Packet {
        Packet {
            metadata: PacketMetadata::default(),
            data: data.to_vec(),
            network: None,
            transport: None,
        }
    }

    #[test]
    fn test_feeds_raw_frames_and_maps_guess() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let wrapper = LpiWrapper::new(Arc::new(RecordingLpi {
            guess: 201,
            frames: frames.clone(),
        }));
        let flow = Flow::new();
        flow.add_packet(raw_packet(b"one"));
        flow.add_packet(raw_packet(b""));
        flow.add_packet(raw_packet(b"two"));

        assert_eq!(wrapper.classify(&flow), Ok(Protocol::Dns));
        assert_eq!(*frames.lock(), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_unmapped_guess_is_unknown() {
        let wrapper = LpiWrapper::new(Arc::new(RecordingLpi {
            guess: 9999,
            frames: Arc::new(Mutex::new(Vec::new())),
        }));
        assert_eq!(wrapper.classify(&Flow::new()), Ok(Protocol::Unknown));
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(protocol_for_code(0), Some(Protocol::Http));
        assert_eq!(protocol_for_code(92), Some(Protocol::Smtp));
        assert_eq!(protocol_for_code(380), Some(Protocol::Icmp));
        assert_eq!(protocol_for_code(2), None);
    }
}
