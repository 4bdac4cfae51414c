//! Flow-based application-protocol classification.
//!
//! Packets are grouped into bidirectional flows by a [`FlowTracker`], and an
//! [`Orchestrator`] runs an ordered chain of [`Module`]s over each flow:
//! payload heuristics, native DPI library wrappers and linear ML models.

pub mod classifiers;
pub mod config;
pub mod error;
pub mod flow;
pub mod flow_tracker;
pub mod metrics;
pub mod ml;
pub mod module;
pub mod orchestrator;
pub mod packet;
pub mod protocol;
pub mod stdin_reader;
pub mod tcp_flags;
pub mod wrappers;

pub use classifiers::{ClassifierModule, HeuristicClassifier};
pub use config::{Config, MlConfig};
pub use error::{ModelError, ModuleError, PacketError, WrapperError};
pub use flow::Flow;
pub use flow_tracker::{Clock, FlowKey, FlowTracker, SystemClock};
pub use ml::LinearSvcModule;
pub use module::Module;
pub use orchestrator::Orchestrator;
pub use packet::{Packet, PacketMetadata, TransportKind};
pub use protocol::{ClassificationResult, ClassificationSource, Protocol};
pub use wrappers::WrapperModule;
