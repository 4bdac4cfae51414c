//! Error types for module lifecycles, wrappers, model loading and packet decoding.
//!
//! Classification itself never fails: heuristics answer "no match" and the
//! module chain answers `Unknown`. Only lifecycle operations surface errors.

use crate::protocol::ClassificationSource;
use thiserror::Error;

/// Native status code meaning "this library was compiled out".
pub const ERROR_LIBRARY_DISABLED: i32 = -0x1000;

/// Errors reported by a module's `initialize`/`destroy`.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// The module's backing library is not part of this build. Callers treat
    /// this as neither success nor a reportable failure.
    #[error("{module} is disabled in this build")]
    LibraryDisabled { module: ClassificationSource },

    #[error("{module} failed to initialize: {reason}")]
    Initialize {
        module: ClassificationSource,
        reason: String,
    },

    #[error("{module} failed to destroy: {reason}")]
    Destroy {
        module: ClassificationSource,
        reason: String,
    },

    #[error("failed to load model from {path}: {source}")]
    ModelLoad {
        path: String,
        #[source]
        source: ModelError,
    },

    #[error("{} wrapper(s) did not initialize correctly", .errors.len())]
    Wrappers { errors: Vec<WrapperError> },
}

impl ModuleError {
    pub fn is_library_disabled(&self) -> bool {
        matches!(self, ModuleError::LibraryDisabled { .. })
    }
}

/// Errors reported by an individual wrapper around a native DPI library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WrapperError {
    #[error("{wrapper} is disabled in this build")]
    LibraryDisabled { wrapper: ClassificationSource },

    #[error("{wrapper} initialization returned code {code}")]
    InitCode {
        wrapper: ClassificationSource,
        code: i32,
    },

    #[error("{wrapper} failed to release its resources")]
    Destroy { wrapper: ClassificationSource },

    #[error("{wrapper} does not support IPv6")]
    Ipv6Unsupported { wrapper: ClassificationSource },

    #[error("{wrapper} received a fragmented packet")]
    FragmentedPacket { wrapper: ClassificationSource },

    #[error("{wrapper} could not create a native flow")]
    FlowCreation { wrapper: ClassificationSource },

    #[error("{wrapper} returned unknown native error {code}")]
    Native {
        wrapper: ClassificationSource,
        code: i32,
    },
}

impl WrapperError {
    /// Maps a native initialization status to a result.
    pub fn from_init_code(wrapper: ClassificationSource, code: i32) -> Result<(), WrapperError> {
        match code {
            0 => Ok(()),
            ERROR_LIBRARY_DISABLED => Err(WrapperError::LibraryDisabled { wrapper }),
            code => Err(WrapperError::InitCode { wrapper, code }),
        }
    }
}

/// Errors while reading a linear model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not fetch model: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("no model source configured")]
    MissingSource,

    #[error("malformed model header at line {line}: {reason}")]
    Header { line: usize, reason: String },

    #[error("expected {expected} weights, found {found}")]
    WeightCount { expected: usize, found: usize },

    #[error("invalid weight value {0:?}")]
    Weight(String),
}

/// Errors while slicing a raw frame into layers.
#[derive(Error, Debug)]
pub enum PacketError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}
