//! Classification delegated to native deep-packet-inspection libraries.
//!
//! Each [`Wrapper`] adapts one library. Wrappers talk to native code only
//! through provider traits, so a build without the library plugs in a
//! provider that reports [`ERROR_LIBRARY_DISABLED`].

mod lpi;
mod ndpi;

pub use lpi::{LpiFlow, LpiProvider, LpiWrapper, LPI_WRAPPER_NAME};
pub use ndpi::{NdpiFlow, NdpiProvider, NdpiWrapper, NDPI_WRAPPER_NAME};

use crate::error::{ModuleError, WrapperError, ERROR_LIBRARY_DISABLED};
use crate::flow::Flow;
use crate::module::Module;
use crate::protocol::{ClassificationResult, ClassificationSource, Protocol};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const WRAPPERS_MODULE_NAME: ClassificationSource =
    ClassificationSource::from_static("wrappers");

pub trait Wrapper: Send + Sync {
    fn name(&self) -> ClassificationSource;

    /// Native status: 0 on success, [`ERROR_LIBRARY_DISABLED`] when the
    /// library is not part of this build, anything else is a failure.
    fn initialize(&self) -> i32;

    fn destroy(&self) -> Result<(), WrapperError>;

    fn classify(&self, flow: &Flow) -> Result<Protocol, WrapperError>;
}

/// Provider for builds that do not link a native library.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLibrary;

impl NdpiProvider for DisabledLibrary {
    fn initialize(&self) -> i32 {
        ERROR_LIBRARY_DISABLED
    }

    fn destroy(&self) {}

    fn new_flow(&self, _first: &crate::packet::Packet) -> Option<Box<dyn NdpiFlow>> {
        None
    }
}

impl LpiProvider for DisabledLibrary {
    fn initialize(&self) -> i32 {
        ERROR_LIBRARY_DISABLED
    }

    fn destroy(&self) {}

    fn new_flow(&self) -> Option<Box<dyn LpiFlow>> {
        None
    }
}

/// Module that asks each active wrapper in turn.
pub struct WrapperModule {
    wrappers: RwLock<Vec<Arc<dyn Wrapper>>>,
    active: RwLock<Vec<Arc<dyn Wrapper>>>,
}

impl Default for WrapperModule {
    fn default() -> Self {
        Self::new()
    }
}

impl WrapperModule {
    /// libprotoident then nDPI, both without a native library linked.
    pub fn new() -> Self {
        Self::with_wrappers(vec![
            Arc::new(LpiWrapper::new(Arc::new(DisabledLibrary))),
            Arc::new(NdpiWrapper::new(Arc::new(DisabledLibrary))),
        ])
    }

    pub fn with_wrappers(wrappers: Vec<Arc<dyn Wrapper>>) -> Self {
        Self {
            wrappers: RwLock::new(wrappers),
            active: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the wrapper list. Takes effect at the next `initialize`.
    pub fn configure(&self, wrappers: Vec<Arc<dyn Wrapper>>) {
        *self.wrappers.write() = wrappers;
    }

    pub fn active_wrappers(&self) -> Vec<ClassificationSource> {
        self.active.read().iter().map(|w| w.name()).collect()
    }
}

impl Module for WrapperModule {
    fn name(&self) -> ClassificationSource {
        WRAPPERS_MODULE_NAME
    }

    /// Initializes every configured wrapper.
    ///
    /// Disabled wrappers are skipped silently. If any wrapper fails, the ones
    /// that did start are destroyed again and every failure is returned. With
    /// no wrapper left to run, the module itself reports `LibraryDisabled`.
    fn initialize(&self) -> Result<(), ModuleError> {
        let wrappers = self.wrappers.read().clone();
        let mut started: Vec<Arc<dyn Wrapper>> = Vec::new();
        let mut errors = Vec::new();

        for wrapper in wrappers {
            match WrapperError::from_init_code(wrapper.name(), wrapper.initialize()) {
                Ok(()) => {
                    info!(wrapper = %wrapper.name(), "Wrapper initialized");
                    started.push(wrapper);
                }
                Err(WrapperError::LibraryDisabled { wrapper }) => {
                    debug!(%wrapper, "Wrapper disabled in this build");
                }
                Err(e) => {
                    warn!("{}", e);
                    errors.push(e);
                }
            }
        }

        if !errors.is_empty() {
            for wrapper in started {
                if let Err(e) = wrapper.destroy() {
                    warn!("{}", e);
                }
            }
            return Err(ModuleError::Wrappers { errors });
        }
        if started.is_empty() {
            return Err(ModuleError::LibraryDisabled {
                module: WRAPPERS_MODULE_NAME,
            });
        }
        *self.active.write() = started;
        Ok(())
    }

    /// Wrappers that fail to release stay active so a later call can retry.
    fn destroy(&self) -> Result<(), ModuleError> {
        let mut active = self.active.write();
        let mut failed = Vec::new();
        let mut reasons = Vec::new();
        for wrapper in active.drain(..) {
            if let Err(e) = wrapper.destroy() {
                reasons.push(e.to_string());
                failed.push(wrapper);
            }
        }
        *active = failed;

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::Destroy {
                module: WRAPPERS_MODULE_NAME,
                reason: reasons.join("; "),
            })
        }
    }

    fn classify(&self, flow: &Flow) -> ClassificationResult {
        let active = self.active.read().clone();
        for wrapper in active {
            match wrapper.classify(flow) {
                Ok(protocol) if !protocol.is_unknown() => {
                    let source = wrapper.name();
                    flow.set_classification_result(protocol, source.clone());
                    return ClassificationResult::new(protocol, source);
                }
                Ok(_) => {}
                Err(e) => debug!("{}", e),
            }
        }
        ClassificationResult::unknown()
    }

    fn classify_all(&self, flow: &Flow) -> Vec<ClassificationResult> {
        let active = self.active.read().clone();
        let mut results = Vec::new();
        for wrapper in active {
            match wrapper.classify(flow) {
                Ok(protocol) => {
                    let source = wrapper.name();
                    if !protocol.is_unknown() {
                        flow.set_classification_result(protocol, source.clone());
                    }
                    results.push(ClassificationResult::new(protocol, source));
                }
                Err(e) => debug!("{}", e),
            }
        }
        results
    }
}
