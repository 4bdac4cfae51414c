use crate::error::ModuleError;
use crate::flow::Flow;
use crate::protocol::{ClassificationResult, ClassificationSource};

/// A classification strategy managed by the orchestrator.
///
/// Modules are shared behind `Arc<dyn Module>`, so configuration that may
/// change between `destroy` and `initialize` lives behind interior mutability.
pub trait Module: Send + Sync {
    /// Source reported with this module's classifications.
    fn name(&self) -> ClassificationSource;

    fn initialize(&self) -> Result<(), ModuleError>;

    fn destroy(&self) -> Result<(), ModuleError>;

    /// Returns `Unknown` when the module cannot decide. Never fails.
    fn classify(&self, flow: &Flow) -> ClassificationResult;

    /// Every detection this module can make for the flow.
    fn classify_all(&self, flow: &Flow) -> Vec<ClassificationResult> {
        vec![self.classify(flow)]
    }
}
