use crate::classifiers::ClassifierModule;
use crate::config::Config;
use crate::error::ModuleError;
use crate::flow::Flow;
use crate::flow_tracker::FlowTracker;
use crate::ml::LinearSvcModule;
use crate::module::Module;
use crate::packet::Packet;
use crate::protocol::{ClassificationResult, ClassificationSource};
use crate::wrappers::WrapperModule;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CACHE_EXPIRATION: Duration = Duration::from_secs(5 * 60);

/// Ordered chain of classification modules plus the flow tracker feeding it.
///
/// Earlier modules win: [`Orchestrator::classify`] returns the first known
/// protocol any active module reports.
pub struct Orchestrator {
    modules: RwLock<Vec<Arc<dyn Module>>>,
    active: RwLock<Vec<Arc<dyn Module>>>,
    tracker: FlowTracker,
    cache_expiration: RwLock<Option<Duration>>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristics, then native wrappers, then the ML models.
pub fn default_modules(config: &Config) -> Vec<Arc<dyn Module>> {
    vec![
        Arc::new(ClassifierModule::new()),
        Arc::new(WrapperModule::new()),
        Arc::new(LinearSvcModule::new(config.ml.clone())),
    ]
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_modules(default_modules(&Config::default()))
    }

    pub fn with_config(config: &Config) -> Self {
        let orchestrator = Self::with_modules(default_modules(config));
        orchestrator.set_cache_expiration(config.cache_expiration());
        orchestrator
    }

    pub fn with_modules(modules: Vec<Arc<dyn Module>>) -> Self {
        Self {
            modules: RwLock::new(modules),
            active: RwLock::new(Vec::new()),
            tracker: FlowTracker::new(),
            cache_expiration: RwLock::new(Some(DEFAULT_CACHE_EXPIRATION)),
        }
    }

    /// Swaps in a tracker, e.g. one driven by a custom clock.
    pub fn with_tracker(mut self, tracker: FlowTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Replaces the module list. Already-initialized callers must
    /// `destroy_all` first and `initialize_all` afterwards.
    pub fn set_modules(&self, modules: Vec<Arc<dyn Module>>) {
        *self.modules.write() = modules;
    }

    /// `None` keeps flows until flushed. Applies at the next `initialize_all`
    /// that creates the cache.
    pub fn set_cache_expiration(&self, expiration: Option<Duration>) {
        *self.cache_expiration.write() = expiration;
    }

    pub fn tracker(&self) -> &FlowTracker {
        &self.tracker
    }

    pub fn active_modules(&self) -> Vec<ClassificationSource> {
        self.active.read().iter().map(|m| m.name()).collect()
    }

    fn is_active(&self, module: &Arc<dyn Module>) -> bool {
        self.active.read().iter().any(|m| Arc::ptr_eq(m, module))
    }

    /// Creates the flow cache if needed and initializes every module that is
    /// not active yet. Failures are collected and never stop other modules.
    /// Modules whose library is compiled out are skipped without an error.
    ///
    /// # Panics
    ///
    /// URL model sources are fetched with a blocking HTTP client, which panics
    /// when driven from an async executor thread. Call this from
    /// `tokio::task::spawn_blocking` or a plain thread in async programs.
    pub fn initialize_all(&self) -> Vec<ModuleError> {
        if !self.tracker.is_initialized() {
            self.tracker.init_cache(*self.cache_expiration.read());
        }

        let modules = self.modules.read().clone();
        let mut errors = Vec::new();
        for module in modules {
            if self.is_active(&module) {
                continue;
            }
            match module.initialize() {
                Ok(()) => {
                    info!(module = %module.name(), "Module initialized");
                    self.active.write().push(module);
                }
                Err(e) if e.is_library_disabled() => {
                    info!(module = %module.name(), "Module disabled in this build");
                }
                Err(e) => {
                    warn!(module = %module.name(), "Module failed to initialize: {}", e);
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Tears down the flow cache and destroys every active module. Modules
    /// that fail to destroy stay active so the call can be retried.
    pub fn destroy_all(&self) -> Vec<ModuleError> {
        self.tracker.destroy_cache();

        let active = std::mem::take(&mut *self.active.write());
        let mut remaining = Vec::new();
        let mut errors = Vec::new();
        for module in active {
            match module.destroy() {
                Ok(()) => info!(module = %module.name(), "Module destroyed"),
                Err(e) => {
                    warn!(module = %module.name(), "Module failed to destroy: {}", e);
                    errors.push(e);
                    remaining.push(module);
                }
            }
        }
        self.active.write().extend(remaining);
        errors
    }

    /// See [`FlowTracker::get_flow_for_packet`].
    ///
    /// # Panics
    ///
    /// Panics if called before `initialize_all`.
    pub fn get_packet_flow(&self, packet: impl Into<Arc<Packet>>) -> (Arc<Flow>, bool) {
        self.tracker.get_flow_for_packet(packet)
    }

    pub fn classify(&self, flow: &Flow) -> ClassificationResult {
        let active = self.active.read().clone();
        active
            .iter()
            .map(|module| module.classify(flow))
            .find(|result| !result.is_unknown())
            .unwrap_or_default()
    }

    /// Every known result from every active module, in module order.
    pub fn classify_all(&self, flow: &Flow) -> Vec<ClassificationResult> {
        let active = self.active.read().clone();
        active
            .iter()
            .flat_map(|module| module.classify_all(flow))
            .filter(|result| !result.is_unknown())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockModule {
        name: &'static str,
        init_success: bool,
        destroy_success: AtomicBool,
        disabled: bool,
        detects: Option<Protocol>,
        init_called: AtomicUsize,
        destroy_called: AtomicUsize,
        classify_called: AtomicUsize,
    }

    impl MockModule {
        fn new(name: &'static str, detects: Option<Protocol>) -> Self {
            Self {
                name,
                init_success: true,
                destroy_success: AtomicBool::new(true),
                disabled: false,
                detects,
                init_called: AtomicUsize::new(0),
                destroy_called: AtomicUsize::new(0),
                classify_called: AtomicUsize::new(0),
            }
        }

        fn failing_init(mut self) -> Self {
            self.init_success = false;
            self
        }

        fn disabled(mut self) -> Self {
            self.disabled = true;
            self
        }
    }

    impl Module for MockModule {
        fn name(&self) -> ClassificationSource {
            ClassificationSource::from_static(self.name)
        }

        fn initialize(&self) -> Result<(), ModuleError> {
            self.init_called.fetch_add(1, Ordering::SeqCst);
            if self.disabled {
                Err(ModuleError::LibraryDisabled { module: self.name() })
            } else if self.init_success {
                Ok(())
            } else {
                Err(ModuleError::Initialize {
                    module: self.name(),
                    reason: "Init error".to_string(),
                })
            }
        }

        fn destroy(&self) -> Result<(), ModuleError> {
            self.destroy_called.fetch_add(1, Ordering::SeqCst);
            if self.destroy_success.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ModuleError::Destroy {
                    module: self.name(),
                    reason: "Destroy error".to_string(),
                })
            }
        }

        fn classify(&self, _flow: &Flow) -> ClassificationResult {
            self.classify_called.fetch_add(1, Ordering::SeqCst);
            match self.detects {
                Some(protocol) => ClassificationResult::new(protocol, self.name()),
                None => ClassificationResult::new(Protocol::Unknown, self.name()),
            }
        }
    }

    fn orchestrator(modules: &[Arc<MockModule>]) -> Orchestrator {
        Orchestrator::with_modules(modules.iter().map(|m| m.clone() as Arc<dyn Module>).collect())
    }

    #[test]
    fn test_no_modules_is_unknown() {
        let orchestrator = Orchestrator::with_modules(Vec::new());
        assert!(orchestrator.initialize_all().is_empty());
        assert_eq!(orchestrator.classify(&Flow::new()), ClassificationResult::unknown());
        assert!(orchestrator.classify_all(&Flow::new()).is_empty());
    }

    #[test]
    fn test_uninitialized_is_unknown() {
        let module = Arc::new(MockModule::new("a", Some(Protocol::Http)));
        let orchestrator = orchestrator(&[module.clone()]);
        assert!(orchestrator.classify(&Flow::new()).is_unknown());
        assert_eq!(module.classify_called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_known_result_wins() {
        let unknown = Arc::new(MockModule::new("unknown", None));
        let first = Arc::new(MockModule::new("first", Some(Protocol::Ssh)));
        let second = Arc::new(MockModule::new("second", Some(Protocol::Dns)));
        let orchestrator = orchestrator(&[unknown.clone(), first, second.clone()]);
        assert!(orchestrator.initialize_all().is_empty());

        let result = orchestrator.classify(&Flow::new());
        assert_eq!(result, ClassificationResult::new(Protocol::Ssh, "first".into()));
        assert_eq!(unknown.classify_called.load(Ordering::SeqCst), 1);
        assert_eq!(second.classify_called.load(Ordering::SeqCst), 0);

        assert_eq!(
            orchestrator.classify_all(&Flow::new()),
            vec![
                ClassificationResult::new(Protocol::Ssh, "first".into()),
                ClassificationResult::new(Protocol::Dns, "second".into()),
            ]
        );
    }

    #[test]
    fn test_failed_module_is_never_used() {
        let broken = Arc::new(MockModule::new("broken", Some(Protocol::Http)).failing_init());
        let working = Arc::new(MockModule::new("working", Some(Protocol::Dns)));
        let orchestrator = orchestrator(&[broken.clone(), working.clone()]);

        let errors = orchestrator.initialize_all();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "broken failed to initialize: Init error");
        assert_eq!(orchestrator.active_modules(), vec!["working".into()]);

        assert_eq!(orchestrator.classify(&Flow::new()).protocol, Protocol::Dns);
        orchestrator.classify_all(&Flow::new());
        assert!(orchestrator.destroy_all().is_empty());

        assert_eq!(broken.classify_called.load(Ordering::SeqCst), 0);
        assert_eq!(broken.destroy_called.load(Ordering::SeqCst), 0);
        assert_eq!(working.destroy_called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let module = Arc::new(MockModule::new("a", None));
        let broken = Arc::new(MockModule::new("b", None).failing_init());
        let orchestrator = orchestrator(&[module.clone(), broken.clone()]);

        assert_eq!(orchestrator.initialize_all().len(), 1);
        assert_eq!(orchestrator.initialize_all().len(), 1);
        assert_eq!(module.init_called.load(Ordering::SeqCst), 1);
        assert_eq!(broken.init_called.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.active_modules().len(), 1);
    }

    #[test]
    fn test_disabled_module_is_neither_error_nor_active() {
        let disabled = Arc::new(MockModule::new("native", Some(Protocol::Http)).disabled());
        let orchestrator = orchestrator(&[disabled.clone()]);

        assert!(orchestrator.initialize_all().is_empty());
        assert!(orchestrator.active_modules().is_empty());
        assert!(orchestrator.classify(&Flow::new()).is_unknown());
        assert_eq!(disabled.classify_called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_destroy_is_retried() {
        let sticky = Arc::new(MockModule::new("sticky", None));
        sticky.destroy_success.store(false, Ordering::SeqCst);
        let orchestrator = orchestrator(&[sticky.clone()]);
        orchestrator.initialize_all();

        assert_eq!(orchestrator.destroy_all().len(), 1);
        assert_eq!(orchestrator.active_modules(), vec!["sticky".into()]);
        assert_eq!(orchestrator.destroy_all().len(), 1);
        assert_eq!(sticky.destroy_called.load(Ordering::SeqCst), 2);

        sticky.destroy_success.store(true, Ordering::SeqCst);
        assert!(orchestrator.destroy_all().is_empty());
        assert!(orchestrator.active_modules().is_empty());
        assert_eq!(sticky.destroy_called.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reconfigure_cycle() {
        let old = Arc::new(MockModule::new("old", Some(Protocol::Ssh)));
        let new = Arc::new(MockModule::new("new", Some(Protocol::Rdp)));
        let orchestrator = orchestrator(&[old.clone()]);
        orchestrator.initialize_all();

        orchestrator.destroy_all();
        orchestrator.set_modules(vec![new.clone() as Arc<dyn Module>]);
        orchestrator.initialize_all();

        assert_eq!(orchestrator.classify(&Flow::new()).protocol, Protocol::Rdp);
        assert_eq!(old.destroy_called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tracker_follows_lifecycle() {
        let orchestrator = Orchestrator::with_modules(Vec::new());
        orchestrator.set_cache_expiration(None);
        orchestrator.initialize_all();
        assert!(orchestrator.tracker().is_initialized());

        let packet = Packet::tcp(
            "10.0.0.1:1000".parse().unwrap(),
            "10.0.0.2:80".parse().unwrap(),
            b"",
        );
        assert!(orchestrator.get_packet_flow(packet.clone()).1);
        assert!(!orchestrator.get_packet_flow(packet.clone()).1);

        // a second initialize keeps tracked flows
        orchestrator.initialize_all();
        assert!(!orchestrator.get_packet_flow(packet.clone()).1);

        orchestrator.destroy_all();
        assert!(!orchestrator.tracker().is_initialized());
        orchestrator.initialize_all();
        assert!(orchestrator.get_packet_flow(packet).1);
    }

    #[test]
    fn test_default_chain_with_heuristics_only() {
        let orchestrator = Orchestrator::with_config(&Config {
            ml: crate::config::MlConfig {
                tcp_model_path: "/nonexistent/tcp.model".to_string(),
                ..Default::default()
            },
            ..Config::default()
        });
        let errors = orchestrator.initialize_all();

        // wrappers are compiled out, the models are missing
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ModuleError::ModelLoad { .. }));
        assert_eq!(orchestrator.active_modules(), vec!["flowdpi".into()]);

        let (flow, _) = orchestrator.get_packet_flow(Packet::tcp(
            "10.0.0.1:50000".parse().unwrap(),
            "10.0.0.2:22".parse().unwrap(),
            b"SSH-2.0-OpenSSH_9.6\r\n",
        ));
        assert_eq!(orchestrator.classify(&flow).protocol, Protocol::Ssh);
    }
}
