//! Shared engine services handed to every walker of a process.

use std::sync::Arc;

use arbor_types::config::EngineConfig;

use crate::action::ActionRegistry;
use crate::evaluator::PropertyEvaluator;
use crate::hooks::BoxVisitHooks;
use crate::state::BoxStateStore;
use crate::subroutine::SubroutineProvider;

/// The collaborators a walker needs besides its tree and session identity.
///
/// Cheap to clone; nested subroutine walkers share their parent's services.
#[derive(Clone)]
pub struct EngineServices {
    pub registry: Arc<ActionRegistry>,
    pub evaluator: PropertyEvaluator,
    pub hooks: BoxVisitHooks,
    pub backend: BoxStateStore,
    pub config: Arc<EngineConfig>,
    pub subroutines: Option<Arc<dyn SubroutineProvider>>,
}

impl EngineServices {
    /// Services with the builtin actions, a fresh expression cache, no-op
    /// hooks, and default configuration.
    pub fn new(backend: BoxStateStore) -> Self {
        Self {
            registry: Arc::new(ActionRegistry::with_builtins()),
            evaluator: PropertyEvaluator::default(),
            hooks: BoxVisitHooks::default(),
            backend,
            config: Arc::new(EngineConfig::default()),
            subroutines: None,
        }
    }

    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_evaluator(mut self, evaluator: PropertyEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_hooks(mut self, hooks: BoxVisitHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_subroutines<P: SubroutineProvider + 'static>(mut self, provider: P) -> Self {
        self.subroutines = Some(Arc::new(provider));
        self
    }
}
