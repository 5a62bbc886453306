// Module id -> game module lookup, built once before the supervisor starts.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::games::{Bong, TowerDefense};
use crate::domain::{EngineError, GameModule};

/// Static table of pluggable game modules.
///
/// Unknown ids are only detected when an instance is launched, so a
/// definition referencing a missing module fails that instance alone.
#[derive(Clone, Default)]
pub struct GameModuleRegistry {
    modules: HashMap<String, Arc<dyn GameModule>>,
}

impl GameModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every module shipped with the engine.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TowerDefense));
        registry.register(Arc::new(Bong));
        registry
    }

    /// Adds a module under its own id, replacing any earlier registration.
    pub fn register(&mut self, module: Arc<dyn GameModule>) -> &mut Self {
        self.modules.insert(module.module_id().to_string(), module);
        self
    }

    pub fn resolve(&self, module_id: &str) -> Result<Arc<dyn GameModule>, EngineError> {
        self.modules
            .get(module_id)
            .cloned()
            .ok_or_else(|| EngineError::ConfigUnknownModule(module_id.to_string()))
    }

    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::games::{bong, tower_defense};

    #[test]
    fn builtin_registry_resolves_shipped_modules() {
        let registry = GameModuleRegistry::with_builtin();

        assert_eq!(
            registry.module_ids(),
            vec![bong::MODULE_ID.to_string(), tower_defense::MODULE_ID.to_string()]
        );
        let module = registry.resolve(tower_defense::MODULE_ID).unwrap();
        assert_eq!(module.module_id(), tower_defense::MODULE_ID);
    }

    #[test]
    fn when_module_id_is_unknown_then_resolve_returns_config_error() {
        let registry = GameModuleRegistry::with_builtin();

        match registry.resolve("chess") {
            Err(EngineError::ConfigUnknownModule(id)) => assert_eq!(id, "chess"),
            other => panic!("expected unknown module error, got {:?}", other.err()),
        }
    }
}
