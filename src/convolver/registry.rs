//! Plugin registry
//!
//! Built by the host at startup; owns its convolvers and drives them
//! together.

use tracing::{info, warn};

use crate::convolver::AudioPlugin;
use crate::engine::LifecycleState;
use crate::error::{ConvolverError, Result};

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn AudioPlugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin; ids must be unique
    pub fn register(&mut self, plugin: Box<dyn AudioPlugin>) -> Result<()> {
        if self.get(plugin.id()).is_some() {
            return Err(ConvolverError::InvalidParameter {
                param: "id".to_string(),
                value: plugin.id().to_string(),
                expected: "an id not yet registered".to_string(),
            });
        }
        info!(id = plugin.id(), name = plugin.name(), "plugin registered");
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn AudioPlugin> {
        self.plugins
            .iter()
            .find(|p| p.id() == id)
            .map(|p| p.as_ref())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut (dyn AudioPlugin + 'static)> {
        self.plugins
            .iter_mut()
            .find(|p| p.id() == id)
            .map(|p| p.as_mut())
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Initialize every plugin at `sample_rate`, stopping at the first error
    pub fn init_all(&mut self, sample_rate: u32) -> Result<()> {
        for plugin in &mut self.plugins {
            plugin.init(sample_rate)?;
        }
        Ok(())
    }

    /// Activate or deactivate every plugin; returns how many have a build
    /// scheduled or running
    pub fn activate_all(&mut self, start: bool) -> usize {
        let mut started = 0;
        for plugin in &mut self.plugins {
            if plugin.activate(start) {
                started += 1;
            }
        }
        started
    }

    /// Run `update()` on every plugin; returns how many scheduled a rebuild
    pub fn update_all(&mut self) -> usize {
        let mut scheduled = 0;
        for plugin in &mut self.plugins {
            if plugin.update() {
                scheduled += 1;
            }
            if plugin.state() == LifecycleState::Failed {
                warn!(id = plugin.id(), "plugin is not runnable");
            }
        }
        scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::convolver::{ContrastConvolver, ImpulseConvolver};
    use crate::engine::BuildWorker;

    #[test]
    fn test_register_and_lookup() {
        let config = EngineConfig::default();
        let worker = BuildWorker::spawn(&config).unwrap();
        let mut registry = PluginRegistry::new();
        assert!(registry.is_empty());

        registry
            .register(Box::new(ContrastConvolver::new(&worker.handle(), &config)))
            .unwrap();
        registry
            .register(Box::new(ImpulseConvolver::new(&worker.handle(), &config)))
            .unwrap();
        assert_eq!(registry.ids(), vec!["pre", "jconv"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("jconv").unwrap().name(), "Convolver");
        assert!(registry.get("cab").is_none());

        let err = registry
            .register(Box::new(ContrastConvolver::new(&worker.handle(), &config)))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_init_and_activate_all() {
        let config = EngineConfig::default();
        let worker = BuildWorker::spawn(&config).unwrap();
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(ContrastConvolver::new(&worker.handle(), &config)))
            .unwrap();

        assert!(registry.init_all(0).is_err());
        registry.init_all(48000).unwrap();

        // Block size unknown, so the start is deferred
        assert_eq!(registry.activate_all(true), 0);
        assert_eq!(registry.get("pre").unwrap().state(), LifecycleState::Idle);

        registry.get_mut("pre").unwrap().process(&[0.0; 32], &mut [0.0; 32]);
        assert_eq!(registry.update_all(), 1);
        assert!(registry.get("pre").unwrap().state().is_pending());
        // Already building: counted, nothing new scheduled
        assert_eq!(registry.activate_all(true), 1);

        registry.activate_all(false);
        assert_eq!(registry.get("pre").unwrap().state(), LifecycleState::Stopped);
    }
}
