//! Module set declared in the config file's `[[module]]` tables.

use anyhow::Context;
use modsync_core::{ModuleDescriptor, ModuleError, ModuleRegistry, ModuleSource, Version};

use crate::config::Config;

/// [`ModuleSource`] backed by the node's config.
pub struct ManifestModules {
    registry: ModuleRegistry,
}

impl ManifestModules {
    /// Parse every entry. Malformed versions and empty names are errors; a repeated name
    /// keeps the first entry.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let base: Version = cfg
            .base_version
            .parse()
            .with_context(|| format!("base_version {:?}", cfg.base_version))?;
        let mut registry = ModuleRegistry::new(base).with_version_string(cfg.version_string.clone());
        for entry in &cfg.modules {
            let version: Version = entry
                .version
                .parse()
                .with_context(|| format!("module {:?}: version {:?}", entry.name, entry.version))?;
            let descriptor = ModuleDescriptor::new(&entry.name, version, entry.strictness);
            match registry.register(descriptor, entry.level) {
                Ok(()) | Err(ModuleError::Duplicate(_)) => {}
                Err(e) => return Err(e).context("invalid module entry"),
            }
        }
        tracing::info!(
            base = %base,
            modules = registry.len(),
            "module manifest loaded"
        );
        Ok(Self { registry })
    }
}

impl ModuleSource for ManifestModules {
    fn enumerate_enforceable_modules(&self) -> Vec<ModuleDescriptor> {
        self.registry.enumerate_enforceable_modules()
    }

    fn current_base_application_version(&self) -> Version {
        self.registry.current_base_application_version()
    }

    fn version_string(&self) -> String {
        self.registry.version_string()
    }
}
