//! Module descriptors and the explicit registration interface modules use to opt into checking.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::version::{Strictness, Version};

/// One extension module's identity, version and enforcement policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: Version,
    pub strictness: Strictness,
    /// Absence on the host is an error.
    pub required_on_server: bool,
    /// Absence on the joiner is an error.
    pub required_on_client: bool,
}

impl ModuleDescriptor {
    /// Descriptor with no presence requirements. Use the builder methods to add them.
    pub fn new(name: impl Into<String>, version: Version, strictness: Strictness) -> Self {
        Self {
            name: name.into(),
            version,
            strictness,
            required_on_server: false,
            required_on_client: false,
        }
    }

    pub fn required_on_server(mut self, required: bool) -> Self {
        self.required_on_server = required;
        self
    }

    pub fn required_on_client(mut self, required: bool) -> Self {
        self.required_on_client = required;
        self
    }

    /// Set both presence flags from a named policy.
    pub fn with_level(mut self, level: CompatibilityLevel) -> Self {
        let (server, client) = level.presence_flags();
        self.required_on_server = server;
        self.required_on_client = client;
        self
    }

    /// Whether the comparator looks at this module's version at all.
    pub fn is_enforced(&self) -> bool {
        self.required_on_server || self.required_on_client
    }
}

/// Named presence policy a module declares when it registers. Manifests spell it in
/// kebab case (`everyone-must-have`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompatibilityLevel {
    /// Host and joiner must both have the module.
    EveryoneMustHave,
    /// Joiners without the module are refused.
    ClientMustHave,
    /// Joiners carrying the module are refused by hosts that lack it.
    ServerMustHave,
    /// Not part of compatibility checking; never enumerated.
    #[default]
    NotEnforced,
}

impl CompatibilityLevel {
    /// `(required_on_server, required_on_client)`.
    pub fn presence_flags(self) -> (bool, bool) {
        match self {
            CompatibilityLevel::EveryoneMustHave => (true, true),
            CompatibilityLevel::ClientMustHave => (false, true),
            CompatibilityLevel::ServerMustHave => (true, false),
            CompatibilityLevel::NotEnforced => (false, false),
        }
    }

    pub fn is_enforceable(self) -> bool {
        self != CompatibilityLevel::NotEnforced
    }
}

impl FromStr for CompatibilityLevel {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "everyone-must-have" => Ok(CompatibilityLevel::EveryoneMustHave),
            "client-must-have" => Ok(CompatibilityLevel::ClientMustHave),
            "server-must-have" => Ok(CompatibilityLevel::ServerMustHave),
            "not-enforced" => Ok(CompatibilityLevel::NotEnforced),
            _ => Err(ModuleError::UnknownLevel(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    #[error("module name must not be empty")]
    EmptyName,
    #[error("module {0:?} is already registered")]
    Duplicate(String),
    #[error("unknown compatibility level {0:?}")]
    UnknownLevel(String),
}

/// External enumeration of the modules loaded in this process.
///
/// Implemented by whatever owns the module set (plugin loader, manifest, test fixture).
/// Consulted once per connection attempt.
pub trait ModuleSource: Send + Sync {
    /// Modules that opted into compatibility checking, in any order.
    fn enumerate_enforceable_modules(&self) -> Vec<ModuleDescriptor>;

    /// Version of the host application itself.
    fn current_base_application_version(&self) -> Version;

    /// Display-only build string. Empty disables the version-string check on the remote side.
    fn version_string(&self) -> String {
        String::new()
    }
}

/// In-process registry modules register themselves into at load time.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    base_version: Version,
    version_string: String,
    entries: Vec<(ModuleDescriptor, CompatibilityLevel)>,
}

impl ModuleRegistry {
    pub fn new(base_version: Version) -> Self {
        Self {
            base_version,
            version_string: String::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_version_string(mut self, version_string: impl Into<String>) -> Self {
        self.version_string = version_string.into();
        self
    }

    /// Register a module under a policy. The descriptor's presence flags are overwritten by `level`.
    /// Duplicates are rejected and the earlier registration is kept.
    pub fn register(
        &mut self,
        descriptor: ModuleDescriptor,
        level: CompatibilityLevel,
    ) -> Result<(), ModuleError> {
        if descriptor.name.is_empty() {
            tracing::warn!(target: "modsync::registry", "rejected module with empty name");
            return Err(ModuleError::EmptyName);
        }
        if self.entries.iter().any(|(d, _)| d.name == descriptor.name) {
            tracing::warn!(
                target: "modsync::registry",
                module = %descriptor.name,
                "duplicate module registration dropped"
            );
            return Err(ModuleError::Duplicate(descriptor.name));
        }
        tracing::debug!(
            target: "modsync::registry",
            module = %descriptor.name,
            version = %descriptor.version,
            ?level,
            "module registered"
        );
        self.entries.push((descriptor.with_level(level), level));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModuleSource for ModuleRegistry {
    fn enumerate_enforceable_modules(&self) -> Vec<ModuleDescriptor> {
        self.entries
            .iter()
            .filter(|(_, level)| level.is_enforceable())
            .map(|(d, _)| d.clone())
            .collect()
    }

    fn current_base_application_version(&self) -> Version {
        self.base_version
    }

    fn version_string(&self) -> String {
        self.version_string.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> ModuleDescriptor {
        ModuleDescriptor::new(name, Version::new(1, 0, 0), Strictness::Patch)
    }

    #[test]
    fn register_rejects_duplicates_and_keeps_first() {
        let mut reg = ModuleRegistry::new(Version::new(0, 217, 0));
        reg.register(module("Foo"), CompatibilityLevel::EveryoneMustHave)
            .unwrap();
        let mut dup = module("Foo");
        dup.version = Version::new(2, 0, 0);
        assert_eq!(
            reg.register(dup, CompatibilityLevel::ClientMustHave),
            Err(ModuleError::Duplicate("Foo".into()))
        );
        let mods = reg.enumerate_enforceable_modules();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].version, Version::new(1, 0, 0));
        assert!(mods[0].required_on_server && mods[0].required_on_client);
    }

    #[test]
    fn register_rejects_empty_name() {
        let mut reg = ModuleRegistry::default();
        assert_eq!(
            reg.register(module(""), CompatibilityLevel::EveryoneMustHave),
            Err(ModuleError::EmptyName)
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn not_enforced_modules_are_not_enumerated() {
        let mut reg = ModuleRegistry::default();
        reg.register(module("Cosmetic"), CompatibilityLevel::NotEnforced)
            .unwrap();
        reg.register(module("Core"), CompatibilityLevel::ServerMustHave)
            .unwrap();
        let mods = reg.enumerate_enforceable_modules();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].name, "Core");
        assert!(mods[0].required_on_server && !mods[0].required_on_client);
    }

    #[test]
    fn level_parsing() {
        assert_eq!(
            "client_must_have".parse::<CompatibilityLevel>().unwrap(),
            CompatibilityLevel::ClientMustHave
        );
        assert_eq!(
            "Everyone-Must-Have".parse::<CompatibilityLevel>().unwrap(),
            CompatibilityLevel::EveryoneMustHave
        );
        assert!("sometimes".parse::<CompatibilityLevel>().is_err());
    }
}
