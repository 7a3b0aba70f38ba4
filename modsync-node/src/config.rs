//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::Context;
use modsync_core::{CompatibilityLevel, Strictness};
use serde::Deserialize;

/// Node configuration. File: `--config PATH`, else ~/.config/modsync/config.toml, else
/// /etc/modsync/config.toml. Env overrides: MODSYNC_PORT, MODSYNC_BASE_VERSION.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host listen port (default 2456).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Version of the application itself, "M.m.p".
    #[serde(default = "default_base_version")]
    pub base_version: String,
    /// Display-only build string. Empty disables the build check on the other side.
    #[serde(default)]
    pub version_string: String,
    /// Name sent to the host when joining.
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Seconds a connection may spend in the handshake before it is dropped.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Largest remote snapshot decoded; bigger ones count as empty.
    #[serde(default = "default_max_snapshot_bytes")]
    pub max_snapshot_bytes: u64,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleEntry>,
}

/// One `[[module]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntry {
    pub name: String,
    pub version: String,
    /// patch | minor | major | none
    #[serde(default)]
    pub strictness: Strictness,
    /// everyone-must-have | client-must-have | server-must-have | not-enforced
    #[serde(default = "default_level")]
    pub level: CompatibilityLevel,
}

fn default_port() -> u16 {
    2456
}
fn default_base_version() -> String {
    "0.1.0".to_string()
}
fn default_display_name() -> String {
    "modsync-node".to_string()
}
fn default_handshake_timeout_secs() -> u64 {
    30
}
fn default_max_snapshot_bytes() -> u64 {
    modsync_core::snapshot::DEFAULT_MAX_SNAPSHOT_BYTES
}
fn default_level() -> CompatibilityLevel {
    CompatibilityLevel::EveryoneMustHave
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_version: default_base_version(),
            version_string: String::new(),
            display_name: default_display_name(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            max_snapshot_bytes: default_max_snapshot_bytes(),
            modules: Vec::new(),
        }
    }
}

/// Load config: default, then config file (explicit path, or the first existing default
/// path), then env vars. An explicit path that is missing or unreadable is an error.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(path) => load_file(path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => load_file(&path)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn load_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let c = toml::from_str::<Config>(&s)
        .with_context(|| format!("parsing config {}", path.display()))?;
    tracing::debug!(path = %path.display(), modules = c.modules.len(), "config loaded");
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("MODSYNC_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.port = p,
            Err(_) => tracing::warn!(value = %s, "ignoring invalid MODSYNC_PORT"),
        }
    }
    if let Some(s) = var("MODSYNC_BASE_VERSION") {
        c.base_version = s;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/modsync/config.toml"));
    }
    out.push(PathBuf::from("/etc/modsync/config.toml"));
    out
}
