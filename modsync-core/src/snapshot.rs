//! Compatibility snapshots: the full module set plus base version one peer announces.
//!
//! Encoding is bincode with fixed-width little-endian integers:
//! base version (3 x u32), version string (u64 length + UTF-8), module count (u64),
//! then per module: name, version triple, strictness tag (u32), required_on_server (u8),
//! required_on_client (u8). Trailing bytes are ignored so newer peers can append fields.

use std::collections::HashSet;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::module::{ModuleDescriptor, ModuleSource};
use crate::version::Version;

/// Upper bound on a decoded snapshot, in bytes.
pub const DEFAULT_MAX_SNAPSHOT_BYTES: u64 = 1024 * 1024; // 1 MiB

/// Modules plus base version known to one peer at negotiation time. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SnapshotWire")]
pub struct CompatibilitySnapshot {
    base_version: Version,
    version_string: String,
    modules: Vec<ModuleDescriptor>,
}

/// Field-for-field wire form. Decoded input goes through [`CompatibilitySnapshot::new`].
#[derive(Deserialize)]
struct SnapshotWire {
    base_version: Version,
    version_string: String,
    modules: Vec<ModuleDescriptor>,
}

impl From<SnapshotWire> for CompatibilitySnapshot {
    fn from(wire: SnapshotWire) -> Self {
        Self::new(wire.base_version, wire.version_string, wire.modules)
    }
}

impl CompatibilitySnapshot {
    /// Build from an arbitrary module list. Empty names and repeated names are dropped
    /// (first occurrence wins), the rest is sorted by name.
    pub fn new(
        base_version: Version,
        version_string: impl Into<String>,
        modules: impl IntoIterator<Item = ModuleDescriptor>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for module in modules {
            if module.name.is_empty() {
                tracing::warn!(target: "modsync::snapshot", "skipping module with empty name");
                continue;
            }
            if !seen.insert(module.name.clone()) {
                tracing::warn!(
                    target: "modsync::snapshot",
                    module = %module.name,
                    "duplicate module in enumeration, later entry dropped"
                );
                continue;
            }
            kept.push(module);
        }
        kept.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            base_version,
            version_string: version_string.into(),
            modules: kept,
        }
    }

    /// Zero base version, empty version string, no modules. What a malformed payload decodes to.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn base_version(&self) -> Version {
        self.base_version
    }

    /// Display-only; never used for decisions other than the version-string warning.
    pub fn version_string(&self) -> &str {
        &self.version_string
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Same base version and version string, no modules. Stands in for a peer that never
    /// sent a snapshot, so reports only list module presence problems.
    pub fn assumed_unextended(&self) -> Self {
        Self {
            base_version: self.base_version,
            version_string: self.version_string.clone(),
            modules: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match wire_options().serialize(self) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(target: "modsync::snapshot", "snapshot encode failed: {e}");
                Vec::new()
            }
        }
    }

    /// Decode, degrading to [`CompatibilitySnapshot::empty`] on any failure.
    pub fn decode(bytes: &[u8]) -> Self {
        Self::decode_with_limit(bytes, DEFAULT_MAX_SNAPSHOT_BYTES)
    }

    pub fn decode_with_limit(bytes: &[u8], limit: u64) -> Self {
        match Self::try_decode(bytes, limit) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!(
                    target: "modsync::snapshot",
                    len = bytes.len(),
                    "degraded snapshot decode: {e}"
                );
                Self::empty()
            }
        }
    }

    pub fn try_decode(bytes: &[u8], limit: u64) -> Result<Self, SnapshotDecodeError> {
        if bytes.is_empty() {
            return Err(SnapshotDecodeError::Empty);
        }
        let decoded: CompatibilitySnapshot = wire_options()
            .with_limit(limit)
            .deserialize(bytes)
            .map_err(SnapshotDecodeError::Decode)?;
        Ok(decoded)
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotDecodeError {
    #[error("empty payload")]
    Empty,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

/// Builds the local snapshot from the process's module enumeration.
pub struct LocalSnapshotBuilder<'a> {
    source: &'a dyn ModuleSource,
}

impl<'a> LocalSnapshotBuilder<'a> {
    pub fn new(source: &'a dyn ModuleSource) -> Self {
        Self { source }
    }

    pub fn build(&self) -> CompatibilitySnapshot {
        let snapshot = CompatibilitySnapshot::new(
            self.source.current_base_application_version(),
            self.source.version_string(),
            self.source.enumerate_enforceable_modules(),
        );
        tracing::debug!(
            target: "modsync::snapshot",
            base = %snapshot.base_version(),
            modules = snapshot.modules().len(),
            "built local snapshot"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{CompatibilityLevel, ModuleRegistry};
    use crate::version::Strictness;
    use proptest::prelude::*;

    fn sample() -> CompatibilitySnapshot {
        CompatibilitySnapshot::new(
            Version::new(0, 217, 22),
            "0.217.22 (build 14)",
            vec![
                ModuleDescriptor::new("Zeta", Version::new(2, 0, 1), Strictness::Major)
                    .required_on_client(true),
                ModuleDescriptor::new("Alpha", Version::new(1, 4, 0), Strictness::None)
                    .required_on_server(true)
                    .required_on_client(true),
            ],
        )
    }

    #[test]
    fn modules_sorted_by_name() {
        let s = sample();
        let names: Vec<&str> = s.modules().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn construction_drops_duplicates_and_empty_names() {
        let s = CompatibilitySnapshot::new(
            Version::ZERO,
            "",
            vec![
                ModuleDescriptor::new("Foo", Version::new(1, 0, 0), Strictness::Patch),
                ModuleDescriptor::new("", Version::new(1, 0, 0), Strictness::Patch),
                ModuleDescriptor::new("Foo", Version::new(9, 0, 0), Strictness::Patch),
            ],
        );
        assert_eq!(s.modules().len(), 1);
        assert_eq!(s.module("Foo").unwrap().version, Version::new(1, 0, 0));
    }

    fn encode_module(out: &mut Vec<u8>, name: &str, major: u32) {
        out.extend_from_slice(&(name.len() as u64).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        for n in [major, 0, 0] {
            out.extend_from_slice(&n.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(1);
        out.push(1);
    }

    #[test]
    fn decoded_remote_input_is_normalized() {
        let mut bytes = Vec::new();
        for n in [1u32, 0, 0] {
            bytes.extend_from_slice(&n.to_le_bytes());
        }
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&4u64.to_le_bytes());
        encode_module(&mut bytes, "Zed", 1);
        encode_module(&mut bytes, "Foo", 1);
        encode_module(&mut bytes, "Foo", 9);
        encode_module(&mut bytes, "", 1);

        let s = CompatibilitySnapshot::try_decode(&bytes, DEFAULT_MAX_SNAPSHOT_BYTES).unwrap();
        let names: Vec<&str> = s.modules().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Foo", "Zed"]);
        assert_eq!(s.module("Foo").unwrap().version, Version::new(1, 0, 0));

        let report = crate::compare::compare(&s, &s.assumed_unextended());
        assert_eq!(report.missing_on_joiner.len(), 2);
    }

    #[test]
    fn roundtrip_sample() {
        let s = sample();
        assert_eq!(CompatibilitySnapshot::decode(&s.encode()), s);
    }

    #[test]
    fn field_layout_is_fixed() {
        let s = CompatibilitySnapshot::new(
            Version::new(1, 2, 3),
            "v",
            vec![ModuleDescriptor::new("M", Version::new(4, 5, 6), Strictness::Major)
                .required_on_client(true)],
        );
        let bytes = s.encode();
        let mut expected = Vec::new();
        for n in [1u32, 2, 3] {
            expected.extend_from_slice(&n.to_le_bytes());
        }
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.push(b'v');
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.push(b'M');
        for n in [4u32, 5, 6] {
            expected.extend_from_slice(&n.to_le_bytes());
        }
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.push(0);
        expected.push(1);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn empty_and_malformed_payloads_degrade_to_empty() {
        assert_eq!(CompatibilitySnapshot::decode(&[]), CompatibilitySnapshot::empty());
        assert_eq!(
            CompatibilitySnapshot::decode(&[1, 2, 3]),
            CompatibilitySnapshot::empty()
        );
        let bytes = sample().encode();
        assert_eq!(
            CompatibilitySnapshot::decode(&bytes[..bytes.len() - 3]),
            CompatibilitySnapshot::empty()
        );
    }

    #[test]
    fn bogus_length_hits_limit_instead_of_allocating() {
        let mut bytes = Vec::new();
        for n in [1u32, 0, 0] {
            bytes.extend_from_slice(&n.to_le_bytes());
        }
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(CompatibilitySnapshot::try_decode(&bytes, 1024).is_err());
        assert_eq!(CompatibilitySnapshot::decode(&bytes), CompatibilitySnapshot::empty());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let s = sample();
        let mut bytes = s.encode();
        bytes.extend_from_slice(b"future fields");
        assert_eq!(CompatibilitySnapshot::decode(&bytes), s);
    }

    #[test]
    fn builder_handles_zero_modules() {
        let reg = ModuleRegistry::new(Version::new(0, 210, 0));
        let s = LocalSnapshotBuilder::new(&reg).build();
        assert!(s.modules().is_empty());
        assert_eq!(s.base_version(), Version::new(0, 210, 0));
    }

    #[test]
    fn builder_enumerates_registry_sorted() {
        let mut reg = ModuleRegistry::new(Version::new(0, 210, 0)).with_version_string("build-7");
        reg.register(
            ModuleDescriptor::new("b", Version::new(1, 0, 0), Strictness::Minor),
            CompatibilityLevel::EveryoneMustHave,
        )
        .unwrap();
        reg.register(
            ModuleDescriptor::new("a", Version::new(1, 0, 0), Strictness::Minor),
            CompatibilityLevel::ClientMustHave,
        )
        .unwrap();
        let s = LocalSnapshotBuilder::new(&reg).build();
        assert_eq!(s.version_string(), "build-7");
        assert_eq!(s.modules()[0].name, "a");
        assert_eq!(s.modules()[1].name, "b");
    }

    fn strictness() -> impl Strategy<Value = Strictness> {
        prop_oneof![
            Just(Strictness::Patch),
            Just(Strictness::Minor),
            Just(Strictness::Major),
            Just(Strictness::None),
        ]
    }

    fn descriptor() -> impl Strategy<Value = ModuleDescriptor> {
        (
            "[A-Za-z][A-Za-z0-9_.]{0,15}",
            any::<(u32, u32, u32)>(),
            strictness(),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(name, (ma, mi, pa), strictness, srv, cli)| {
                ModuleDescriptor::new(name, Version::new(ma, mi, pa), strictness)
                    .required_on_server(srv)
                    .required_on_client(cli)
            })
    }

    proptest! {
        #[test]
        fn decode_reproduces_encoded_snapshot(
            base in any::<(u32, u32, u32)>(),
            version_string in ".{0,24}",
            modules in proptest::collection::vec(descriptor(), 0..8),
        ) {
            let s = CompatibilitySnapshot::new(
                Version::new(base.0, base.1, base.2),
                version_string,
                modules,
            );
            prop_assert_eq!(CompatibilitySnapshot::decode(&s.encode()), s);
        }
    }
}
