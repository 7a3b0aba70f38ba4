//! Comparator: diff a host snapshot against a joiner snapshot.

use crate::module::ModuleDescriptor;
use crate::snapshot::CompatibilitySnapshot;
use crate::version::{compare_versions, VersionOrdering};

/// Structured diff between a host (server) and a joiner (client) snapshot.
///
/// All orderings are relative to the joiner: `too_low_on_joiner` means the joiner's copy
/// is older than the host's, `base_version_mismatch == Lower` means the joiner runs an
/// older base application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscrepancyReport {
    /// Host modules the joiner must have but does not (host descriptors).
    pub missing_on_joiner: Vec<ModuleDescriptor>,
    /// Joiner modules the host must have but does not (joiner descriptors).
    pub extra_on_joiner: Vec<ModuleDescriptor>,
    /// Host descriptors of modules the joiner has in an older version.
    pub too_low_on_joiner: Vec<ModuleDescriptor>,
    /// Host descriptors of modules the joiner has in a newer version.
    pub too_high_on_joiner: Vec<ModuleDescriptor>,
    pub base_version_mismatch: VersionOrdering,
    pub version_string_mismatch: bool,
}

impl DiscrepancyReport {
    pub fn is_compatible(&self) -> bool {
        self.missing_on_joiner.is_empty()
            && self.extra_on_joiner.is_empty()
            && self.too_low_on_joiner.is_empty()
            && self.too_high_on_joiner.is_empty()
            && self.base_version_mismatch.is_equal()
    }
}

/// Classify every discrepancy between `server` and `client`.
///
/// Version comparisons use the server descriptor's strictness, and only modules the
/// server descriptor enforces (required on either side) are version-checked.
pub fn compare(server: &CompatibilitySnapshot, client: &CompatibilitySnapshot) -> DiscrepancyReport {
    let mut report = DiscrepancyReport::default();

    for module in server.modules() {
        match client.module(&module.name) {
            None => {
                if module.required_on_client {
                    report.missing_on_joiner.push(module.clone());
                }
            }
            Some(theirs) => {
                if !module.is_enforced() {
                    continue;
                }
                match compare_versions(&theirs.version, &module.version, module.strictness) {
                    VersionOrdering::Lower => report.too_low_on_joiner.push(module.clone()),
                    VersionOrdering::Higher => report.too_high_on_joiner.push(module.clone()),
                    VersionOrdering::Equal => {}
                }
            }
        }
    }

    for module in client.modules() {
        if server.module(&module.name).is_none() && module.required_on_server {
            report.extra_on_joiner.push(module.clone());
        }
    }

    report.base_version_mismatch = client.base_version().cmp(&server.base_version()).into();
    report.version_string_mismatch = report.base_version_mismatch.is_equal()
        && !server.version_string().is_empty()
        && server.version_string() != client.version_string();

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{Strictness, Version};

    const BASE: Version = Version::new(0, 210, 0);

    fn snap(modules: Vec<ModuleDescriptor>) -> CompatibilitySnapshot {
        CompatibilitySnapshot::new(BASE, "", modules)
    }

    fn enforced(name: &str, v: Version, strictness: Strictness) -> ModuleDescriptor {
        ModuleDescriptor::new(name, v, strictness)
            .required_on_server(true)
            .required_on_client(true)
    }

    #[test]
    fn identical_snapshots_are_compatible() {
        let s = snap(vec![enforced("Foo", Version::new(1, 0, 0), Strictness::Patch)]);
        let r = compare(&s, &s);
        assert!(r.is_compatible());
        assert_eq!(r, DiscrepancyReport::default());
    }

    #[test]
    fn missing_module_on_joiner() {
        let server = snap(vec![ModuleDescriptor::new(
            "Foo",
            Version::new(1, 0, 0),
            Strictness::Patch,
        )
        .required_on_client(true)]);
        let client = snap(vec![]);
        let r = compare(&server, &client);
        assert_eq!(r.missing_on_joiner.len(), 1);
        assert_eq!(r.missing_on_joiner[0].name, "Foo");
        assert!(!r.is_compatible());
    }

    #[test]
    fn extra_module_on_joiner() {
        let server = snap(vec![]);
        let client = snap(vec![ModuleDescriptor::new(
            "Bar",
            Version::new(2, 0, 0),
            Strictness::Patch,
        )
        .required_on_server(true)]);
        let r = compare(&server, &client);
        assert_eq!(r.extra_on_joiner.len(), 1);
        assert_eq!(r.extra_on_joiner[0].name, "Bar");
        assert!(!r.is_compatible());
    }

    #[test]
    fn unrequired_module_never_reported() {
        let loose = |v| ModuleDescriptor::new("Loose", v, Strictness::Patch);
        let a = snap(vec![loose(Version::new(1, 0, 0))]);
        let b = snap(vec![loose(Version::new(3, 1, 4))]);
        let none = snap(vec![]);
        for (s, c) in [(&a, &b), (&b, &a), (&a, &none), (&none, &a)] {
            let r = compare(s, c);
            assert!(r.is_compatible());
            assert_eq!(r, DiscrepancyReport::default());
        }
    }

    #[test]
    fn server_strictness_governs() {
        let server = snap(vec![enforced("Foo", Version::new(1, 2, 3), Strictness::Minor)]);
        let client = snap(vec![enforced("Foo", Version::new(1, 2, 9), Strictness::Patch)]);
        assert!(compare(&server, &client).is_compatible());

        let server = snap(vec![enforced("Foo", Version::new(1, 2, 3), Strictness::Patch)]);
        let client = snap(vec![enforced("Foo", Version::new(1, 2, 9), Strictness::Minor)]);
        let r = compare(&server, &client);
        assert_eq!(r.too_high_on_joiner.len(), 1);
        assert!(r.too_low_on_joiner.is_empty());
    }

    #[test]
    fn too_low_reports_server_descriptor() {
        let server = snap(vec![enforced("Foo", Version::new(2, 0, 0), Strictness::Major)]);
        let client = snap(vec![enforced("Foo", Version::new(1, 9, 9), Strictness::Major)]);
        let r = compare(&server, &client);
        assert_eq!(r.too_low_on_joiner, vec![server.modules()[0].clone()]);
    }

    #[test]
    fn base_version_precedence() {
        let m = enforced("Foo", Version::new(1, 0, 0), Strictness::Patch);
        let server = CompatibilitySnapshot::new(Version::new(0, 210, 0), "", vec![m.clone()]);
        let client = CompatibilitySnapshot::new(Version::new(0, 209, 0), "", vec![m]);
        let r = compare(&server, &client);
        assert_eq!(r.base_version_mismatch, VersionOrdering::Lower);
        assert!(!r.is_compatible());
        assert!(r.missing_on_joiner.is_empty() && r.too_low_on_joiner.is_empty());
    }

    #[test]
    fn version_string_only_flagged_when_base_matches() {
        let server = CompatibilitySnapshot::new(BASE, "build-2", vec![]);
        let client = CompatibilitySnapshot::new(BASE, "build-1", vec![]);
        let r = compare(&server, &client);
        assert!(r.version_string_mismatch);
        assert!(r.is_compatible());

        let older = CompatibilitySnapshot::new(Version::new(0, 1, 0), "build-1", vec![]);
        assert!(!compare(&server, &older).version_string_mismatch);

        let silent = CompatibilitySnapshot::new(BASE, "", vec![]);
        assert!(!compare(&silent, &client).version_string_mismatch);
    }

    #[test]
    fn findings_follow_server_order() {
        let server = snap(vec![
            enforced("c", Version::new(1, 0, 0), Strictness::Patch),
            enforced("a", Version::new(1, 0, 0), Strictness::Patch),
            enforced("b", Version::new(1, 0, 0), Strictness::Patch),
        ]);
        let r = compare(&server, &snap(vec![]));
        let names: Vec<&str> = r.missing_on_joiner.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn compare_is_idempotent() {
        let server = snap(vec![
            enforced("Foo", Version::new(1, 0, 0), Strictness::Patch),
            enforced("Baz", Version::new(3, 0, 0), Strictness::Major),
        ]);
        let client = snap(vec![
            enforced("Baz", Version::new(2, 0, 0), Strictness::Patch),
            enforced("Qux", Version::new(1, 0, 0), Strictness::Patch),
        ]);
        let first = compare(&server, &client);
        let second = compare(&server, &client);
        assert_eq!(first, second);
        assert!(!first.is_compatible());
    }
}
