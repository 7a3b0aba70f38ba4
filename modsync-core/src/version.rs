//! Version triples and strictness-truncated comparison.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Semantic version triple. Ordered lexicographically (major, minor, patch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const ZERO: Version = Version::new(0, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Render only the components that `strictness` looks at, e.g. `1.2.x` for Minor.
    pub fn display_at(&self, strictness: Strictness) -> String {
        match strictness {
            Strictness::Patch => self.to_string(),
            Strictness::Minor => format!("{}.{}.x", self.major, self.minor),
            Strictness::Major => format!("{}.x", self.major),
            Strictness::None => "*".to_string(),
        }
    }

    fn truncated(&self, strictness: Strictness) -> (u32, u32, u32) {
        match strictness {
            Strictness::Patch => (self.major, self.minor, self.patch),
            Strictness::Minor => (self.major, self.minor, 0),
            Strictness::Major => (self.major, 0, 0),
            Strictness::None => (0, 0, 0),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Accepts `M`, `M.m` or `M.m.p`, with an optional leading `v`. Missing parts are 0.
impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(VersionParseError::Empty);
        }
        let mut parts = [0u32; 3];
        let mut count = 0usize;
        for piece in body.split('.') {
            if count == parts.len() {
                return Err(VersionParseError::TooManyParts(s.to_string()));
            }
            parts[count] = piece
                .parse::<u32>()
                .map_err(|_| VersionParseError::InvalidNumber(piece.to_string()))?;
            count += 1;
        }
        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    #[error("empty version string")]
    Empty,
    #[error("invalid version component {0:?}")]
    InvalidNumber(String),
    #[error("too many version components in {0:?}")]
    TooManyParts(String),
    #[error("unknown strictness {0:?} (expected patch, minor, major or none)")]
    UnknownStrictness(String),
}

/// Precision at which a version mismatch counts. Wire tags: 0=Patch, 1=Minor, 2=Major, 3=None.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    #[default]
    Patch,
    Minor,
    Major,
    None,
}

impl FromStr for Strictness {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patch" => Ok(Strictness::Patch),
            "minor" => Ok(Strictness::Minor),
            "major" => Ok(Strictness::Major),
            "none" => Ok(Strictness::None),
            _ => Err(VersionParseError::UnknownStrictness(s.to_string())),
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strictness::Patch => "patch",
            Strictness::Minor => "minor",
            Strictness::Major => "major",
            Strictness::None => "none",
        };
        f.write_str(s)
    }
}

/// Result of comparing one version against a reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VersionOrdering {
    #[default]
    Equal,
    Lower,
    Higher,
}

impl VersionOrdering {
    pub fn is_equal(self) -> bool {
        self == VersionOrdering::Equal
    }
}

impl From<Ordering> for VersionOrdering {
    fn from(o: Ordering) -> Self {
        match o {
            Ordering::Less => VersionOrdering::Lower,
            Ordering::Equal => VersionOrdering::Equal,
            Ordering::Greater => VersionOrdering::Higher,
        }
    }
}

/// Compare `a` against `b`, both truncated to the precision of `strictness`.
pub fn compare_versions(a: &Version, b: &Version, strictness: Strictness) -> VersionOrdering {
    a.truncated(strictness).cmp(&b.truncated(strictness)).into()
}
