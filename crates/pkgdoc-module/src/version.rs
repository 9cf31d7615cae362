//! Version parsing, ordering and display.
//!
//! Versions are parsed once into a [`Version`] and compared structurally.
//! String comparison is never used, so pseudo-versions and `+incompatible`
//! suffixes order correctly.
//!
//! # Ordering
//!
//! Concrete versions are ordered by:
//! 1. major, minor, patch
//! 2. pre-release presence (a pre-release sorts below its release)
//! 3. `+incompatible` (sorts below the compatible version with the same numbers)
//! 4. pre-release identifiers, per semantic versioning precedence
//!
//! A pseudo-version is a pre-release whose last identifier is
//! `yyyymmddhhmmss-hash`, so two pseudo-versions derived from the same base
//! order by commit timestamp, then by hash bytes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::ModuleError;

/// Symbolic version resolving to the latest known version.
pub const LATEST: &str = "latest";

/// Symbolic version resolving to the tip of the default branch.
pub const MASTER: &str = "master";

/// The only build metadata accepted on a module version.
const INCOMPATIBLE: &str = "incompatible";

/// Number of hash characters shown in a pseudo-version's display form.
const SHORT_HASH_LEN: usize = 7;

static PSEUDO_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{14})-([A-Za-z0-9]{7,})$").expect("invalid pseudo-version regex")
});

/// A dot-separated pre-release identifier.
///
/// Numeric identifiers sort below alphanumeric ones; numeric identifiers
/// compare numerically and alphanumeric ones compare by ASCII bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    /// Identifier made only of digits.
    Numeric(u64),
    /// Identifier containing at least one letter or hyphen.
    Alpha(String),
}

impl Identifier {
    fn parse(s: &str, original: &str) -> Result<Self, ModuleError> {
        if s.is_empty() {
            return Err(ModuleError::invalid_version(
                original,
                "empty pre-release identifier",
            ));
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(ModuleError::invalid_version(
                original,
                "invalid character in pre-release",
            ));
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return parse_number(s, original).map(Self::Numeric);
        }
        Ok(Self::Alpha(s.to_owned()))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Alpha(s) => f.write_str(s),
        }
    }
}

/// A semantic version in module form: `vMAJOR.MINOR.PATCH[-pre][+incompatible]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SemanticVersion {
    /// Major version.
    pub major: u64,
    /// Minor version.
    pub minor: u64,
    /// Patch version.
    pub patch: u64,
    /// Pre-release identifiers (empty for a release).
    pub prerelease: Vec<Identifier>,
    /// Whether the version carries the `+incompatible` suffix.
    pub incompatible: bool,
}

impl SemanticVersion {
    /// Create a release version.
    #[must_use]
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: Vec::new(),
            incompatible: false,
        }
    }

    /// Parse a semantic version.
    ///
    /// Accepts the shorthand forms `vMAJOR` and `vMAJOR.MINOR`, which are
    /// canonicalized to `vMAJOR.0.0` and `vMAJOR.MINOR.0`. Build metadata other
    /// than `+incompatible` is rejected.
    pub fn parse(s: &str) -> Result<Self, ModuleError> {
        let rest = s
            .strip_prefix('v')
            .ok_or_else(|| ModuleError::invalid_version(s, "missing leading 'v'"))?;

        let (rest, incompatible) = match rest.split_once('+') {
            Some((head, INCOMPATIBLE)) => (head, true),
            Some(_) => {
                return Err(ModuleError::invalid_version(
                    s,
                    "unsupported build metadata",
                ));
            }
            None => (rest, false),
        };

        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(ModuleError::invalid_version(
                s,
                "too many version components",
            ));
        }
        if parts.len() < 3 && (prerelease.is_some() || incompatible) {
            return Err(ModuleError::invalid_version(
                s,
                "shorthand version cannot carry a suffix",
            ));
        }

        let component = |index: usize| -> Result<u64, ModuleError> {
            parts.get(index).map_or(Ok(0), |part| parse_number(part, s))
        };
        let major = parse_number(parts[0], s)?;
        let minor = component(1)?;
        let patch = component(2)?;

        let prerelease = match prerelease {
            Some(pre) => pre
                .split('.')
                .map(|id| Identifier::parse(id, s))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            incompatible,
        })
    }

    /// Whether this version has pre-release identifiers.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| other.is_prerelease().cmp(&self.is_prerelease()))
            .then_with(|| other.incompatible.cmp(&self.incompatible))
            .then_with(|| self.prerelease.cmp(&other.prerelease))
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        for (i, id) in self.prerelease.iter().enumerate() {
            f.write_str(if i == 0 { "-" } else { "." })?;
            write!(f, "{id}")?;
        }
        if self.incompatible {
            write!(f, "+{INCOMPATIBLE}")?;
        }
        Ok(())
    }
}

/// A pseudo-version: a synthesized pre-release encoding a commit time and hash.
///
/// Recognized shapes:
/// - `vX.0.0-yyyymmddhhmmss-hash`
/// - `vX.Y.Z-pre.0.yyyymmddhhmmss-hash`
/// - `vX.Y.Z-0.yyyymmddhhmmss-hash`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PseudoVersion {
    semver: SemanticVersion,
    timestamp: NaiveDateTime,
    hash: String,
}

impl PseudoVersion {
    /// Inspect a parsed semantic version for the pseudo-version shape.
    fn detect(semver: &SemanticVersion, original: &str) -> Result<Option<(NaiveDateTime, String)>, ModuleError> {
        let Some(Identifier::Alpha(tail)) = semver.prerelease.last() else {
            return Ok(None);
        };
        let Some(caps) = PSEUDO_TAIL.captures(tail) else {
            return Ok(None);
        };

        let n = semver.prerelease.len();
        let shaped = (n == 1 && semver.minor == 0 && semver.patch == 0)
            || (n >= 2 && semver.prerelease[n - 2] == Identifier::Numeric(0));
        if !shaped {
            return Ok(None);
        }

        let timestamp = parse_timestamp(&caps[1]).ok_or_else(|| {
            ModuleError::invalid_version(original, "invalid pseudo-version timestamp")
        })?;
        Ok(Some((timestamp, caps[2].to_owned())))
    }

    /// Commit time embedded in the version (UTC).
    #[must_use]
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Full commit hash as written in the version.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The underlying semantic version.
    #[must_use]
    pub fn semver(&self) -> &SemanticVersion {
        &self.semver
    }

    /// Display form `vX.Y.Z-...-abcdef1`.
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "v{}.{}.{}-...-{}",
            self.semver.major,
            self.semver.minor,
            self.semver.patch,
            &self.hash[..SHORT_HASH_LEN]
        )
    }
}

/// A parsed version qualifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Version {
    /// `latest`: whatever version is currently newest.
    Latest,
    /// `master`: the tip of the default branch.
    Master,
    /// Pseudo-version derived from a commit.
    Pseudo(PseudoVersion),
    /// Tagged semantic version.
    Semantic(SemanticVersion),
}

impl Version {
    /// Parse a version qualifier.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidVersion`] when `s` is not `latest`,
    /// `master` or a valid semantic version.
    pub fn parse(s: &str) -> Result<Self, ModuleError> {
        match s {
            LATEST => Ok(Self::Latest),
            MASTER => Ok(Self::Master),
            _ => {
                let semver = SemanticVersion::parse(s)?;
                Ok(match PseudoVersion::detect(&semver, s)? {
                    Some((timestamp, hash)) => Self::Pseudo(PseudoVersion {
                        semver,
                        timestamp,
                        hash,
                    }),
                    None => Self::Semantic(semver),
                })
            }
        }
    }

    /// Whether this is `latest` or `master`.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Self::Latest | Self::Master)
    }

    /// Whether this is a pseudo-version.
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::Pseudo(_))
    }

    /// Semantic version backing a concrete version, `None` for symbolic ones.
    #[must_use]
    pub fn semver(&self) -> Option<&SemanticVersion> {
        match self {
            Self::Latest | Self::Master => None,
            Self::Pseudo(p) => Some(&p.semver),
            Self::Semantic(s) => Some(s),
        }
    }

    /// Compare two versions.
    ///
    /// Returns `None` when exactly one side is symbolic or the two sides are
    /// different symbolic versions; symbolic versions have no position in the
    /// order of concrete versions.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Latest, Self::Latest) | (Self::Master, Self::Master) => Some(Ordering::Equal),
            _ => Some(self.semver()?.cmp(other.semver()?)),
        }
    }

    /// Display form: pseudo-versions elide their timestamp, everything else
    /// renders canonically.
    #[must_use]
    pub fn format(&self) -> String {
        match self {
            Self::Pseudo(p) => p.format(),
            _ => self.to_string(),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(LATEST),
            Self::Master => f.write_str(MASTER),
            Self::Pseudo(p) => write!(f, "{}", p.semver),
            Self::Semantic(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for Version {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Something with a version that can take part in latest-version selection.
pub trait Candidate {
    /// The candidate's version.
    fn version(&self) -> &Version;

    /// Whether the candidate's content may be displayed.
    fn is_redistributable(&self) -> bool {
        true
    }
}

impl Candidate for Version {
    fn version(&self) -> &Version {
        self
    }
}

/// Select the latest candidate.
///
/// Releases always outrank pre-releases, and pre-releases outrank
/// pseudo-versions; within a tier the maximum under [`Version::compare`] wins.
/// When `prefer_redistributable` is set and at least one redistributable
/// candidate exists, non-redistributable candidates are ignored. Symbolic
/// versions are never selected.
pub fn pick_latest<T: Candidate>(candidates: &[T], prefer_redistributable: bool) -> Option<&T> {
    let concrete = || candidates.iter().filter(|c| c.version().semver().is_some());
    let only_redistributable = prefer_redistributable && concrete().any(Candidate::is_redistributable);

    concrete()
        .filter(|c| !only_redistributable || c.is_redistributable())
        .max_by(|a, b| {
            let (va, vb) = (a.version(), b.version());
            release_tier(va)
                .cmp(&release_tier(vb))
                .then_with(|| va.compare(vb).unwrap_or(Ordering::Equal))
        })
}

fn release_tier(version: &Version) -> u8 {
    match version {
        Version::Semantic(s) if !s.is_prerelease() => 2,
        Version::Semantic(_) => 1,
        _ => 0,
    }
}

fn parse_number(s: &str, original: &str) -> Result<u64, ModuleError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ModuleError::invalid_version(original, "expected a number"));
    }
    if s.len() > 1 && s.starts_with('0') {
        return Err(ModuleError::invalid_version(original, "leading zero in number"));
    }
    s.parse()
        .map_err(|_| ModuleError::invalid_version(original, "number out of range"))
}

fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    let field = |start: usize, end: usize| -> Option<u32> { ts.get(start..end)?.parse().ok() };
    let year = i32::try_from(field(0, 4)?).ok()?;
    NaiveDate::from_ymd_opt(year, field(4, 6)?, field(6, 8)?)?.and_hms_opt(
        field(8, 10)?,
        field(10, 12)?,
        field(12, 14)?,
    )
}
