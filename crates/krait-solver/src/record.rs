//! Package records and their containment predicate.

use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use krait_version::{MatchSpec, Version};

/// Conda's cutoff between seconds and milliseconds: timestamps larger than
/// the year 9999 in seconds are interpreted as milliseconds.
const MAX_SECONDS_TIMESTAMP: u64 = 253_402_300_799;

/// How a record participates in platform selection.
///
/// The tag is carried through from the repodata but is not consulted
/// during containment checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoArch {
    /// A regular, platform-specific package.
    #[default]
    No,
    /// Installable on any platform.
    Generic,
    /// Installable on any platform, with python-specific path mapping.
    Python,
}

impl NoArch {
    pub fn is_noarch(&self) -> bool {
        !matches!(self, NoArch::No)
    }
}

/// A single installable package as described by the repodata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub version: Version,
    pub build_string: String,
    pub build_number: u64,
    pub subdir: Option<String>,
    pub size: Option<u64>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
    pub license: Option<String>,
    pub noarch: NoArch,
    /// Normalized to seconds.
    pub timestamp: Option<u64>,
    pub depends: Vec<String>,
    pub constrains: Vec<String>,
    pub track_features: Vec<String>,
    pub package_url: Option<String>,
    pub channel: Option<String>,
    /// Raw signature blob from the repodata, kept only when verification
    /// was requested.
    pub signatures: Option<String>,
}

impl PackageRecord {
    /// Build a minimal record from the mandatory fields. Used by tests and
    /// virtual-package injection; repodata ingestion fills in the rest.
    pub fn new(
        name: impl Into<String>,
        version: Version,
        build_string: impl Into<String>,
        build_number: u64,
    ) -> Self {
        PackageRecord {
            name: name.into(),
            version,
            build_string: build_string.into(),
            build_number,
            subdir: None,
            size: None,
            md5: None,
            sha256: None,
            license: None,
            noarch: NoArch::No,
            timestamp: None,
            depends: Vec::new(),
            constrains: Vec::new(),
            track_features: Vec::new(),
            package_url: None,
            channel: None,
            signatures: None,
        }
    }

    /// Whether this record is matched by `spec`, ignoring the spec's
    /// channel and subdir fields. Channels are deliberately not compared
    /// so that a single solve can span several of them.
    pub fn matches_except_channel(&self, spec: &MatchSpec) -> bool {
        if spec.name != self.name {
            return false;
        }
        if let Some(version) = &spec.version {
            if !version.matches(&self.version) {
                return false;
            }
        }
        if let Some(build) = &spec.build {
            if !build.matches(&self.build_string) {
                return false;
            }
        }
        if let Some(build_number) = &spec.build_number {
            if !build_number.matches(self.build_number) {
                return false;
            }
        }
        if let Some(md5) = &spec.md5 {
            if self.md5.as_deref() != Some(md5.as_str()) {
                return false;
            }
        }
        if let Some(sha256) = &spec.sha256 {
            if self.sha256.as_deref() != Some(sha256.as_str()) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.version, self.build_string)
    }
}

/// The wire shape of one repodata entry. Mandatory fields are optional
/// here so that a malformed entry can be skipped instead of failing the
/// whole document.
#[derive(Debug, Deserialize)]
pub(crate) struct RawRecord {
    pub name: Option<String>,
    pub version: Option<String>,
    pub build: Option<String>,
    pub build_number: Option<u64>,
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default, deserialize_with = "deserialize_noarch")]
    pub noarch: NoArch,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub constrains: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_track_features")]
    pub track_features: Vec<String>,
}

/// `noarch` appears as a bool in very old repodata and as a string in
/// current repodata.
fn deserialize_noarch<'de, D>(deserializer: D) -> Result<NoArch, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => NoArch::No,
        Some(Value::Bool(true)) => NoArch::Generic,
        Some(Value::Bool(false)) => NoArch::No,
        Some(Value::String(s)) => match s.as_str() {
            "python" => NoArch::Python,
            "generic" => NoArch::Generic,
            _ => NoArch::No,
        },
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "unexpected noarch value: {other}"
            )));
        }
    })
}

/// Timestamps are a mix of seconds and milliseconds in the wild; values
/// past the representable-seconds range are scaled down.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<u64>::deserialize(deserializer)?;
    Ok(value.map(|ts| {
        if ts > MAX_SECONDS_TIMESTAMP {
            ts / 1000
        } else {
            ts
        }
    }))
}

/// `track_features` appears both as a list and as a comma or whitespace
/// delimited string.
fn deserialize_track_features<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(serde::de::Error::custom(format!(
                    "unexpected track_features entry: {other}"
                ))),
            })
            .collect(),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected track_features value: {other}"
        ))),
    }
}
