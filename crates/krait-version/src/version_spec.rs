//! Boolean version constraints over [`Version`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::version::{ParseVersionError, Version};

/// Errors produced while parsing a version constraint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseVersionSpecError {
    #[error("constraint is empty")]
    Empty,

    #[error("invalid version in constraint: {0}")]
    InvalidVersion(#[from] ParseVersionError),

    #[error("`~=` requires a plain version, got `{0}`")]
    CompatibleReleaseGlob(String),

    #[error("unsupported glob pattern `{0}`")]
    UnsupportedGlob(String),
}

/// A predicate over versions.
///
/// `,` combines terms conjunctively and binds tighter than `|`, so
/// `>=1.0,<2.0|==3.0` reads as "(>=1.0 and <2.0) or ==3.0".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    /// Matches every version (`*`).
    Any,
    /// `==v`, or a bare version.
    Exact(Version),
    /// `!=v`.
    NotEqual(Version),
    /// `>v`.
    Greater(Version),
    /// `>=v`.
    GreaterEq(Version),
    /// `<v`.
    Less(Version),
    /// `<=v`.
    LessEq(Version),
    /// `v.*`, `v*` or the fuzzy `=v`.
    StartsWith(Version),
    /// `!=v.*`.
    NotStartsWith(Version),
    /// `~=v`: at least `v`, within the release series of `v` minus its
    /// last segment.
    Compatible(Version),
    /// Comma-joined conjunction.
    And(Vec<VersionSpec>),
    /// Pipe-joined disjunction.
    Or(Vec<VersionSpec>),
}

impl VersionSpec {
    /// Evaluate the predicate against a concrete version.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Exact(v) => version == v,
            VersionSpec::NotEqual(v) => version != v,
            VersionSpec::Greater(v) => version > v,
            VersionSpec::GreaterEq(v) => version >= v,
            VersionSpec::Less(v) => version < v,
            VersionSpec::LessEq(v) => version <= v,
            VersionSpec::StartsWith(v) => version.starts_with(v),
            VersionSpec::NotStartsWith(v) => !version.starts_with(v),
            VersionSpec::Compatible(v) => {
                version >= v
                    && (v.segment_count() <= 1
                        || version.starts_with_segments(v, v.segment_count() - 1))
            }
            VersionSpec::And(terms) => terms.iter().all(|t| t.matches(version)),
            VersionSpec::Or(terms) => terms.iter().any(|t| t.matches(version)),
        }
    }
}

/// Strip a trailing glob (`*` or `.*`) from a term, returning the prefix
/// when one was present.
fn strip_glob(term: &str) -> Option<&str> {
    let prefix = term.strip_suffix('*')?;
    Some(prefix.strip_suffix('.').unwrap_or(prefix))
}

fn parse_term(term: &str) -> Result<VersionSpec, ParseVersionSpecError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(ParseVersionSpecError::Empty);
    }
    if term == "*" {
        return Ok(VersionSpec::Any);
    }

    if let Some(rest) = term.strip_prefix("==") {
        return match strip_glob(rest) {
            Some(prefix) => Ok(VersionSpec::StartsWith(prefix.parse()?)),
            None => Ok(VersionSpec::Exact(rest.parse()?)),
        };
    }
    if let Some(rest) = term.strip_prefix("!=") {
        return match strip_glob(rest) {
            Some(prefix) => Ok(VersionSpec::NotStartsWith(prefix.parse()?)),
            None => Ok(VersionSpec::NotEqual(rest.parse()?)),
        };
    }
    if let Some(rest) = term.strip_prefix(">=") {
        return Ok(VersionSpec::GreaterEq(rest.parse()?));
    }
    if let Some(rest) = term.strip_prefix("<=") {
        return Ok(VersionSpec::LessEq(rest.parse()?));
    }
    if let Some(rest) = term.strip_prefix("~=") {
        if rest.contains('*') {
            return Err(ParseVersionSpecError::CompatibleReleaseGlob(
                term.to_string(),
            ));
        }
        return Ok(VersionSpec::Compatible(rest.parse()?));
    }
    if let Some(rest) = term.strip_prefix('>') {
        return Ok(VersionSpec::Greater(rest.parse()?));
    }
    if let Some(rest) = term.strip_prefix('<') {
        return Ok(VersionSpec::Less(rest.parse()?));
    }
    if let Some(rest) = term.strip_prefix('=') {
        // Fuzzy single `=`: matches the whole release series.
        let prefix = strip_glob(rest).unwrap_or(rest);
        return Ok(VersionSpec::StartsWith(prefix.parse()?));
    }

    match strip_glob(term) {
        Some(prefix) => {
            if prefix.contains('*') {
                Err(ParseVersionSpecError::UnsupportedGlob(term.to_string()))
            } else {
                Ok(VersionSpec::StartsWith(prefix.parse()?))
            }
        }
        None => Ok(VersionSpec::Exact(term.parse()?)),
    }
}

fn parse_and(text: &str) -> Result<VersionSpec, ParseVersionSpecError> {
    let mut terms = text
        .split(',')
        .map(parse_term)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        VersionSpec::And(terms)
    })
}

impl FromStr for VersionSpec {
    type Err = ParseVersionSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseVersionSpecError::Empty);
        }
        let mut groups = s
            .split('|')
            .map(parse_and)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if groups.len() == 1 {
            groups.remove(0)
        } else {
            VersionSpec::Or(groups)
        })
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Any => f.write_str("*"),
            VersionSpec::Exact(v) => write!(f, "=={v}"),
            VersionSpec::NotEqual(v) => write!(f, "!={v}"),
            VersionSpec::Greater(v) => write!(f, ">{v}"),
            VersionSpec::GreaterEq(v) => write!(f, ">={v}"),
            VersionSpec::Less(v) => write!(f, "<{v}"),
            VersionSpec::LessEq(v) => write!(f, "<={v}"),
            VersionSpec::StartsWith(v) => write!(f, "{v}.*"),
            VersionSpec::NotStartsWith(v) => write!(f, "!={v}.*"),
            VersionSpec::Compatible(v) => write!(f, "~={v}"),
            VersionSpec::And(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{term}")?;
                }
                Ok(())
            }
            VersionSpec::Or(groups) => {
                for (i, group) in groups.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{group}")?;
                }
                Ok(())
            }
        }
    }
}
