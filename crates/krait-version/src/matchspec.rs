//! Textual package match specs.
//!
//! A match spec names a package and optionally constrains its version,
//! build string, build number, origin channel and content hashes, in the
//! conda surface syntax:
//!
//! ```text
//! numpy
//! numpy 1.21.*
//! numpy >=1.21,<2 py39*
//! numpy==1.21.2=py39hdbf815f_2
//! conda-forge/linux-64::numpy[version='>=1.21', build_number=2]
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

use crate::version_spec::{ParseVersionSpecError, VersionSpec};

/// Errors produced while parsing a match spec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseMatchSpecError {
    #[error("match spec is empty")]
    Empty,

    #[error("match spec `{0}` has no package name")]
    MissingName(String),

    #[error("invalid version constraint `{spec}`: {source}")]
    InvalidVersion {
        spec: String,
        #[source]
        source: ParseVersionSpecError,
    },

    #[error("invalid build number constraint `{0}`")]
    InvalidBuildNumber(String),

    #[error("invalid build pattern `{0}`")]
    InvalidBuildPattern(String),

    #[error("unterminated bracket section in `{0}`")]
    UnterminatedBracket(String),

    #[error("invalid bracket entry `{0}`")]
    InvalidBracketEntry(String),

    #[error("unexpected trailing tokens in `{0}`")]
    TrailingTokens(String),
}

fn version_error(spec: &str, source: ParseVersionSpecError) -> ParseMatchSpecError {
    ParseMatchSpecError::InvalidVersion {
        spec: spec.to_string(),
        source,
    }
}

/// Matches a string either exactly or against a `*` glob.
#[derive(Debug, Clone)]
pub struct StringMatcher {
    pattern: String,
    regex: Option<Regex>,
}

impl StringMatcher {
    /// Build a matcher from a pattern. A pattern containing `*` becomes a
    /// glob, anything else an exact comparison.
    pub fn parse(pattern: &str) -> Result<Self, ParseMatchSpecError> {
        let regex = if pattern.contains('*') {
            let translated = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
            let regex = Regex::new(&translated)
                .map_err(|_| ParseMatchSpecError::InvalidBuildPattern(pattern.to_string()))?;
            Some(regex)
        } else {
            None
        };
        Ok(StringMatcher {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The original pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, value: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(value),
            None => self.pattern == value,
        }
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for StringMatcher {}

impl Hash for StringMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

impl fmt::Display for StringMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Relational constraint over a build number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildNumberSpec {
    relation: NumRelation,
    value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NumRelation {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl BuildNumberSpec {
    pub fn matches(&self, build_number: u64) -> bool {
        match self.relation {
            NumRelation::Eq => build_number == self.value,
            NumRelation::Ne => build_number != self.value,
            NumRelation::Gt => build_number > self.value,
            NumRelation::Ge => build_number >= self.value,
            NumRelation::Lt => build_number < self.value,
            NumRelation::Le => build_number <= self.value,
        }
    }
}

impl FromStr for BuildNumberSpec {
    type Err = ParseMatchSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (relation, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (NumRelation::Ge, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (NumRelation::Le, rest)
        } else if let Some(rest) = s.strip_prefix("==") {
            (NumRelation::Eq, rest)
        } else if let Some(rest) = s.strip_prefix("!=") {
            (NumRelation::Ne, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (NumRelation::Gt, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (NumRelation::Lt, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (NumRelation::Eq, rest)
        } else {
            (NumRelation::Eq, s)
        };
        let value = rest
            .trim()
            .parse::<u64>()
            .map_err(|_| ParseMatchSpecError::InvalidBuildNumber(s.to_string()))?;
        Ok(BuildNumberSpec { relation, value })
    }
}

impl fmt::Display for BuildNumberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.relation {
            NumRelation::Eq => "",
            NumRelation::Ne => "!=",
            NumRelation::Gt => ">",
            NumRelation::Ge => ">=",
            NumRelation::Lt => "<",
            NumRelation::Le => "<=",
        };
        write!(f, "{op}{}", self.value)
    }
}

/// A parsed match spec.
///
/// Equality and hashing are structural over the parsed form, so two spec
/// strings that differ only in whitespace or operator spelling compare
/// equal after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchSpec {
    pub name: String,
    pub version: Option<VersionSpec>,
    pub build: Option<StringMatcher>,
    pub build_number: Option<BuildNumberSpec>,
    pub channel: Option<String>,
    pub subdir: Option<String>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
}

impl MatchSpec {
    /// A spec that matches every record of `name`.
    pub fn any_of(name: impl Into<String>) -> Self {
        MatchSpec {
            name: name.into(),
            version: None,
            build: None,
            build_number: None,
            channel: None,
            subdir: None,
            md5: None,
            sha256: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, ParseMatchSpecError> {
        input.parse()
    }

    /// The constraint portion of the spec without the package name, as
    /// used when rendering version sets.
    pub fn constraint_display(&self) -> ConstraintDisplay<'_> {
        ConstraintDisplay(self)
    }
}

/// Displays version, build and build-number constraints without the name.
pub struct ConstraintDisplay<'a>(&'a MatchSpec);

impl fmt::Display for ConstraintDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = self.0;
        let mut wrote = false;
        if let Some(version) = &spec.version {
            write!(f, "{version}")?;
            wrote = true;
        }
        if let Some(build) = &spec.build {
            if wrote {
                f.write_str(" ")?;
            }
            write!(f, "{build}")?;
            wrote = true;
        }
        if let Some(build_number) = &spec.build_number {
            if wrote {
                f.write_str(" ")?;
            }
            write!(f, "[build_number={build_number}]")?;
            wrote = true;
        }
        if !wrote {
            f.write_str("*")?;
        }
        Ok(())
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(channel) = &self.channel {
            f.write_str(channel)?;
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
            f.write_str("::")?;
        }
        f.write_str(&self.name)?;
        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }
        if let Some(build) = &self.build {
            write!(f, " {build}")?;
        }

        let mut attrs = Vec::new();
        if let Some(build_number) = &self.build_number {
            attrs.push(format!("build_number={build_number}"));
        }
        if self.channel.is_none() {
            if let Some(subdir) = &self.subdir {
                attrs.push(format!("subdir={subdir}"));
            }
        }
        if let Some(md5) = &self.md5 {
            attrs.push(format!("md5={md5}"));
        }
        if let Some(sha256) = &self.sha256 {
            attrs.push(format!("sha256={sha256}"));
        }
        if !attrs.is_empty() {
            write!(f, "[{}]", attrs.join(", "))?;
        }
        Ok(())
    }
}

fn parse_version_token(token: &str) -> Result<VersionSpec, ParseMatchSpecError> {
    token
        .parse::<VersionSpec>()
        .map_err(|e| version_error(token, e))
}

/// Split the version-and-build tail of a spec into its two constraints.
fn parse_version_and_build(
    rest: &str,
) -> Result<(Option<VersionSpec>, Option<StringMatcher>), ParseMatchSpecError> {
    let mut tokens: Vec<&str> = rest.split_whitespace().collect();

    // Tolerate a space between a relational operator and its operand.
    if tokens.len() > 1
        && tokens[0]
            .chars()
            .all(|c| matches!(c, '<' | '>' | '=' | '!' | '~'))
    {
        let merged = format!("{}{}", tokens[0], tokens[1]);
        return parse_version_and_build_tokens(&merged, tokens.get(2).copied(), tokens.len() > 3)
            .map_err(|e| match e {
                ParseMatchSpecError::TrailingTokens(_) => {
                    ParseMatchSpecError::TrailingTokens(rest.to_string())
                }
                other => other,
            });
    }

    let first = tokens.remove(0);
    parse_version_and_build_tokens(first, tokens.first().copied(), tokens.len() > 1).map_err(|e| {
        match e {
            ParseMatchSpecError::TrailingTokens(_) => {
                ParseMatchSpecError::TrailingTokens(rest.to_string())
            }
            other => other,
        }
    })
}

fn parse_version_and_build_tokens(
    version_token: &str,
    build_token: Option<&str>,
    trailing: bool,
) -> Result<(Option<VersionSpec>, Option<StringMatcher>), ParseMatchSpecError> {
    if trailing {
        return Err(ParseMatchSpecError::TrailingTokens(String::new()));
    }
    if let Some(build) = build_token {
        return Ok((
            Some(parse_version_token(version_token)?),
            Some(StringMatcher::parse(build)?),
        ));
    }

    // The collapsed `name=version=build` form: a leading `=` or `==`
    // followed by a second `=` separating the build pattern.
    let collapsed = if let Some(body) = version_token.strip_prefix("==") {
        body.split_once('=').map(|(v, b)| (format!("=={v}"), b))
    } else if let Some(body) = version_token.strip_prefix('=') {
        body.split_once('=').map(|(v, b)| (format!("={v}"), b))
    } else {
        None
    };
    match collapsed {
        Some((version, build)) => Ok((
            Some(parse_version_token(&version)?),
            Some(StringMatcher::parse(build)?),
        )),
        None => Ok((Some(parse_version_token(version_token)?), None)),
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('\'') && value.ends_with('\''))
            || (value.starts_with('"') && value.ends_with('"')))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Split bracket entries on commas, honoring single and double quotes.
fn split_bracket_entries(inner: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    for (i, c) in inner.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ',' => {
                entries.push(&inner[start..i]);
                start = i + 1;
            }
            None => {}
        }
    }
    entries.push(&inner[start..]);
    entries
}

fn apply_bracket(spec: &mut MatchSpec, inner: &str) -> Result<(), ParseMatchSpecError> {
    for entry in split_bracket_entries(inner) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| ParseMatchSpecError::InvalidBracketEntry(entry.to_string()))?;
        let value = unquote(value);
        match key.trim() {
            "name" => spec.name = value.to_string(),
            "version" => spec.version = Some(parse_version_token(value)?),
            "build" => spec.build = Some(StringMatcher::parse(value)?),
            "build_number" => spec.build_number = Some(value.parse()?),
            "channel" => spec.channel = Some(value.to_string()),
            "subdir" => spec.subdir = Some(value.to_string()),
            "md5" => spec.md5 = Some(value.to_string()),
            "sha256" => spec.sha256 = Some(value.to_string()),
            // Other attributes (url, license, fn, ...) are tolerated and
            // ignored.
            _ => {}
        }
    }
    Ok(())
}

impl FromStr for MatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ParseMatchSpecError::Empty);
        }

        // Peel off a trailing bracket section.
        let (text, bracket) = match text.strip_suffix(']') {
            Some(head) => match head.split_once('[') {
                Some((base, inner)) => (base.trim(), Some(inner)),
                None => {
                    return Err(ParseMatchSpecError::UnterminatedBracket(input.to_string()));
                }
            },
            None => {
                if text.contains('[') {
                    return Err(ParseMatchSpecError::UnterminatedBracket(input.to_string()));
                }
                (text, None)
            }
        };

        // Peel off a channel prefix.
        let (channel_part, text) = match text.split_once("::") {
            Some((channel, rest)) => (Some(channel.trim()), rest.trim()),
            None => (None, text),
        };
        let (channel, subdir) = match channel_part {
            Some(part) => match part.split_once('/') {
                Some((channel, subdir)) => {
                    (Some(channel.to_string()), Some(subdir.to_string()))
                }
                None => (Some(part.to_string()), None),
            },
            None => (None, None),
        };

        let name_end = text
            .find(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '=' | '!' | '~'))
            .unwrap_or(text.len());
        let name = text[..name_end].trim();
        if name.is_empty() {
            return Err(ParseMatchSpecError::MissingName(input.to_string()));
        }

        let mut spec = MatchSpec {
            name: name.to_string(),
            version: None,
            build: None,
            build_number: None,
            channel,
            subdir,
            md5: None,
            sha256: None,
        };

        let rest = text[name_end..].trim();
        if !rest.is_empty() {
            let (version, build) = parse_version_and_build(rest)?;
            spec.version = version;
            spec.build = build;
        }

        if let Some(inner) = bracket {
            apply_bracket(&mut spec, inner)?;
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn version(s: &str) -> VersionSpec {
        s.parse().unwrap()
    }

    #[test]
    fn test_name_only() {
        let parsed = spec("scikit-learn");
        assert_eq!(parsed.name, "scikit-learn");
        assert!(parsed.version.is_none());
        assert!(parsed.build.is_none());
    }

    #[test]
    fn test_name_and_version() {
        let parsed = spec("scikit-learn==1.5.0");
        assert_eq!(parsed.name, "scikit-learn");
        assert_eq!(parsed.version, Some(version("==1.5.0")));

        let parsed = spec("python >=3.10,<3.11");
        assert_eq!(parsed.name, "python");
        assert_eq!(parsed.version, Some(version(">=3.10,<3.11")));
    }

    #[test]
    fn test_operator_space_tolerated() {
        assert_eq!(spec("scikit-learn >= 1.5.0"), spec("scikit-learn>=1.5.0"));
        assert_eq!(spec("numpy > 1.21"), spec("numpy>1.21"));
    }

    #[test]
    fn test_version_and_build() {
        let parsed = spec("scikit-learn 1.5.* py310*");
        assert_eq!(parsed.version, Some(version("1.5.*")));
        assert!(parsed.build.as_ref().unwrap().matches("py310h981052a_0"));
        assert!(!parsed.build.as_ref().unwrap().matches("py39h0_0"));
    }

    #[test]
    fn test_collapsed_equals_form() {
        let parsed = spec("numpy=1.21=py39hdbf815f_2");
        assert_eq!(parsed.version, Some(version("=1.21")));
        assert!(parsed.build.as_ref().unwrap().matches("py39hdbf815f_2"));

        let parsed = spec("numpy==1.21.2=py39*");
        assert_eq!(parsed.version, Some(version("==1.21.2")));
        assert!(parsed.build.as_ref().unwrap().matches("py39hdbf815f_2"));
    }

    #[test]
    fn test_channel_prefix() {
        let parsed = spec("conda-forge::numpy >=1.21");
        assert_eq!(parsed.channel.as_deref(), Some("conda-forge"));
        assert_eq!(parsed.name, "numpy");

        let parsed = spec("conda-forge/linux-64::numpy");
        assert_eq!(parsed.channel.as_deref(), Some("conda-forge"));
        assert_eq!(parsed.subdir.as_deref(), Some("linux-64"));
    }

    #[test]
    fn test_brackets() {
        let parsed = spec("numpy[version='>=1.21,<2', build=py39*, build_number=>2]");
        assert_eq!(parsed.version, Some(version(">=1.21,<2")));
        assert!(parsed.build.as_ref().unwrap().matches("py39h_0"));
        assert!(parsed.build_number.unwrap().matches(3));
        assert!(!parsed.build_number.unwrap().matches(2));

        let parsed = spec("numpy[md5=0123abcd, sha256=deadbeef, subdir=noarch]");
        assert_eq!(parsed.md5.as_deref(), Some("0123abcd"));
        assert_eq!(parsed.sha256.as_deref(), Some("deadbeef"));
        assert_eq!(parsed.subdir.as_deref(), Some("noarch"));
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(spec("numpy >=1.21"), spec("numpy >= 1.21"));
        assert_eq!(spec("numpy  >=1.21"), spec("numpy>=1.21"));
        assert_ne!(spec("numpy >=1.21"), spec("numpy >1.21"));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            MatchSpec::parse(""),
            Err(ParseMatchSpecError::Empty)
        ));
        assert!(matches!(
            MatchSpec::parse(">=1.0"),
            Err(ParseMatchSpecError::MissingName(_))
        ));
        assert!(matches!(
            MatchSpec::parse("numpy[version=1.0"),
            Err(ParseMatchSpecError::UnterminatedBracket(_))
        ));
        assert!(matches!(
            MatchSpec::parse("numpy 1.0 py39 extra"),
            Err(ParseMatchSpecError::TrailingTokens(_))
        ));
        assert!(matches!(
            MatchSpec::parse("numpy[build_number=abc]"),
            Err(ParseMatchSpecError::InvalidBuildNumber(_))
        ));
    }

    #[test]
    fn test_display_round_trip() {
        assert_eq!(spec("numpy >=1.21,<2").to_string(), "numpy >=1.21,<2");
        assert_eq!(
            spec("conda-forge::numpy >=1.21").to_string(),
            "conda-forge::numpy >=1.21"
        );
        assert_eq!(
            spec("numpy 1.21.* py39*").to_string(),
            "numpy 1.21.* py39*"
        );
    }

    #[test]
    fn test_constraint_display_excludes_name() {
        assert_eq!(
            spec("numpy >=1.21,<2").constraint_display().to_string(),
            ">=1.21,<2"
        );
        assert_eq!(spec("numpy").constraint_display().to_string(), "*");
        assert_eq!(
            spec("numpy 1.21.* py39*").constraint_display().to_string(),
            "1.21.* py39*"
        );
    }
}
