//! Conda version strings and their total order.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a version string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseVersionError {
    #[error("version string is empty")]
    Empty,

    #[error("invalid character `{0}` in version string")]
    InvalidCharacter(char),

    #[error("epoch `{0}` is not a number")]
    InvalidEpoch(String),

    #[error("version string contains more than one `!`")]
    DuplicateEpochSeparator,

    #[error("version string contains more than one `+`")]
    DuplicateLocalSeparator,

    #[error("version string contains an empty segment")]
    EmptySegment,

    #[error("numeral `{0}` is too large")]
    NumberOverflow(String),
}

/// A single numeral or literal run inside a version segment.
///
/// The ordering between variants encodes conda's rules: `dev` sorts before
/// everything, `post` after everything, and literals sort before numerals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Component {
    Dev,
    Literal(String),
    Num(u64),
    Post,
}

impl Component {
    fn is_zero(&self) -> bool {
        matches!(self, Component::Num(0))
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        use Component::*;
        match (self, other) {
            (Dev, Dev) => Ordering::Equal,
            (Dev, _) => Ordering::Less,
            (_, Dev) => Ordering::Greater,
            (Post, Post) => Ordering::Equal,
            (Post, _) => Ordering::Greater,
            (_, Post) => Ordering::Less,
            (Literal(a), Literal(b)) => a.cmp(b),
            (Literal(_), Num(_)) => Ordering::Less,
            (Num(_), Literal(_)) => Ordering::Greater,
            (Num(a), Num(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type Segment = Vec<Component>;

/// A parsed conda version: `[epoch!]version[+local]`.
///
/// Comparison follows conda's rules exactly. Versions are lowercased, `-`
/// is rewritten to `_`, segments are split on `.` and decomposed into
/// alternating numeral and literal runs. A segment that starts with a
/// literal gets an implicit leading zero, so `1.a` and `1.0a` are the same
/// version. Missing trailing segments behave as zeros, which makes
/// `1.1 == 1.1.0`.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    epoch: u64,
    segments: Vec<Segment>,
    local: Vec<Segment>,
}

impl Version {
    /// The original version text as supplied by the caller.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The epoch, defaulting to zero when the string carried none.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of segments in the main version part.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Whether this version lies in the set described by `prefix` followed
    /// by an arbitrary suffix (the `1.7.*` style of matching).
    ///
    /// All but the last prefix segment must compare equal to the
    /// corresponding segment here; the last one must be a component-wise
    /// prefix of its counterpart.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        self.starts_with_segments(prefix, prefix.segments.len())
    }

    /// Like [`Version::starts_with`] but only considering the first
    /// `count` segments of `prefix`. Used for compatible-release matching.
    pub(crate) fn starts_with_segments(&self, prefix: &Version, count: usize) -> bool {
        if self.epoch != prefix.epoch {
            return false;
        }
        let count = count.min(prefix.segments.len());
        for (i, pat) in prefix.segments[..count].iter().enumerate() {
            let own = self.segments.get(i).map(Vec::as_slice).unwrap_or(&[]);
            let last = i + 1 == count;
            // Intermediate segments compare with zero padding on both
            // sides; the final one only requires the pattern components to
            // be present.
            let width = if last {
                pat.len()
            } else {
                pat.len().max(own.len())
            };
            for j in 0..width {
                if cmp_filled(own.get(j), pat.get(j)) != Ordering::Equal {
                    return false;
                }
            }
        }
        true
    }

    fn canonical_segments(segments: &[Segment]) -> Vec<&[Component]> {
        let mut out: Vec<&[Component]> = segments
            .iter()
            .map(|seg| {
                let end = seg
                    .iter()
                    .rposition(|c| !c.is_zero())
                    .map(|i| i + 1)
                    .unwrap_or(0);
                &seg[..end]
            })
            .collect();
        while out.last().is_some_and(|seg| seg.is_empty()) {
            out.pop();
        }
        out
    }
}

fn cmp_filled(a: Option<&Component>, b: Option<&Component>) -> Ordering {
    const FILL: Component = Component::Num(0);
    a.unwrap_or(&FILL).cmp(b.unwrap_or(&FILL))
}

fn cmp_segment_lists(a: &[Segment], b: &[Segment]) -> Ordering {
    let outer = a.len().max(b.len());
    for i in 0..outer {
        let left = a.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let right = b.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let inner = left.len().max(right.len()).max(1);
        for j in 0..inner {
            match cmp_filled(left.get(j), right.get(j)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_segment_lists(&self.segments, &other.segments))
            .then_with(|| cmp_segment_lists(&self.local, &other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Hash the canonical form so that versions that compare equal
        // (`1.1` and `1.1.0`) also hash equally.
        self.epoch.hash(state);
        Version::canonical_segments(&self.segments).hash(state);
        Version::canonical_segments(&self.local).hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_segment(text: &str) -> Result<Segment, ParseVersionError> {
    if text.is_empty() {
        return Err(ParseVersionError::EmptySegment);
    }
    let mut components = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let numeric = rest.chars().next().is_some_and(|c| c.is_ascii_digit());
        let run_len = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() == numeric)
            .map(char::len_utf8)
            .sum();
        let (run, tail) = rest.split_at(run_len);
        rest = tail;
        if numeric {
            let value = run
                .parse::<u64>()
                .map_err(|_| ParseVersionError::NumberOverflow(run.to_string()))?;
            components.push(Component::Num(value));
        } else {
            components.push(match run {
                "post" => Component::Post,
                "dev" | "_" => Component::Dev,
                other => Component::Literal(other.to_string()),
            });
        }
    }
    if !matches!(components.first(), Some(Component::Num(_))) {
        components.insert(0, Component::Num(0));
    }
    Ok(components)
}

fn parse_segments(text: &str) -> Result<Vec<Segment>, ParseVersionError> {
    text.split('.').map(parse_segment).collect()
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(ParseVersionError::Empty);
        }
        let lowered = raw.to_lowercase().replace('-', "_");
        if let Some(bad) = lowered
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '+' | '!' | '_'))
        {
            return Err(ParseVersionError::InvalidCharacter(bad));
        }

        let (epoch, rest) = match lowered.split_once('!') {
            Some((epoch, rest)) => {
                if rest.contains('!') {
                    return Err(ParseVersionError::DuplicateEpochSeparator);
                }
                let epoch = epoch
                    .parse::<u64>()
                    .map_err(|_| ParseVersionError::InvalidEpoch(epoch.to_string()))?;
                (epoch, rest)
            }
            None => (0, lowered.as_str()),
        };

        let (main, local) = match rest.split_once('+') {
            Some((main, local)) => {
                if local.contains('+') {
                    return Err(ParseVersionError::DuplicateLocalSeparator);
                }
                (main, Some(local))
            }
            None => (rest, None),
        };

        Ok(Version {
            raw: raw.to_string(),
            epoch,
            segments: parse_segments(main)?,
            local: local.map(parse_segments).transpose()?.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_basic() {
        let version = v("1.5.0");
        assert_eq!(version.epoch(), 0);
        assert_eq!(version.segment_count(), 3);
        assert_eq!(version.to_string(), "1.5.0");
    }

    #[test]
    fn test_parse_epoch_and_local() {
        assert_eq!(v("2!1.0").epoch(), 2);
        assert!(v("1.0+2") > v("1.0"));
        assert!(v("1.0+1") < v("1.0+2"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Version>(), Err(ParseVersionError::Empty));
        assert_eq!(
            "1..2".parse::<Version>(),
            Err(ParseVersionError::EmptySegment)
        );
        assert_eq!(
            "a!1.0".parse::<Version>(),
            Err(ParseVersionError::InvalidEpoch("a".to_string()))
        );
        assert_eq!(
            "1.0 beta".parse::<Version>(),
            Err(ParseVersionError::InvalidCharacter(' '))
        );
        assert_eq!(
            "1.0+a+b".parse::<Version>(),
            Err(ParseVersionError::DuplicateLocalSeparator)
        );
    }

    /// The ordering chain from conda's own documentation.
    #[test]
    fn test_conda_order_chain() {
        let chain = [
            "0.4",
            "0.4.1.rc",
            "0.4.1",
            "0.5a1",
            "0.5b3",
            "0.5C1",
            "0.5",
            "0.9.6",
            "0.960923",
            "1.0",
            "1.1dev1",
            "1.1a1",
            "1.1.0dev1",
            "1.1.a1",
            "1.1.0rc1",
            "1.1.0",
            "1.1.0post1",
            "1.1post1",
            "1996.07.12",
            "1!0.4.1",
            "1!3.1.1.6",
            "2!0.4.1",
        ];
        for pair in chain.windows(2) {
            assert!(
                v(pair[0]) < v(pair[1]),
                "expected {} < {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_equalities() {
        assert_eq!(v("0.4"), v("0.4.0"));
        assert_eq!(v("1.1"), v("1.1.0"));
        assert_eq!(v("1.1.0dev1"), v("1.1.dev1"));
        assert_eq!(v("1.1.0post1"), v("1.1.post1"));
        assert_eq!(v("0.5C1"), v("0.5c1"));
        assert_eq!(v("1.0a"), v("1.0.a"));
    }

    #[test]
    fn test_hash_agrees_with_eq() {
        use std::collections::hash_map::DefaultHasher;

        fn hash(version: &Version) -> u64 {
            let mut hasher = DefaultHasher::new();
            version.hash(&mut hasher);
            hasher.finish()
        }

        assert_eq!(hash(&v("1.1")), hash(&v("1.1.0")));
        assert_eq!(hash(&v("1.1.0dev1")), hash(&v("1.1.dev1")));
        assert_ne!(v("1.1"), v("1.1.1"));
    }

    #[test]
    fn test_dash_and_underscore() {
        // `-` is rewritten to `_`, and a bare `_` run behaves like `dev`.
        assert_eq!(v("1.0-1"), v("1.0_1"));
        assert_eq!(v("1.0.dev"), v("1.0._"));
        assert!(v("1.0.dev") < v("1.0"));
    }

    #[test]
    fn test_post_and_dev() {
        assert!(v("1.0post") > v("1.0"));
        assert!(v("1.0dev") < v("1.0"));
        assert!(v("1.0dev") < v("1.0a"));
    }

    #[test]
    fn test_starts_with() {
        assert!(v("1.7.1").starts_with(&v("1.7")));
        assert!(v("1.7").starts_with(&v("1.7")));
        assert!(v("1.7.0").starts_with(&v("1.7")));
        assert!(!v("1.70").starts_with(&v("1.7")));
        assert!(!v("1.8.1").starts_with(&v("1.7")));
        assert!(v("2.0.1a1").starts_with(&v("2.0")));
        assert!(!v("1!1.7.1").starts_with(&v("1.7")));
    }

    #[test]
    fn test_timestamps_as_numerals() {
        assert!(v("2024.1.1") > v("2023.12.31"));
    }
}
