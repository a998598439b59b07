//! The engine callback surface.
//!
//! [`PackageDatabase`] owns the interned repository state and implements
//! the resolvo provider traits on top of it. The engine drives candidate
//! enumeration, filtering and ordering exclusively through these
//! callbacks; it never touches the pools directly.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{PoisonError, RwLock};

use resolvo::{
    ArenaId, Candidates, Condition, ConditionId, Dependencies, DependencyProvider, Interner,
    KnownDependencies, NameId, Requirement, SolvableId, SolverCache, StringId, VersionSetId,
    VersionSetUnionId,
};

use krait_version::Version;

use crate::pool::Pool;
use crate::record::PackageRecord;

/// Channel resolution parameters the database is instantiated with.
///
/// These feed human-readable output and channel-field validation only;
/// containment checks never consult them.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Platforms the caller resolves for, e.g. `["linux-64", "noarch"]`.
    pub platforms: Vec<String>,
    /// Base URL that bare channel names are resolved against.
    pub channel_alias: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            platforms: vec!["linux-64".to_string(), "noarch".to_string()],
            channel_alias: "https://conda.anaconda.org".to_string(),
        }
    }
}

impl ChannelConfig {
    /// Resolve a channel field to a full URL for display purposes.
    pub fn resolve_channel(&self, channel: &str) -> String {
        if channel.contains("://") {
            channel.to_string()
        } else {
            format!(
                "{}/{}",
                self.channel_alias.trim_end_matches('/'),
                channel.trim_matches('/')
            )
        }
    }
}

/// Summary of the best candidate reachable through a version set: its
/// version and the number of track features on that candidate.
type VersionSummary = Option<(Version, usize)>;

/// The interned package universe together with the candidate index and
/// per-solvable dependency lists.
///
/// Built single-threaded during ingestion; read-only during the solve
/// phase. The best-version summary cache is the only state written during
/// a solve and is guarded for concurrent use.
pub struct PackageDatabase {
    pub(crate) pool: Pool,
    /// Per name, the solvables carrying it, in allocation order.
    pub(crate) candidates_by_name: Vec<Vec<SolvableId>>,
    /// Per solvable, the interned requirements, in record order.
    pub(crate) requirements: Vec<Vec<Requirement>>,
    /// Per solvable, the interned constrains, in record order.
    pub(crate) constrains: Vec<Vec<VersionSetId>>,
    channel_config: ChannelConfig,
    best_version_cache: RwLock<HashMap<VersionSetId, VersionSummary>>,
}

impl PackageDatabase {
    pub fn new(channel_config: ChannelConfig) -> Self {
        PackageDatabase {
            pool: Pool::new(),
            candidates_by_name: Vec::new(),
            requirements: Vec::new(),
            constrains: Vec::new(),
            channel_config,
            best_version_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn channel_config(&self) -> &ChannelConfig {
        &self.channel_config
    }

    /// One-line human-readable description of a record, with its channel
    /// resolved to a full URL.
    pub fn describe_record(&self, record: &PackageRecord) -> String {
        match &record.channel {
            Some(channel) => format!(
                "{record} (from {})",
                self.channel_config.resolve_channel(channel)
            ),
            None => record.to_string(),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// The candidate list for a name, in allocation order.
    pub fn candidates_for(&self, name: NameId) -> &[SolvableId] {
        self.candidates_by_name
            .get(name.to_usize())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Record a freshly allocated solvable in the candidate index and the
    /// per-solvable dependency tables.
    pub(crate) fn index_solvable(
        &mut self,
        solvable: SolvableId,
        requirements: Vec<Requirement>,
        constrains: Vec<VersionSetId>,
    ) {
        let name = self.pool.solvable_name(solvable);
        if self.candidates_by_name.len() <= name.to_usize() {
            self.candidates_by_name.resize(name.to_usize() + 1, Vec::new());
        }
        self.candidates_by_name[name.to_usize()].push(solvable);

        debug_assert_eq!(self.requirements.len(), solvable.to_usize());
        self.requirements.push(requirements);
        self.constrains.push(constrains);
    }

    /// The highest version reachable through a version set, together with
    /// the track-feature count of that candidate. Memoized because the
    /// candidate comparator consults it once per dependency pair.
    fn best_version(&self, version_set: VersionSetId) -> VersionSummary {
        if let Some(summary) = self
            .best_version_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&version_set)
        {
            return summary.clone();
        }

        let spec = self.pool.resolve_version_set(version_set);
        let name = self.pool.version_set_name(version_set);
        let mut summary: VersionSummary = None;
        for &candidate in self.candidates_for(name) {
            let record = self.pool.resolve_solvable(candidate);
            if !record.matches_except_channel(spec) {
                continue;
            }
            match &summary {
                Some((best, _)) if *best >= record.version => {}
                _ => {
                    summary = Some((record.version.clone(), record.track_features.len()));
                }
            }
        }

        self.best_version_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(version_set, summary.clone());
        summary
    }

    /// The version sets behind a requirement; a union contributes every
    /// alternative.
    fn requirement_version_sets(&self, requirement: &Requirement) -> Vec<VersionSetId> {
        match requirement {
            Requirement::Single(id) => vec![*id],
            Requirement::Union(union) => self.pool.resolve_version_set_union(*union).to_vec(),
        }
    }

    /// The best summary reachable through any of the given version sets.
    fn best_version_across(&self, version_sets: &[VersionSetId]) -> VersionSummary {
        let mut summary: VersionSummary = None;
        for &version_set in version_sets {
            let Some((version, tracked)) = self.best_version(version_set) else {
                continue;
            };
            match &summary {
                Some((best, _)) if *best >= version => {}
                _ => summary = Some((version, tracked)),
            }
        }
        summary
    }

    /// Score the dependency quality of `a` relative to `b`.
    ///
    /// For each dependency name the two records share, the side whose spec
    /// reaches a best candidate with fewer track features gains 100, and
    /// the side reaching a higher best version gains 1. A disjunctive
    /// dependency is scored by the best of its alternatives. A positive
    /// total prefers `a`.
    fn compare_dependencies(&self, a: SolvableId, b: SolvableId) -> i32 {
        let mut score = 0;
        for req_a in &self.requirements[a.to_usize()] {
            let sets_a = self.requirement_version_sets(req_a);
            let dep_name = self.pool.version_set_name(sets_a[0]);
            let Some(sets_b) = self.requirements[b.to_usize()]
                .iter()
                .map(|req| self.requirement_version_sets(req))
                .find(|sets| self.pool.version_set_name(sets[0]) == dep_name)
            else {
                continue;
            };
            if sets_a == sets_b {
                continue;
            }
            let (Some((version_a, tracked_a)), Some((version_b, tracked_b))) =
                (self.best_version_across(&sets_a), self.best_version_across(&sets_b))
            else {
                continue;
            };
            match tracked_a.cmp(&tracked_b) {
                Ordering::Less => score += 100,
                Ordering::Greater => score -= 100,
                Ordering::Equal => {}
            }
            match version_a.cmp(&version_b) {
                Ordering::Greater => score += 1,
                Ordering::Less => score -= 1,
                Ordering::Equal => {}
            }
        }
        score
    }

    /// The candidate priority order: the most preferred candidate sorts
    /// first. Keys, in order: fewer track features, higher version, higher
    /// build number, better dependency score, newer timestamp.
    pub(crate) fn compare_candidates(&self, a: SolvableId, b: SolvableId) -> Ordering {
        let record_a = self.pool.resolve_solvable(a);
        let record_b = self.pool.resolve_solvable(b);

        let by_tracked = record_a
            .track_features
            .len()
            .cmp(&record_b.track_features.len());
        if by_tracked != Ordering::Equal {
            return by_tracked;
        }

        let by_version = record_b.version.cmp(&record_a.version);
        if by_version != Ordering::Equal {
            return by_version;
        }

        let by_build = record_b.build_number.cmp(&record_a.build_number);
        if by_build != Ordering::Equal {
            return by_build;
        }

        let score = self.compare_dependencies(a, b);
        if score != 0 {
            return if score > 0 {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        record_b.timestamp.cmp(&record_a.timestamp)
    }
}

impl Interner for PackageDatabase {
    fn display_solvable(&self, solvable: SolvableId) -> impl Display + '_ {
        self.pool.resolve_solvable(solvable)
    }

    fn display_merged_solvables(&self, solvables: &[SolvableId]) -> impl Display + '_ {
        let mut buffer = String::new();
        for (i, &solvable) in solvables.iter().enumerate() {
            if i > 0 {
                buffer.push_str(" | ");
            }
            buffer.push_str(self.pool.resolve_solvable(solvable).version.as_str());
        }
        buffer
    }

    fn display_name(&self, name: NameId) -> impl Display + '_ {
        self.pool.resolve_name(name)
    }

    fn display_version_set(&self, version_set: VersionSetId) -> impl Display + '_ {
        // The engine prints the package name itself; only the constraint
        // portion belongs here.
        self.pool
            .resolve_version_set(version_set)
            .constraint_display()
            .to_string()
    }

    fn display_string(&self, string_id: StringId) -> impl Display + '_ {
        self.pool.resolve_string(string_id)
    }

    fn version_set_name(&self, version_set: VersionSetId) -> NameId {
        self.pool.version_set_name(version_set)
    }

    fn solvable_name(&self, solvable: SolvableId) -> NameId {
        self.pool.solvable_name(solvable)
    }

    fn version_sets_in_union(
        &self,
        version_set_union: VersionSetUnionId,
    ) -> impl Iterator<Item = VersionSetId> {
        self.pool
            .resolve_version_set_union(version_set_union)
            .to_vec()
            .into_iter()
    }

    fn resolve_condition(&self, condition: ConditionId) -> Condition {
        self.pool.resolve_condition(condition)
    }
}

impl DependencyProvider for PackageDatabase {
    async fn filter_candidates(
        &self,
        candidates: &[SolvableId],
        version_set: VersionSetId,
        inverse: bool,
    ) -> Vec<SolvableId> {
        let spec = self.pool.resolve_version_set(version_set);
        candidates
            .iter()
            .copied()
            .filter(|&candidate| {
                self.pool
                    .resolve_solvable(candidate)
                    .matches_except_channel(spec)
                    != inverse
            })
            .collect()
    }

    async fn get_candidates(&self, name: NameId) -> Option<Candidates> {
        Some(Candidates {
            candidates: self.candidates_for(name).to_vec(),
            ..Candidates::default()
        })
    }

    async fn sort_candidates(&self, _solver: &SolverCache<Self>, solvables: &mut [SolvableId]) {
        solvables.sort_by(|&a, &b| self.compare_candidates(a, b));
    }

    async fn get_dependencies(&self, solvable: SolvableId) -> Dependencies {
        Dependencies::Known(KnownDependencies {
            requirements: self.requirements[solvable.to_usize()]
                .iter()
                .map(|requirement| requirement.clone().into())
                .collect(),
            constrains: self.constrains[solvable.to_usize()].clone(),
        })
    }

    fn should_cancel_with_value(&self) -> Option<Box<dyn Any>> {
        None
    }
}
