//! Interning pools backing the solver identifiers.

use std::collections::HashMap;

use resolvo::{
    ArenaId, Condition, ConditionId, NameId, SolvableId, StringId, VersionSetId,
    VersionSetUnionId,
};

use krait_version::MatchSpec;

use crate::record::PackageRecord;

/// Bijective storage between solver ids and their values.
///
/// Every id type is backed by a dense arena. Ids are handed out in
/// allocation order and are never reused; the deduplicating pools (names,
/// strings, version sets) return the existing id when a value is interned
/// twice. Package records are never deduplicated: each allocation yields a
/// fresh [`SolvableId`].
#[derive(Default)]
pub struct Pool {
    names: Vec<String>,
    names_by_value: HashMap<String, NameId>,

    strings: Vec<String>,
    strings_by_value: HashMap<String, StringId>,

    version_sets: Vec<MatchSpec>,
    version_set_names: Vec<NameId>,
    version_sets_by_value: HashMap<MatchSpec, VersionSetId>,

    solvables: Vec<PackageRecord>,
    solvable_names: Vec<NameId>,

    version_set_unions: Vec<Vec<VersionSetId>>,

    conditions: Vec<Condition>,
}

impl Pool {
    pub fn new() -> Self {
        Pool::default()
    }

    /// Intern a package name, returning the existing id when the name was
    /// seen before.
    pub fn intern_name(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.names_by_value.get(name) {
            return id;
        }
        let id = NameId::from_usize(self.names.len());
        self.names_by_value.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    pub fn resolve_name(&self, id: NameId) -> &str {
        &self.names[id.to_usize()]
    }

    pub fn lookup_name(&self, name: &str) -> Option<NameId> {
        self.names_by_value.get(name).copied()
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Intern an arbitrary string (used for engine-facing messages).
    pub fn intern_string(&mut self, value: &str) -> StringId {
        if let Some(&id) = self.strings_by_value.get(value) {
            return id;
        }
        let id = StringId::from_usize(self.strings.len());
        self.strings_by_value.insert(value.to_string(), id);
        self.strings.push(value.to_string());
        id
    }

    pub fn resolve_string(&self, id: StringId) -> &str {
        &self.strings[id.to_usize()]
    }

    /// Intern a match spec, keyed by its parsed form. Equivalent specs
    /// with different spellings collapse onto the same id, which keeps
    /// [`Pool::version_set_name`] consistent.
    pub fn intern_version_set(&mut self, spec: MatchSpec) -> VersionSetId {
        if let Some(&id) = self.version_sets_by_value.get(&spec) {
            return id;
        }
        let name_id = self.intern_name(&spec.name);
        let id = VersionSetId::from_usize(self.version_sets.len());
        self.version_sets_by_value.insert(spec.clone(), id);
        self.version_sets.push(spec);
        self.version_set_names.push(name_id);
        id
    }

    pub fn resolve_version_set(&self, id: VersionSetId) -> &MatchSpec {
        &self.version_sets[id.to_usize()]
    }

    pub fn version_set_name(&self, id: VersionSetId) -> NameId {
        self.version_set_names[id.to_usize()]
    }

    pub fn version_set_count(&self) -> usize {
        self.version_sets.len()
    }

    /// Allocate a record. Records are identified by their full content,
    /// not by a name/version/build key, so every call yields a new id.
    pub fn alloc_solvable(&mut self, record: PackageRecord) -> SolvableId {
        let name_id = self.intern_name(&record.name);
        let id = SolvableId::from_usize(self.solvables.len());
        self.solvables.push(record);
        self.solvable_names.push(name_id);
        id
    }

    pub fn resolve_solvable(&self, id: SolvableId) -> &PackageRecord {
        &self.solvables[id.to_usize()]
    }

    pub fn solvable_name(&self, id: SolvableId) -> NameId {
        self.solvable_names[id.to_usize()]
    }

    pub fn solvable_count(&self) -> usize {
        self.solvables.len()
    }

    /// Intern a disjunction of version sets.
    pub fn intern_version_set_union(&mut self, sets: Vec<VersionSetId>) -> VersionSetUnionId {
        let id = VersionSetUnionId::from_usize(self.version_set_unions.len());
        self.version_set_unions.push(sets);
        id
    }

    pub fn resolve_version_set_union(&self, id: VersionSetUnionId) -> &[VersionSetId] {
        &self.version_set_unions[id.to_usize()]
    }

    pub fn resolve_condition(&self, id: ConditionId) -> Condition {
        self.conditions[id.to_usize()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn record(name: &str, version: &str) -> PackageRecord {
        PackageRecord::new(name, version.parse().unwrap(), "0", 0)
    }

    #[test]
    fn test_name_interning_is_idempotent() {
        let mut pool = Pool::new();
        let a = pool.intern_name("numpy");
        let b = pool.intern_name("numpy");
        let c = pool.intern_name("scipy");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.resolve_name(a), "numpy");
        assert_eq!(pool.lookup_name("scipy"), Some(c));
        assert_eq!(pool.lookup_name("joblib"), None);
    }

    #[test]
    fn test_string_interning_is_idempotent() {
        let mut pool = Pool::new();
        let a = pool.intern_string("unparsable dependency");
        let b = pool.intern_string("unparsable dependency");
        assert_eq!(a, b);
        assert_eq!(pool.resolve_string(a), "unparsable dependency");
    }

    #[test]
    fn test_version_set_interning_collapses_spellings() {
        let mut pool = Pool::new();
        let a = pool.intern_version_set(spec("numpy >=1.21"));
        let b = pool.intern_version_set(spec("numpy >= 1.21"));
        let c = pool.intern_version_set(spec("numpy >1.21"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            pool.resolve_name(pool.version_set_name(a)),
            "numpy"
        );
    }

    #[test]
    fn test_solvables_are_not_deduplicated() {
        let mut pool = Pool::new();
        let a = pool.alloc_solvable(record("numpy", "1.21.2"));
        let b = pool.alloc_solvable(record("numpy", "1.21.2"));
        assert_ne!(a, b);
        assert_eq!(pool.solvable_count(), 2);
        assert_eq!(pool.solvable_name(a), pool.solvable_name(b));
    }

    #[test]
    fn test_ids_are_stable() {
        let mut pool = Pool::new();
        let first = pool.intern_name("numpy");
        for other in ["scipy", "joblib", "pip"] {
            pool.intern_name(other);
        }
        assert_eq!(pool.intern_name("numpy"), first);
        assert_eq!(pool.resolve_name(first), "numpy");
        assert_eq!(pool.name_count(), 4);
    }

    #[test]
    fn test_union_round_trip() {
        let mut pool = Pool::new();
        let a = pool.intern_version_set(spec("pytorch 1.8.*"));
        let b = pool.intern_version_set(spec("pytorch 1.9.*"));
        let union = pool.intern_version_set_union(vec![a, b]);
        assert_eq!(pool.resolve_version_set_union(union), &[a, b]);
    }
}
