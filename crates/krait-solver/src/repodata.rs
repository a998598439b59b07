//! Repodata ingestion.
//!
//! Reads a channel subdir's `repodata.json`, normalizes the irregular
//! spec strings found in real-world indexes, and populates the pools and
//! the candidate index. Ingestion is transactional per record: every spec
//! string of an entry is parsed before anything for it is allocated, so a
//! skipped record leaves no trace in the pools.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use resolvo::{Requirement, SolvableId, VersionSetId};
use serde::Deserialize;
use serde_json::Value;

use krait_version::{MatchSpec, ParseMatchSpecError, Version};

use crate::error::{Result, SolverError};
use crate::provider::PackageDatabase;
use crate::record::{PackageRecord, RawRecord};

/// Which artifact maps of the repodata to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageTypes {
    /// Ingest `packages.conda` first, then every `packages` entry whose
    /// filename stem was not already taken by a `.conda` artifact.
    #[default]
    CondaOrElseTarBz2,
    /// Only `.conda` artifacts.
    CondaOnly,
    /// Only `.tar.bz2` artifacts.
    TarBz2Only,
}

/// Knobs for a single `add_repodata` call.
#[derive(Debug, Clone, Default)]
pub struct RepodataOptions {
    pub package_types: PackageTypes,
    /// Attach the repodata `signatures` entry of each record.
    pub verify_signatures: bool,
    /// Give records named `python` an implicit `pip` dependency.
    pub pip_as_python_dependency: bool,
}

#[derive(Deserialize)]
struct Repodata {
    info: Option<RepodataInfo>,
    #[serde(default)]
    repodata_version: Option<u64>,
    #[serde(default)]
    signatures: IndexMap<String, Value>,
    #[serde(default)]
    packages: IndexMap<String, Value>,
    #[serde(default, rename = "packages.conda")]
    conda_packages: IndexMap<String, Value>,
}

#[derive(Deserialize)]
struct RepodataInfo {
    #[serde(default)]
    subdir: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
}

/// A dependency string after normalization.
#[derive(Debug)]
pub(crate) enum NormalizedSpec {
    /// The spec cannot constrain anything; the dependency is dropped.
    Vacuous,
    /// One or more `|`-separated alternatives.
    Alternatives(Vec<MatchSpec>),
}

const RELATIONAL_OPS: [&str; 7] = [">=", "<=", "==", "!=", ">", "<", "="];
const PYTHON_SELECTORS: [&str; 6] = ["=py", "<py", ">py", ">=py", "<=py", "!=py"];

/// Apply the compatibility fixups for spec strings found in historical
/// repodata, then parse.
pub(crate) fn normalize_spec(raw: &str) -> std::result::Result<NormalizedSpec, ParseMatchSpecError> {
    // Stray `v` prefixes in versions, e.g. `... v12.0.0.r2.ggc561118da`.
    let mut text = raw.replace(" v", " ");

    // Truncate at python-version selectors such as `=py36`.
    if let Some(cut) = PYTHON_SELECTORS
        .iter()
        .filter_map(|selector| text.find(selector))
        .min()
    {
        text.truncate(cut);
    }

    // Whitespace inside version unions: `>=1.0, <2.0`.
    let text = text.replace(", ", ",");

    if text.contains("*.*") {
        return Ok(NormalizedSpec::Vacuous);
    }

    let mut alternatives = Vec::new();
    for alternative in text.split('|') {
        let mut alternative = alternative.trim().to_string();
        for op in RELATIONAL_OPS {
            let spaced = format!("{op} ");
            while alternative.contains(&spaced) {
                alternative = alternative.replace(&spaced, op);
            }
        }
        // A bare leading operator means the name is missing entirely.
        if alternative.starts_with(['>', '<', '=', '!', '~']) {
            alternative = format!("NONE {alternative}");
        }
        alternatives.push(alternative.parse::<MatchSpec>()?);
    }
    Ok(NormalizedSpec::Alternatives(alternatives))
}

fn filename_stem(filename: &str) -> &str {
    filename
        .strip_suffix(".conda")
        .or_else(|| filename.strip_suffix(".tar.bz2"))
        .unwrap_or(filename)
}

fn join_url(base: &str, filename: &str) -> String {
    if base.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), filename)
    }
}

impl PackageDatabase {
    /// Read a repodata file and add its records.
    ///
    /// `url` is the channel subdir URL the package filenames are joined
    /// against (unless the repodata carries its own `base_url`), and
    /// `channel_id` is stamped onto every record. Returns the number of
    /// records added; malformed entries are skipped with a warning.
    pub fn add_repodata(
        &mut self,
        path: &Path,
        url: &str,
        channel_id: &str,
        options: &RepodataOptions,
    ) -> Result<usize> {
        let content = fs::read_to_string(path).map_err(|source| SolverError::RepodataNotFound {
            path: path.to_path_buf(),
            source: Some(source),
        })?;
        self.add_repodata_str(&content, url, channel_id, options)
    }

    /// Like [`PackageDatabase::add_repodata`] but reading from memory.
    pub fn add_repodata_str(
        &mut self,
        content: &str,
        url: &str,
        channel_id: &str,
        options: &RepodataOptions,
    ) -> Result<usize> {
        let repodata: Repodata = serde_json::from_str(content)?;
        let info = repodata.info.as_ref().ok_or(SolverError::RepodataMissingInfo)?;

        if let Some(subdir) = &info.subdir {
            let platforms = &self.channel_config().platforms;
            if !platforms.is_empty() && !platforms.contains(subdir) {
                log::warn!(
                    "repodata subdir `{subdir}` is not among the configured platforms {platforms:?}"
                );
            }
        }

        // CEP-15: from repodata_version 2 on, `info.base_url` overrides
        // the caller-supplied URL prefix.
        let base_url = match &info.base_url {
            Some(base) if repodata.repodata_version.unwrap_or(1) >= 2 => base.clone(),
            _ => url.to_string(),
        };

        let mut added = 0;
        match options.package_types {
            PackageTypes::CondaOnly => {
                for (filename, entry) in &repodata.conda_packages {
                    added += self
                        .ingest_entry(filename, entry, &base_url, &repodata, channel_id, options)
                        .is_some() as usize;
                }
            }
            PackageTypes::TarBz2Only => {
                for (filename, entry) in &repodata.packages {
                    added += self
                        .ingest_entry(filename, entry, &base_url, &repodata, channel_id, options)
                        .is_some() as usize;
                }
            }
            PackageTypes::CondaOrElseTarBz2 => {
                let mut conda_stems = HashSet::new();
                for (filename, entry) in &repodata.conda_packages {
                    if self
                        .ingest_entry(filename, entry, &base_url, &repodata, channel_id, options)
                        .is_some()
                    {
                        added += 1;
                        conda_stems.insert(filename_stem(filename));
                    }
                }
                for (filename, entry) in &repodata.packages {
                    if conda_stems.contains(filename_stem(filename)) {
                        continue;
                    }
                    added += self
                        .ingest_entry(filename, entry, &base_url, &repodata, channel_id, options)
                        .is_some() as usize;
                }
            }
        }

        log::debug!(
            "loaded {added} records from channel {channel_id} ({} total solvables)",
            self.pool.solvable_count()
        );
        Ok(added)
    }

    fn ingest_entry(
        &mut self,
        filename: &str,
        entry: &Value,
        base_url: &str,
        repodata: &Repodata,
        channel_id: &str,
        options: &RepodataOptions,
    ) -> Option<SolvableId> {
        let raw: RawRecord = match serde_json::from_value(entry.clone()) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("skipping {filename}: {err}");
                return None;
            }
        };

        let (Some(name), Some(version), Some(build), Some(build_number)) =
            (raw.name, raw.version, raw.build, raw.build_number)
        else {
            log::warn!("skipping {filename}: missing name, version, build or build_number");
            return None;
        };
        let version: Version = match version.parse() {
            Ok(version) => version,
            Err(err) => {
                log::warn!("skipping {filename}: invalid version `{version}`: {err}");
                return None;
            }
        };

        let mut depends = raw.depends;
        if options.pip_as_python_dependency && name == "python" {
            depends.push("pip".to_string());
        }

        // Parse every spec before allocating, so a bad entry leaves the
        // pools untouched.
        let requirement_specs = match parse_spec_list(&depends) {
            Ok(specs) => specs,
            Err(err) => {
                log::warn!("skipping {filename}: invalid dependency: {err}");
                return None;
            }
        };
        let constrain_specs = match parse_spec_list(&raw.constrains) {
            Ok(specs) => specs,
            Err(err) => {
                log::warn!("skipping {filename}: invalid constraint: {err}");
                return None;
            }
        };

        let mut record = PackageRecord::new(name, version, build, build_number);
        record.subdir = raw
            .subdir
            .or_else(|| repodata.info.as_ref().and_then(|info| info.subdir.clone()));
        record.size = raw.size;
        record.md5 = raw.md5;
        record.sha256 = raw.sha256;
        record.license = raw.license;
        record.noarch = raw.noarch;
        record.timestamp = raw.timestamp;
        record.depends = depends;
        record.constrains = raw.constrains;
        record.track_features = raw.track_features;
        record.package_url = Some(join_url(base_url, filename));
        record.channel = Some(channel_id.to_string());
        if options.verify_signatures {
            record.signatures = repodata
                .signatures
                .get(filename)
                .map(|signature| signature.to_string());
        }

        Some(self.add_parsed(record, requirement_specs, constrain_specs))
    }

    /// Allocate a record whose spec strings have already been parsed.
    fn add_parsed(
        &mut self,
        record: PackageRecord,
        requirement_specs: Vec<Vec<MatchSpec>>,
        constrain_specs: Vec<Vec<MatchSpec>>,
    ) -> SolvableId {
        let requirements = requirement_specs
            .into_iter()
            .map(|alternatives| self.alloc_requirement(alternatives))
            .collect();
        // The engine models constrains as plain version sets; when a
        // constraint carries alternatives only the first one is kept.
        let constrains = constrain_specs
            .into_iter()
            .map(|alternatives| {
                let ids: Vec<VersionSetId> = alternatives
                    .into_iter()
                    .map(|spec| self.pool.intern_version_set(spec))
                    .collect();
                ids[0]
            })
            .collect();

        let solvable = self.pool.alloc_solvable(record);
        self.index_solvable(solvable, requirements, constrains);
        solvable
    }

    fn alloc_requirement(&mut self, alternatives: Vec<MatchSpec>) -> Requirement {
        let ids: Vec<VersionSetId> = alternatives
            .into_iter()
            .map(|spec| self.pool.intern_version_set(spec))
            .collect();
        if ids.len() == 1 {
            Requirement::Single(ids[0])
        } else {
            Requirement::Union(self.pool.intern_version_set_union(ids))
        }
    }

    /// Add a record built in memory, parsing its dependency strings
    /// through the same normalization path as repodata entries.
    pub fn add_package(&mut self, record: PackageRecord) -> Result<SolvableId> {
        let requirement_specs = parse_spec_list(&record.depends)?;
        let constrain_specs = parse_spec_list(&record.constrains)?;
        Ok(self.add_parsed(record, requirement_specs, constrain_specs))
    }

    /// Inject a synthetic record describing a host capability, e.g.
    /// `__glibc 2.17 0`. These participate in the solve like any other
    /// record and are stripped from user-visible plans.
    pub fn add_virtual_package(
        &mut self,
        name: &str,
        version: &str,
        build_string: &str,
    ) -> Result<SolvableId> {
        let version: Version = version.parse()?;
        self.add_package(PackageRecord::new(name, version, build_string, 0))
    }

    /// Intern a requirement string coming from user input. Returns `None`
    /// for vacuous specs.
    pub(crate) fn intern_requirement(&mut self, raw: &str) -> Result<Option<Requirement>> {
        match normalize_spec(raw)? {
            NormalizedSpec::Vacuous => Ok(None),
            NormalizedSpec::Alternatives(alternatives) => {
                Ok(Some(self.alloc_requirement(alternatives)))
            }
        }
    }

    /// Intern a constraint string coming from user input.
    pub(crate) fn intern_constraint(&mut self, raw: &str) -> Result<Option<VersionSetId>> {
        match normalize_spec(raw)? {
            NormalizedSpec::Vacuous => Ok(None),
            NormalizedSpec::Alternatives(alternatives) => {
                let Some(first) = alternatives.into_iter().next() else {
                    return Ok(None);
                };
                Ok(Some(self.pool.intern_version_set(first)))
            }
        }
    }
}

fn parse_spec_list(
    specs: &[String],
) -> std::result::Result<Vec<Vec<MatchSpec>>, ParseMatchSpecError> {
    let mut parsed = Vec::with_capacity(specs.len());
    for raw in specs {
        match normalize_spec(raw)? {
            NormalizedSpec::Vacuous => {}
            NormalizedSpec::Alternatives(alternatives) => parsed.push(alternatives),
        }
    }
    Ok(parsed)
}
