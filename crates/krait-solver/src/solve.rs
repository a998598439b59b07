//! The solve driver: user specs in, install plan out.

use resolvo::{Problem, Solver, UnsolvableOrCancelled};

use crate::error::{Result, SolverError};
use crate::provider::PackageDatabase;
use crate::record::PackageRecord;

/// What to resolve.
///
/// `specs` must be satisfied by the plan; `constraints` bound package
/// versions without pulling the packages in.
#[derive(Debug, Clone, Default)]
pub struct SolveRequest {
    pub specs: Vec<String>,
    pub constraints: Vec<String>,
}

impl SolveRequest {
    pub fn new() -> Self {
        SolveRequest::default()
    }

    /// Add a requirement spec.
    pub fn require(&mut self, spec: impl Into<String>) -> &mut Self {
        self.specs.push(spec.into());
        self
    }

    /// Add a constraint spec.
    pub fn constrain(&mut self, spec: impl Into<String>) -> &mut Self {
        self.constraints.push(spec.into());
        self
    }
}

/// Resolve `request` against the ingested database.
///
/// The engine takes ownership of the database for the duration of the
/// solve. On success the selected solvables are projected back to their
/// records, in decision order, with virtual packages (`__*`) stripped
/// from the plan. On failure the engine's conflict explanation is
/// returned verbatim.
pub fn solve(database: PackageDatabase, request: &SolveRequest) -> Result<Vec<PackageRecord>> {
    let mut database = database;

    let mut requirements = Vec::new();
    for raw in &request.specs {
        // A spec that normalizes to nothing constrains nothing.
        if let Some(requirement) = database.intern_requirement(raw)? {
            requirements.push(requirement.into());
        }
    }
    let mut constraints = Vec::new();
    for raw in &request.constraints {
        if let Some(version_set) = database.intern_constraint(raw)? {
            constraints.push(version_set);
        }
    }

    let problem = Problem::new()
        .requirements(requirements)
        .constraints(constraints);
    let mut solver = Solver::new(database);
    match solver.solve(problem) {
        Ok(solvables) => {
            let database = solver.provider();
            let mut records = Vec::new();
            for solvable in solvables {
                let record = database.pool().resolve_solvable(solvable);
                if record.name.starts_with("__") {
                    continue;
                }
                log::debug!("selected {}", database.describe_record(record));
                records.push(record.clone());
            }
            Ok(records)
        }
        Err(UnsolvableOrCancelled::Unsolvable(conflict)) => Err(SolverError::NoSolution(
            conflict.display_user_friendly(&solver).to_string(),
        )),
        Err(UnsolvableOrCancelled::Cancelled(_)) => Err(SolverError::Cancelled),
    }
}
