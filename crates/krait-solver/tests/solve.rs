//! End-to-end solves against the real engine.

use std::collections::HashMap;
use std::io::Write;

use krait_solver::{
    solve, ChannelConfig, PackageDatabase, PackageRecord, RepodataOptions, SolveRequest,
    SolverError,
};
use krait_version::Version;

fn version(s: &str) -> Version {
    s.parse().unwrap()
}

fn record(name: &str, ver: &str, build: &str, build_number: u64, depends: &[&str]) -> PackageRecord {
    let mut record = PackageRecord::new(name, version(ver), build, build_number);
    record.depends = depends.iter().map(|s| s.to_string()).collect();
    record
}

fn database(records: Vec<PackageRecord>) -> PackageDatabase {
    let mut db = PackageDatabase::new(ChannelConfig::default());
    for rec in records {
        db.add_package(rec).unwrap();
    }
    db
}

/// A python distribution slice: interpreter, the scientific stack and a
/// few scikit-learn releases to choose from.
fn sklearn_universe() -> PackageDatabase {
    let sklearn_deps: &[&str] = &[
        "python >=3.10,<3.11.0a0",
        "numpy >=1.21",
        "scipy >=1.6.0",
        "joblib >=1.2.0",
        "threadpoolctl >=3.1.0",
    ];
    let mut db = database(vec![
        record("python", "3.9.19", "h_0", 0, &["__glibc >=2.17"]),
        record("python", "3.10.14", "h_0", 0, &["__glibc >=2.17"]),
        record("python", "3.11.9", "h_0", 0, &["__glibc >=2.17"]),
        record("numpy", "1.26.4", "py310_0", 0, &["python >=3.10,<3.11.0a0"]),
        record(
            "scipy",
            "1.11.4",
            "py310_0",
            0,
            &["python >=3.10,<3.11.0a0", "numpy >=1.21,<2"],
        ),
        record("joblib", "1.3.2", "pyhd8ed1ab_0", 0, &["python >=3.8"]),
        record("threadpoolctl", "3.2.0", "pyha21a80b_0", 0, &["python >=3.8"]),
        record("pip", "24.0", "pyhd8ed1ab_0", 0, &["python >=3.7"]),
        record("scikit-learn", "1.4.0", "py310_0", 0, sklearn_deps),
        record("scikit-learn", "1.5.0", "py310_0", 0, sklearn_deps),
        record("scikit-learn", "1.5.1", "py310_0", 0, sklearn_deps),
    ]);
    db.add_virtual_package("__glibc", "2.35", "0").unwrap();
    db
}

#[test]
fn solves_full_chain_at_highest_admissible_version() {
    let db = sklearn_universe();

    let mut request = SolveRequest::new();
    request
        .require("python >=3.10,<3.11")
        .require("scikit-learn >=1.0,<1.5.1")
        .require("pip");
    let plan = solve(db, &request).unwrap();

    // Exactly one record per package name.
    let mut by_name: HashMap<String, Vec<&PackageRecord>> = HashMap::new();
    for rec in &plan {
        by_name.entry(rec.name.clone()).or_default().push(rec);
    }
    for (name, records) in &by_name {
        assert_eq!(records.len(), 1, "{name} selected more than once");
    }

    let selected = |name: &str| -> &PackageRecord { by_name[name][0] };
    assert_eq!(selected("python").version, version("3.10.14"));
    assert_eq!(selected("scikit-learn").version, version("1.5.0"));
    for dep in ["numpy", "scipy", "joblib", "threadpoolctl", "pip"] {
        assert!(by_name.contains_key(dep), "{dep} missing from the plan");
    }

    // The virtual glibc record took part in the solve but stays out of
    // the user-visible plan.
    assert!(!by_name.contains_key("__glibc"));
}

#[test]
fn prefers_highest_version_without_constraints() {
    let db = sklearn_universe();
    let mut request = SolveRequest::new();
    request.require("scikit-learn");
    let plan = solve(db, &request).unwrap();
    let sklearn = plan.iter().find(|r| r.name == "scikit-learn").unwrap();
    assert_eq!(sklearn.version, version("1.5.1"));
}

#[test]
fn constraints_bound_without_installing() {
    let db = database(vec![
        record("a", "1.0", "h_0", 0, &[]),
        record("a", "2.0", "h_0", 0, &[]),
        record("b", "1.0", "h_0", 0, &[]),
    ]);

    let mut request = SolveRequest::new();
    request.require("a").constrain("a <2").constrain("b <1");
    let plan = solve(db, &request).unwrap();

    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].name, "a");
    assert_eq!(plan[0].version, version("1.0"));
}

#[test]
fn conflicting_requirements_explain_themselves() {
    let db = database(vec![
        record("a", "1.0", "h_0", 0, &[]),
        record("a", "2.0", "h_0", 0, &[]),
    ]);

    let mut request = SolveRequest::new();
    request.require("a <2").require("a >=2");
    match solve(db, &request) {
        Err(SolverError::NoSolution(reason)) => assert!(!reason.is_empty()),
        other => panic!("expected NoSolution, got {other:?}"),
    }
}

#[test]
fn transitive_conflict_backtracks_to_older_version() {
    // The newest c pulls a dependency that clashes with the root
    // requirement, so the solver must settle for the older c.
    let db = database(vec![
        record("c", "2.0", "h_0", 0, &["d >=2"]),
        record("c", "1.0", "h_0", 0, &["d <2"]),
        record("d", "2.0", "h_0", 0, &[]),
        record("d", "1.0", "h_0", 0, &[]),
    ]);

    let mut request = SolveRequest::new();
    request.require("c").require("d <2");
    let plan = solve(db, &request).unwrap();

    let by_name: HashMap<&str, &PackageRecord> =
        plan.iter().map(|r| (r.name.as_str(), r)).collect();
    assert_eq!(by_name["c"].version, version("1.0"));
    assert_eq!(by_name["d"].version, version("1.0"));
}

#[test]
fn disjunctive_dependency_is_satisfiable_by_either_arm() {
    // One record depends on either of two pytorch series.
    let db = database(vec![
        record("pytorch", "1.8.2", "h_0", 0, &[]),
        record("torchvision", "0.9.2", "h_0", 0, &["pytorch 1.8.*|pytorch 1.9.*"]),
    ]);

    let mut request = SolveRequest::new();
    request.require("torchvision");
    let plan = solve(db, &request).unwrap();

    let by_name: HashMap<&str, &PackageRecord> =
        plan.iter().map(|r| (r.name.as_str(), r)).collect();
    assert_eq!(by_name["pytorch"].version, version("1.8.2"));
}

#[test]
fn solves_from_repodata_file() {
    let repodata = r#"{
        "info": {"subdir": "linux-64"},
        "packages.conda": {
            "python-3.10.14-h_0.conda": {
                "name": "python", "version": "3.10.14", "build": "h_0",
                "build_number": 0, "timestamp": 1710000000000
            },
            "scikit-learn-1.5.0-py310_0.conda": {
                "name": "scikit-learn", "version": "1.5.0", "build": "py310_0",
                "build_number": 0,
                "depends": ["python >= 3.10, <3.11.0a0"]
            }
        }
    }"#;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repodata.json");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(repodata.as_bytes()).unwrap();

    let mut db = PackageDatabase::new(ChannelConfig::default());
    db.add_repodata(
        &path,
        "https://conda.anaconda.org/conda-forge/linux-64",
        "conda-forge",
        &RepodataOptions::default(),
    )
    .unwrap();

    let mut request = SolveRequest::new();
    request.require("scikit-learn==1.5.0");
    let plan = solve(db, &request).unwrap();

    let by_name: HashMap<&str, &PackageRecord> =
        plan.iter().map(|r| (r.name.as_str(), r)).collect();
    assert_eq!(by_name.len(), 2);
    assert_eq!(by_name["python"].timestamp, Some(1_710_000_000));
    assert_eq!(
        by_name["scikit-learn"].package_url.as_deref(),
        Some("https://conda.anaconda.org/conda-forge/linux-64/scikit-learn-1.5.0-py310_0.conda")
    );
}

#[test]
fn track_features_steer_the_solution() {
    let mut tracked = record("blas", "1.0", "mkl", 0, &[]);
    tracked.track_features = vec!["mkl".to_string()];
    let db = database(vec![tracked, record("blas", "1.0", "openblas", 0, &[])]);

    let mut request = SolveRequest::new();
    request.require("blas");
    let plan = solve(db, &request).unwrap();

    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].build_string, "openblas");
}
