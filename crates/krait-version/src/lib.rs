//! Conda-flavoured version handling.
//!
//! This crate implements the version model used by conda-style package
//! repositories: the total order over version strings, boolean version
//! constraints (`>=1.0,<2.0|==3.0`), and the textual match specs that
//! combine a package name with version, build and attribute predicates.

pub mod matchspec;
mod version;
mod version_spec;

pub use matchspec::{BuildNumberSpec, MatchSpec, ParseMatchSpecError, StringMatcher};
pub use version::{ParseVersionError, Version};
pub use version_spec::{ParseVersionSpecError, VersionSpec};
