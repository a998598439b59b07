use std::path::PathBuf;

use thiserror::Error;

use krait_version::ParseMatchSpecError;

#[derive(Error, Debug)]
pub enum SolverError {
    // Repodata errors
    #[error("repodata file not found: {}", path.display())]
    RepodataNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("failed to parse repodata: {0}")]
    RepodataParse(#[from] serde_json::Error),

    #[error("repodata is missing the `info` section")]
    RepodataMissingInfo,

    // Spec errors
    #[error("invalid match spec: {0}")]
    MatchSpec(#[from] ParseMatchSpecError),

    #[error("invalid version: {0}")]
    Version(#[from] krait_version::ParseVersionError),

    // Solver errors
    #[error("could not find a solution:\n{0}")]
    NoSolution(String),

    #[error("the solve was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SolverError>;
