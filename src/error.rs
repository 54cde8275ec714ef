use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a whole sync run
///
/// Per-file problems (missing local file, rejected upload) are not errors;
/// they are reported as [`crate::sync::FileOutcome`] values.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("missing credentials: {} not set", .missing.join(", "))]
    MissingCredentials { missing: Vec<&'static str> },

    #[error("failed to obtain access token: {detail}")]
    Auth { detail: String },

    #[error("failed to persist {}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
