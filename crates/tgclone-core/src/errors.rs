use std::path::PathBuf;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the supervisor
/// can tell a rejected start request (config, already running) from a failed run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("a clone run is already active for target {target} (lock: {lock_path})")]
    AlreadyRunning { target: i64, lock_path: PathBuf },

    #[error("nothing to resume: no checkpoint for target {0}")]
    NothingToResume(i64),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a provider client call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider asked us to wait before calling again.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(std::time::Duration),

    #[error("{0}")]
    Failed(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
