use camino::Utf8PathBuf;
use thiserror::Error;

/// Problems with the shape of the task graph or with loading the
/// configuration. These always surface before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{task}' references '{missing}', which is not registered")]
    UnknownReference { task: String, missing: String },

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("Couldn't read configuration file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse configuration file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),
}

/// Errors returned by [`Runner::run`](crate::Runner::run).
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{name}' failed:\n{source:#}")]
    Task {
        name: String,
        source: anyhow::Error,
    },
}

impl RunError {
    /// Name of the task this error is about.
    pub fn task(&self) -> &str {
        match self {
            RunError::UnknownTask(name) => name,
            RunError::Task { name, .. } => name,
        }
    }
}

/// Errors that can occur while selecting input files with a glob.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't read metadata of '{0}'.\n{1}")]
    Metadata(Utf8PathBuf, std::io::Error),
}

/// Errors raised while setting up filesystem watches.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}
