//! Error taxonomy for a single run
//!
//! Every error is detected by the layer that owns it and converted into a
//! terminal report by the orchestrator. Nothing here crosses into the host.

use std::path::PathBuf;
use thiserror::Error;

/// Missing editor/workspace context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("No active file. Open a source file to generate tests for.")]
    NoActiveFile,
    #[error("No workspace folder is open.")]
    NoWorkspace,
    #[error("Active file not found: {0}")]
    ActiveFileMissing(PathBuf),
    #[error("Workspace folder not found: {0}")]
    WorkspaceMissing(PathBuf),
    #[error("{file} is not inside the workspace {workspace}")]
    OutsideWorkspace { file: String, workspace: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "No API key configured. Set `apiKey`, run `cover-runner set-key`, or export one of: {}",
        crate::config::API_KEY_ENV_VARS.join(", ")
    )]
    MissingApiKey,
    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("Unknown setting `{0}`")]
    UnknownKey(String),
    #[error("Settings file {path} is not valid JSON ({reason}). A backup was saved.")]
    Corrupt { path: PathBuf, reason: String },
    #[error("Could not determine the user configuration directory")]
    NoConfigDir,
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while preparing the isolated cover-agent environment.
///
/// The display text stays generic; the underlying detail is logged.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("cover-agent setup is already running. Try again when it finishes.")]
    InProgress,
    #[error("Failed to set up cover-agent. Check that Python is installed and try again.")]
    Step { step: &'static str, detail: String },
    #[error("cover-agent setup finished but the executable is missing at {0}")]
    ExecutableMissing(PathBuf),
    #[error("Failed to prepare install directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("Test path `{path}` must stay inside the workspace: {reason}")]
    OutsideWorkspace { path: String, reason: String },
    #[error("Failed to create test directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to open run lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything that can abort a run before the external tool reports an outcome.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    #[error("A cover-agent run is already active in {0}")]
    Busy(PathBuf),
}
