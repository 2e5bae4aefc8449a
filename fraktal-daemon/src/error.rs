use std::path::PathBuf;

use thiserror::Error;

/// Error surface for service startup and the runtime's own tasks.
///
/// Request failures never become a `DaemonError`: they are rendered as HTTP
/// responses by the routes.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings error: {0}")]
    Settings(#[from] fraktal_core::SettingsError),

    #[error("registry error: {0}")]
    Registry(#[from] fraktal_core::RegistryError),

    #[error("workspace error: {0}")]
    Workspace(#[from] fraktal_workspace::WorkspaceError),

    #[error("invalid bind address '{addr}': {source}")]
    InvalidBind {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("could not start HTTP server on {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("{task} task failed: {message}")]
    Task { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
