//! Error types for fraktal-workspace.

use std::path::PathBuf;

use thiserror::Error;

use fraktal_renderer::RenderError;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path handed to the manager does not live strictly under its root.
    #[error("{path} is outside the workspace root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("could not change owner of {path}: {reason}")]
    Ownership { path: PathBuf, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.into(),
        source,
    }
}
