//! Error types for fraktal-core.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed or missing request input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid fractal id '{id}': expected ^[a-z][a-z0-9-]{{1,31}}$")]
    InvalidId { id: String },

    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// All errors that can arise from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure, annotated with the file it concerned.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write/save path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load, with the file path.
    #[error("failed to parse registry at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.fraktal/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("fractal '{id}' is already registered")]
    Duplicate { id: String },

    #[error("fractal '{id}' is not registered")]
    NotFound { id: String },
}

/// Errors loading or writing the service settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("settings file already exists at {path} (use --force to overwrite)")]
    AlreadyExists { path: PathBuf },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("invalid settings: {0}")]
    Invalid(String),
}

pub(crate) fn registry_io(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn settings_io(path: impl Into<PathBuf>, source: std::io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.into(),
        source,
    }
}
