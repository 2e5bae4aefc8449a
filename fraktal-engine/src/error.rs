//! Error types for fraktal-engine.
//!
//! Collaborator failures ([`RoomError`], [`ConfigError`], [`GatewayError`],
//! workspace errors) never leave the orchestrator raw: they are folded into
//! [`FractalError`], whose variants are the caller-facing taxonomy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fraktal_core::{RegistryError, ValidationError};
use fraktal_workspace::WorkspaceError;

use crate::snapshot::Collection;

// ---------------------------------------------------------------------------
// Collaborator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("room service transport error: {0}")]
    Transport(String),

    #[error("room service response could not be decoded: {0}")]
    Decode(String),

    #[error("room {0} is unknown to the room service")]
    UnknownRoom(String),

    #[error("room service call '{call}' timed out after {after:?}")]
    Timeout { call: &'static str, after: Duration },

    #[error("room service task failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The store held fewer entries than the known-minimum baseline.
    #[error("{collection} holds {observed} entries, below the floor of {floor}; refusing to write")]
    CorruptionSuspected {
        collection: Collection,
        observed: usize,
        floor: usize,
    },

    /// The transform changed the collection size by an unexpected amount.
    #[error("{collection} would change by {actual} entries, expected {expected}")]
    InvariantViolation {
        collection: Collection,
        expected: String,
        actual: i64,
    },

    /// The re-read after a write did not show the expected size.
    #[error("{collection} holds {observed} entries after write, expected {expected}")]
    PostWriteMismatch {
        collection: Collection,
        expected: usize,
        observed: usize,
    },

    #[error("agent entry '{id}' already exists in the config store")]
    AgentExists { id: String },

    /// The store changed between fetch and replace.
    #[error("{collection} changed since it was read (version conflict)")]
    VersionConflict { collection: Collection },

    #[error("config store call '{call}' timed out after {after:?}")]
    Timeout { call: &'static str, after: Duration },

    #[error("config store error: {0}")]
    Store(String),

    #[error("config store returned malformed {collection}: {source}")]
    Malformed {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway reload command is empty")]
    EmptyCommand,

    #[error("could not run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gateway reload exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("gateway reload timed out after {after:?}")]
    Timeout { after: Duration },
}

// ---------------------------------------------------------------------------
// Rollback report
// ---------------------------------------------------------------------------

/// Outcome of one compensation attempted during a rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CompensationOutcome {
    Undone,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub action: String,
    pub outcome: CompensationOutcome,
}

/// Everything a caller needs to know about a create saga that was undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub fractal_id: String,
    pub failed_step: String,
    pub error_kind: String,
    pub cause: String,
    /// In the order they ran (reverse step order).
    pub compensations: Vec<CompensationRecord>,
    /// Rooms are never deleted; a created room outlives the rollback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaked_room: Option<String>,
    pub requires_manual_intervention: bool,
}

impl RollbackReport {
    pub fn undone(&self) -> impl Iterator<Item = &str> {
        self.compensations
            .iter()
            .filter(|c| c.outcome == CompensationOutcome::Undone)
            .map(|c| c.action.as_str())
    }
}

// ---------------------------------------------------------------------------
// FractalError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FractalError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("fractal '{id}' already exists")]
    Conflict { id: String },

    #[error("fractal limit reached ({current}/{max})")]
    LimitExceeded { current: usize, max: usize },

    #[error("room {room} has {members} joined members, at least {required} required")]
    QuorumFailure {
        room: String,
        members: usize,
        required: usize,
    },

    #[error("config store looks corrupted: {0}")]
    CorruptionSuspected(String),

    #[error("config invariant violated: {0}")]
    InvariantViolation(String),

    #[error("config write did not land: {0}")]
    PostWriteMismatch(String),

    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable {
        service: &'static str,
        message: String,
    },

    #[error(
        "create of '{}' rolled back after step '{}' failed: {}",
        .0.fractal_id, .0.failed_step, .0.cause
    )]
    AggregateRollback(Box<RollbackReport>),

    #[error("fractal '{id}' was deleted while it was being created")]
    Cancelled { id: String },

    #[error("fractal '{id}' not found")]
    NotFound { id: String },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl FractalError {
    /// Stable, machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            FractalError::Validation(_) => "validation",
            FractalError::Conflict { .. } => "conflict",
            FractalError::LimitExceeded { .. } => "limit_exceeded",
            FractalError::QuorumFailure { .. } => "quorum_failure",
            FractalError::CorruptionSuspected(_) => "corruption_suspected",
            FractalError::InvariantViolation(_) => "invariant_violation",
            FractalError::PostWriteMismatch(_) => "post_write_mismatch",
            FractalError::UpstreamUnavailable { .. } => "upstream_unavailable",
            FractalError::AggregateRollback(_) => "aggregate_rollback",
            FractalError::Cancelled { .. } => "cancelled",
            FractalError::NotFound { .. } => "not_found",
            FractalError::Registry(_) => "registry",
        }
    }

    pub fn rollback(&self) -> Option<&RollbackReport> {
        match self {
            FractalError::AggregateRollback(report) => Some(report),
            _ => None,
        }
    }

    pub(crate) fn upstream(service: &'static str, err: impl std::fmt::Display) -> Self {
        FractalError::UpstreamUnavailable {
            service,
            message: err.to_string(),
        }
    }
}

impl From<ConfigError> for FractalError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::CorruptionSuspected { .. } => {
                FractalError::CorruptionSuspected(err.to_string())
            }
            ConfigError::InvariantViolation { .. } => {
                FractalError::InvariantViolation(err.to_string())
            }
            ConfigError::PostWriteMismatch { .. } => {
                FractalError::PostWriteMismatch(err.to_string())
            }
            other => FractalError::upstream("config store", other),
        }
    }
}

impl From<RoomError> for FractalError {
    fn from(err: RoomError) -> Self {
        FractalError::upstream("room service", err)
    }
}

impl From<GatewayError> for FractalError {
    fn from(err: GatewayError) -> Self {
        FractalError::upstream("gateway", err)
    }
}

impl From<WorkspaceError> for FractalError {
    fn from(err: WorkspaceError) -> Self {
        FractalError::upstream("filesystem", err)
    }
}
