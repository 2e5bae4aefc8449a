//! Domain types for the fractal registry.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_json.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum display name length, in characters, after trimming.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

static FRACTAL_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9-]{1,31}$").expect("fractal id pattern compiles")
});

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Immutable identifier of a fractal.
///
/// Lowercase ASCII, starts with a letter, 2–32 chars of `[a-z0-9-]`. The id
/// doubles as the gateway agent id and the workspace directory name, so the
/// pattern also keeps it path-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FractalId(String);

impl FractalId {
    /// Validate and wrap `raw`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if FRACTAL_ID_PATTERN.is_match(raw) {
            Ok(Self(raw.to_owned()))
        } else {
            Err(ValidationError::InvalidId {
                id: raw.to_owned(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FractalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FractalId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FractalId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<FractalId> for String {
    fn from(id: FractalId) -> Self {
        id.0
    }
}

/// Opaque handle of a chat room, as issued by the room service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomHandle(pub String);

impl RoomHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RoomHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Trim and length-check a human-facing display name.
pub fn validate_display_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField { field: "name" });
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ValidationError::TooLong {
            field: "name",
            max: MAX_DISPLAY_NAME_CHARS,
        });
    }
    Ok(trimmed.to_owned())
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a fractal as recorded in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FractalStatus {
    /// Recorded, no external side effect yet.
    #[default]
    Pending,
    /// Create saga is running external steps.
    Provisioning,
    Active,
    /// Not written by the sagas. Records carrying it still load and can be
    /// deleted.
    Failed,
    Deleting,
}

impl FractalStatus {
    /// True while a create saga still owns the record.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, FractalStatus::Pending | FractalStatus::Provisioning)
    }
}

impl fmt::Display for FractalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FractalStatus::Pending => write!(f, "pending"),
            FractalStatus::Provisioning => write!(f, "provisioning"),
            FractalStatus::Active => write!(f, "active"),
            FractalStatus::Failed => write!(f, "failed"),
            FractalStatus::Deleting => write!(f, "deleting"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One provisioned sub-agent identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fractal {
    pub id: FractalId,
    pub display_name: String,
    /// `None` until the room step of the create saga has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomHandle>,
    pub workspace_path: PathBuf,
    pub model: String,
    pub status: FractalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default)]
    pub auto_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fractal {
    /// A fresh `pending` record.
    pub fn pending(
        id: FractalId,
        display_name: String,
        workspace_path: PathBuf,
        model: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            display_name,
            room: None,
            workspace_path,
            model,
            status: FractalStatus::Pending,
            purpose: None,
            auto_reply: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
