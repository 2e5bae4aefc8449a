//! Template context: serializable rendering payload built from a [`Fractal`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fraktal_core::Fractal;

use crate::error::RenderError;

/// Rendering payload shared by every scaffold document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaffoldContext {
    pub identity: IdentityCtx,
    /// Free-form persona text supplied at creation; drives `SOUL.md`.
    pub persona: Option<String>,
    /// What the fractal is for; drives `AGENTS.md`.
    pub purpose: Option<String>,
    pub behaviour: BehaviourCtx,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityCtx {
    pub id: String,
    pub display_name: String,
    pub model: String,
    pub room: Option<String>,
    pub workspace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviourCtx {
    /// Reply to every message rather than only when mentioned.
    pub auto_reply: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub fraktal_version: String,
    pub created_at: DateTime<Utc>,
}

impl ScaffoldContext {
    /// Build a [`ScaffoldContext`] from a registry record plus creation-only persona text.
    pub fn from_fractal(fractal: &Fractal, persona: Option<&str>) -> Self {
        ScaffoldContext {
            identity: IdentityCtx {
                id: fractal.id.to_string(),
                display_name: fractal.display_name.clone(),
                model: fractal.model.clone(),
                room: fractal.room.as_ref().map(|r| r.to_string()),
                workspace: fractal.workspace_path.display().to_string(),
            },
            persona: non_blank(persona),
            purpose: non_blank(fractal.purpose.as_deref()),
            behaviour: BehaviourCtx {
                auto_reply: fractal.auto_reply,
            },
            meta: MetaCtx {
                fraktal_version: env!("CARGO_PKG_VERSION").to_string(),
                created_at: fractal.created_at,
            },
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}
