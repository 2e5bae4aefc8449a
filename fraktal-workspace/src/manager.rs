//! Workspace scaffold creation and removal.
//!
//! ```text
//! <root>/<id>/
//!   IDENTITY.md
//!   SOUL.md
//!   AGENTS.md
//!   memory/
//! ```

use std::path::{Component, Path, PathBuf};

use fraktal_core::settings::{OwnerSettings, WorkspaceSettings};
use fraktal_core::{Fractal, FractalId};
use fraktal_renderer::{Renderer, ScaffoldContext};

use crate::error::{io_err, WorkspaceError};
use crate::writer::{atomic_write, set_mode, WriteResult};

/// Subdirectory for the agent's own notes.
pub const MEMORY_DIR: &str = "memory";

/// Everything the manager needs, resolved once at construction.
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    pub root: PathBuf,
    pub owner: Option<OwnerSettings>,
    pub template_dir: Option<PathBuf>,
    pub dir_mode: u32,
    pub file_mode: u32,
}

impl From<&WorkspaceSettings> for WorkspaceOptions {
    fn from(s: &WorkspaceSettings) -> Self {
        WorkspaceOptions {
            root: s.root.clone(),
            owner: s.owner.clone(),
            template_dir: s.template_dir.clone(),
            dir_mode: s.dir_mode,
            file_mode: s.file_mode,
        }
    }
}

/// Result of scaffolding one workspace.
#[derive(Debug, Clone)]
pub struct ScaffoldReport {
    pub path: PathBuf,
    pub writes: Vec<WriteResult>,
}

impl ScaffoldReport {
    pub fn written(&self) -> usize {
        self.writes.iter().filter(|w| w.is_written()).count()
    }
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
struct Ownership {
    uid: nix::unistd::Uid,
    gid: nix::unistd::Gid,
}

pub struct WorkspaceManager {
    root: PathBuf,
    renderer: Renderer,
    dir_mode: u32,
    file_mode: u32,
    #[cfg(unix)]
    ownership: Option<Ownership>,
}

impl WorkspaceManager {
    /// Build a manager. Unknown owner user/group names fail here rather than
    /// halfway through a scaffold.
    pub fn new(options: WorkspaceOptions) -> Result<Self, WorkspaceError> {
        let renderer = Renderer::new(options.template_dir.as_deref())?;
        Ok(WorkspaceManager {
            root: options.root,
            renderer,
            dir_mode: options.dir_mode,
            file_mode: options.file_mode,
            #[cfg(unix)]
            ownership: options.owner.as_ref().map(resolve_owner).transpose()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<id>`. Pure, no I/O.
    pub fn path_for(&self, id: &FractalId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// True when `path` lies strictly below the root, lexically.
    pub fn is_under_root(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(rest) => {
                rest.components().next().is_some()
                    && rest.components().all(|c| matches!(c, Component::Normal(_)))
            }
            Err(_) => false,
        }
    }

    /// Create the scaffold for `fractal` and render its documents.
    ///
    /// Re-running against an existing workspace only rewrites documents whose
    /// content changed.
    pub fn create(
        &self,
        fractal: &Fractal,
        persona: Option<&str>,
    ) -> Result<ScaffoldReport, WorkspaceError> {
        let dir = self.path_for(&fractal.id);
        self.guard(&dir)?;

        let memory = dir.join(MEMORY_DIR);
        std::fs::create_dir_all(&memory).map_err(|e| io_err(&memory, e))?;
        set_mode(&dir, self.dir_mode)?;
        set_mode(&memory, self.dir_mode)?;

        let ctx = ScaffoldContext::from_fractal(fractal, persona);
        let mut writes = Vec::new();
        for (rel, content) in self.renderer.render_all(&ctx)? {
            writes.push(atomic_write(&dir.join(rel), &content, Some(self.file_mode))?);
        }

        self.apply_ownership(&dir)?;

        let report = ScaffoldReport { path: dir, writes };
        tracing::info!(
            fractal_id = %fractal.id,
            path = %report.path.display(),
            written = report.written(),
            "workspace scaffolded"
        );
        Ok(report)
    }

    /// Remove a workspace tree. Returns `false` if it did not exist.
    pub fn remove(&self, path: &Path) -> Result<bool, WorkspaceError> {
        self.guard(path)?;
        if !path.exists() {
            tracing::debug!(path = %path.display(), "workspace already absent");
            return Ok(false);
        }
        std::fs::remove_dir_all(path).map_err(|e| io_err(path, e))?;
        tracing::info!(path = %path.display(), "workspace removed");
        Ok(true)
    }

    #[cfg(unix)]
    fn apply_ownership(&self, dir: &Path) -> Result<(), WorkspaceError> {
        match self.ownership {
            Some(owner) => chown_tree(dir, owner),
            None => Ok(()),
        }
    }
    #[cfg(not(unix))]
    fn apply_ownership(&self, _dir: &Path) -> Result<(), WorkspaceError> {
        Ok(())
    }

    fn guard(&self, path: &Path) -> Result<(), WorkspaceError> {
        if self.is_under_root(path) {
            Ok(())
        } else {
            Err(WorkspaceError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn resolve_owner(owner: &OwnerSettings) -> Result<Ownership, WorkspaceError> {
    use nix::unistd::{Group, User};

    let user = User::from_name(&owner.user)
        .ok()
        .flatten()
        .ok_or_else(|| WorkspaceError::UnknownUser(owner.user.clone()))?;
    let gid = match &owner.group {
        Some(name) => {
            Group::from_name(name)
                .ok()
                .flatten()
                .ok_or_else(|| WorkspaceError::UnknownGroup(name.clone()))?
                .gid
        }
        None => user.gid,
    };
    Ok(Ownership { uid: user.uid, gid })
}

#[cfg(unix)]
fn chown_tree(path: &Path, owner: Ownership) -> Result<(), WorkspaceError> {
    nix::unistd::chown(path, Some(owner.uid), Some(owner.gid)).map_err(|e| {
        WorkspaceError::Ownership {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;
    if path.is_dir() {
        let entries = std::fs::read_dir(path).map_err(|e| io_err(path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(path, e))?;
            chown_tree(&entry.path(), owner)?;
        }
    }
    Ok(())
}
