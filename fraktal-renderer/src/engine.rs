//! Tera rendering engine: [`Document`] enum and [`Renderer`].
//!
//! # Output mapping
//!
//! | Document | File (relative to the workspace root) |
//! |----------|---------------------------------------|
//! | Identity | `IDENTITY.md`                         |
//! | Soul     | `SOUL.md`                             |
//! | Agents   | `AGENTS.md`                           |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use crate::context::ScaffoldContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/_header.tera", include_str!("templates/_partials/header.tera")),
    ("identity.md.tera", include_str!("templates/identity.md.tera")),
    ("soul.md.tera", include_str!("templates/soul.md.tera")),
    ("agents.md.tera", include_str!("templates/agents.md.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_override_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(override_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(normalize_template_name(Path::new(name)), (*content).to_string());
    }
    if let Some(dir) = override_dir {
        for (name, content) in load_override_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Every document written into a fresh workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Document {
    Identity,
    Soul,
    Agents,
}

impl Document {
    /// All documents in a stable order.
    pub fn all() -> &'static [Document] {
        &[Document::Identity, Document::Soul, Document::Agents]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            Document::Identity => "identity.md.tera",
            Document::Soul => "soul.md.tera",
            Document::Agents => "agents.md.tera",
        }
    }

    /// Output file, relative to the workspace root.
    pub fn file_name(&self) -> &'static str {
        match self {
            Document::Identity => "IDENTITY.md",
            Document::Soul => "SOUL.md",
            Document::Agents => "AGENTS.md",
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Tera-based renderer for the scaffold documents.
///
/// `override_dir` may contain `.tera` files (same names as the embedded ones,
/// e.g. `soul.md.tera`) that replace the defaults. Create once and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new(override_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer { tera: build_tera(override_dir)? })
    }

    /// Render one document. Line endings are normalised to LF.
    pub fn render(&self, ctx: &ScaffoldContext, doc: Document) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let content = self.tera.render(doc.template_name(), &tera_ctx)?;
        Ok(content.replace("\r\n", "\n"))
    }

    /// Render every document. Returns `(relative_path, content)` pairs.
    pub fn render_all(&self, ctx: &ScaffoldContext) -> Result<Vec<(PathBuf, String)>, RenderError> {
        Document::all()
            .iter()
            .map(|doc| -> Result<(PathBuf, String), RenderError> {
                Ok((PathBuf::from(doc.file_name()), self.render(ctx, *doc)?))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fraktal_core::{Fractal, FractalId};
    use tempfile::TempDir;

    fn make_fractal() -> Fractal {
        let mut f = Fractal::pending(
            FractalId::parse("scout").unwrap(),
            "Scout".to_string(),
            PathBuf::from("/srv/fractals/scout"),
            "anthropic/claude-sonnet-4".to_string(),
        );
        f.purpose = Some("Watch the deploy channel and summarise incidents.".to_string());
        f
    }

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new(None).expect("Renderer::new should succeed with embedded templates");
    }

    #[test]
    fn all_documents_render_with_identity() {
        let renderer = Renderer::new(None).unwrap();
        let ctx = ScaffoldContext::from_fractal(&make_fractal(), Some("Dry humour."));
        let outputs = renderer.render_all(&ctx).unwrap();
        assert_eq!(outputs.len(), Document::all().len());
        for (path, content) in &outputs {
            assert!(content.contains("Scout"), "{} should name the fractal", path.display());
            assert!(!content.contains('\r'), "{} contains CR", path.display());
        }
    }

    #[test]
    fn soul_falls_back_without_persona() {
        let renderer = Renderer::new(None).unwrap();
        let ctx = ScaffoldContext::from_fractal(&make_fractal(), None);
        let soul = renderer.render(&ctx, Document::Soul).unwrap();
        assert!(soul.contains("No persona was supplied"));
    }

    #[test]
    fn agents_doc_reflects_reply_mode() {
        let renderer = Renderer::new(None).unwrap();
        let mut fractal = make_fractal();
        let quiet = renderer
            .render(&ScaffoldContext::from_fractal(&fractal, None), Document::Agents)
            .unwrap();
        assert!(quiet.contains("only when mentioned"));
        assert!(quiet.contains("summarise incidents"));

        fractal.auto_reply = true;
        let chatty = renderer
            .render(&ScaffoldContext::from_fractal(&fractal, None), Document::Agents)
            .unwrap();
        assert!(chatty.contains("every message"));
    }

    #[test]
    fn override_dir_replaces_embedded_template() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("identity.md.tera"),
            "custom card for {{ identity.id }}\n",
        )
        .unwrap();
        let renderer = Renderer::new(Some(dir.path())).unwrap();
        let ctx = ScaffoldContext::from_fractal(&make_fractal(), None);
        assert_eq!(
            renderer.render(&ctx, Document::Identity).unwrap(),
            "custom card for scout\n"
        );
    }

    #[test]
    fn file_names_are_stable() {
        let names: Vec<_> = Document::all().iter().map(Document::file_name).collect();
        assert_eq!(names, ["IDENTITY.md", "SOUL.md", "AGENTS.md"]);
    }
}
