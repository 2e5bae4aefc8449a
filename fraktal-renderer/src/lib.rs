//! # fraktal-renderer
//!
//! Tera-based rendering of the documents that seed a fractal workspace:
//! identity card, persona and operating notes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fraktal_renderer::{Document, Renderer, ScaffoldContext};
//! use fraktal_core::Fractal;
//!
//! fn render_all(fractal: &Fractal) {
//!     if let Ok(renderer) = Renderer::new(None) {
//!         let ctx = ScaffoldContext::from_fractal(fractal, None);
//!         if let Ok(outputs) = renderer.render_all(&ctx) {
//!             for (name, content) in outputs {
//!                 println!("{}: {} bytes", name.display(), content.len());
//!             }
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::ScaffoldContext;
pub use engine::{Document, Renderer};
pub use error::RenderError;
