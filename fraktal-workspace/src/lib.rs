//! # fraktal-workspace
//!
//! On-disk workspace scaffolding for fractals.
//!
//! [`WorkspaceManager::create`] renders the scaffold documents into
//! `<root>/<id>/` through the hash-gated atomic writer and applies the
//! configured ownership and modes. [`WorkspaceManager::remove`] is idempotent
//! and refuses to touch anything outside the root.

pub mod error;
pub mod manager;
pub mod writer;

pub use error::WorkspaceError;
pub use manager::{ScaffoldReport, WorkspaceManager, WorkspaceOptions};
pub use writer::WriteResult;
