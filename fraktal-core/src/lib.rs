//! Fraktal core library: domain types, registry persistence, settings, errors.
//!
//! - [`types`]: newtypes and the [`Fractal`] record
//! - [`error`]: [`RegistryError`], [`SettingsError`], [`ValidationError`]
//! - [`registry`]: the durable source of truth for what exists
//! - [`settings`]: `~/.fraktal/config.yaml`

pub mod error;
pub mod registry;
pub mod settings;
pub mod types;

pub use error::{RegistryError, SettingsError, ValidationError};
pub use registry::Registry;
pub use settings::Settings;
pub use types::{Fractal, FractalId, FractalStatus, RoomHandle};
