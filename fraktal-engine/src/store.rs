//! The gateway configuration store seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ConfigError;
use crate::snapshot::{Collection, ConfigSnapshot};

/// A store that can hand out a full snapshot and replace one collection at a
/// time. It offers no element-level patch.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn fetch(&self) -> Result<ConfigSnapshot, ConfigError>;

    /// Replace `collection` wholesale with `value`.
    ///
    /// Stores that stamp versions reject the write with
    /// `ConfigError::VersionConflict` when `expected_version` is stale.
    /// Stores without versions ignore it.
    async fn replace(
        &self,
        collection: Collection,
        value: Value,
        expected_version: Option<&str>,
    ) -> Result<(), ConfigError>;
}
