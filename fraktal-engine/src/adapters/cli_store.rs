//! Config store driven through the gateway's own CLI.
//!
//! `<bin> config get <path> --json` prints one collection as JSON;
//! `<bin> config set <path> <json> --json` replaces it. The CLI has no
//! version stamp, so snapshots from this store carry none.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::error::ConfigError;
use crate::snapshot::{Collection, ConfigSnapshot, DEFAULT_CHANNEL};
use crate::store::ConfigStore;

pub struct CliConfigStore {
    binary: String,
    channel: String,
}

impl CliConfigStore {
    pub fn new(binary: &str) -> Self {
        CliConfigStore {
            binary: binary.to_owned(),
            channel: DEFAULT_CHANNEL.to_owned(),
        }
    }

    /// Address room settings under `channels.<channel>.rooms`.
    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_owned();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, ConfigError> {
        Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConfigError::Store(format!("could not run '{}': {e}", self.binary)))
    }

    async fn get(&self, collection: Collection) -> Result<Option<Value>, ConfigError> {
        let path = collection.path(&self.channel);
        let output = self.run(&["config", "get", &path, "--json"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_path(&stderr) {
                return Ok(None);
            }
            return Err(ConfigError::Store(format!(
                "config get {path} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        parse_output(collection, &String::from_utf8_lossy(&output.stdout))
    }
}

fn is_missing_path(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("no value")
}

fn parse_output(collection: Collection, stdout: &str) -> Result<Option<Value>, ConfigError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| ConfigError::Malformed { collection, source })
}

#[async_trait]
impl ConfigStore for CliConfigStore {
    async fn fetch(&self) -> Result<ConfigSnapshot, ConfigError> {
        let agents = self.get(Collection::Agents).await?;
        let bindings = self.get(Collection::Bindings).await?;
        let rooms = self.get(Collection::RoomSettings).await?;
        ConfigSnapshot::from_values(agents, bindings, rooms, None)
    }

    async fn replace(
        &self,
        collection: Collection,
        value: Value,
        _expected_version: Option<&str>,
    ) -> Result<(), ConfigError> {
        let json = serde_json::to_string(&value)?;
        let path = collection.path(&self.channel);
        let output = self.run(&["config", "set", &path, &json, "--json"]).await?;
        if !output.status.success() {
            return Err(ConfigError::Store(format!(
                "config set {path} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
