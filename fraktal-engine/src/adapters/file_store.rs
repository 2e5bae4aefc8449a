//! Config store backed directly by the gateway's JSON config file.
//!
//! The version stamp is the SHA-256 of the file bytes. A replace whose
//! expected version no longer matches the file is rejected, which closes the
//! lost-update window against writers outside this process too.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::snapshot::{Collection, ConfigSnapshot, DEFAULT_CHANNEL};
use crate::store::ConfigStore;

pub struct FileConfigStore {
    path: PathBuf,
    channel: String,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfigStore {
            path: path.into(),
            channel: DEFAULT_CHANNEL.to_owned(),
        }
    }

    /// Address room settings under `channels.<channel>.rooms`.
    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_owned();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn version_of(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

fn read_document(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ConfigError::Store(format!("could not read {}: {e}", path.display())))?;
    let version = version_of(&bytes);
    let doc = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((doc, version))
}

fn get_path<'a>(doc: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted.split('.').try_fold(doc, |node, key| node.get(key))
}

fn set_path(doc: &mut Value, dotted: &str, value: Value) -> Result<(), ConfigError> {
    let mut keys: Vec<&str> = dotted.split('.').collect();
    let last = keys
        .pop()
        .ok_or_else(|| ConfigError::Store("empty config path".to_string()))?;
    let mut node = doc;
    for key in keys {
        let map = node
            .as_object_mut()
            .ok_or_else(|| ConfigError::Store(format!("'{dotted}' crosses a non-object")))?;
        node = map
            .entry(key.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    node.as_object_mut()
        .ok_or_else(|| ConfigError::Store(format!("'{dotted}' crosses a non-object")))?
        .insert(last.to_owned(), value);
    Ok(())
}

fn fetch_blocking(path: &Path, channel: &str) -> Result<ConfigSnapshot, ConfigError> {
    let (doc, version) = read_document(path)?;
    let pick = |c: Collection| get_path(&doc, &c.path(channel)).cloned();
    ConfigSnapshot::from_values(
        pick(Collection::Agents),
        pick(Collection::Bindings),
        pick(Collection::RoomSettings),
        Some(version),
    )
}

fn replace_blocking(
    path: &Path,
    channel: &str,
    collection: Collection,
    value: Value,
    expected_version: Option<&str>,
) -> Result<(), ConfigError> {
    let (mut doc, version) = read_document(path)?;
    if let Some(expected) = expected_version {
        if expected != version {
            return Err(ConfigError::VersionConflict { collection });
        }
    }
    set_path(&mut doc, &collection.path(channel), value)?;

    let mut json = serde_json::to_string_pretty(&doc)?;
    json.push('\n');
    let tmp = PathBuf::from(format!("{}.fraktal.tmp", path.display()));
    std::fs::write(&tmp, json)
        .map_err(|e| ConfigError::Store(format!("could not write {}: {e}", tmp.display())))?;
    if let Ok(meta) = std::fs::metadata(path) {
        let _ = std::fs::set_permissions(&tmp, meta.permissions());
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(ConfigError::Store(format!(
            "could not replace {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn fetch(&self) -> Result<ConfigSnapshot, ConfigError> {
        let path = self.path.clone();
        let channel = self.channel.clone();
        tokio::task::spawn_blocking(move || fetch_blocking(&path, &channel))
            .await
            .map_err(|e| ConfigError::Store(format!("config read task failed: {e}")))?
    }

    async fn replace(
        &self,
        collection: Collection,
        value: Value,
        expected_version: Option<&str>,
    ) -> Result<(), ConfigError> {
        let path = self.path.clone();
        let channel = self.channel.clone();
        let expected = expected_version.map(str::to_owned);
        tokio::task::spawn_blocking(move || {
            replace_blocking(&path, &channel, collection, value, expected.as_deref())
        })
        .await
        .map_err(|e| ConfigError::Store(format!("config write task failed: {e}")))?
    }
}
