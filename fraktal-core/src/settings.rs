//! Service settings: `~/.fraktal/config.yaml`.
//!
//! Every field has a serde default so a partial file (or an empty one) is a
//! valid configuration. `FRAKTAL_API_TOKEN` overrides `api_token` at load.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{settings_io, SettingsError};

/// Environment variable that overrides [`Settings::api_token`].
pub const API_TOKEN_ENV: &str = "FRAKTAL_API_TOKEN";

/// `<home>/.fraktal/config.yaml`. Pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    home.join(".fraktal").join("config.yaml")
}

fn home() -> Result<PathBuf, SettingsError> {
    dirs::home_dir().ok_or(SettingsError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Settings tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind: String,
    /// Bearer secret for every non-health route.
    pub api_token: String,
    /// `None` resolves to `~/.fraktal/registry.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<PathBuf>,
    pub max_fractals: usize,
    /// Known-minimum number of agent entries in the gateway config.
    pub min_agent_floor: usize,
    pub default_model: String,
    /// Binding channel name used in agent routing rules.
    pub channel: String,
    /// User invited when a fresh room is below quorum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filler_participant: Option<String>,
    pub quorum_settle_ms: u64,
    pub workspace: WorkspaceSettings,
    pub timeouts: TimeoutSettings,
    pub rooms: RoomServiceSettings,
    pub config_store: ConfigStoreSettings,
    pub gateway: GatewaySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            api_token: String::new(),
            registry_path: None,
            max_fractals: 10,
            min_agent_floor: 1,
            default_model: "anthropic/claude-sonnet-4".to_string(),
            channel: "matrix".to_string(),
            filler_participant: None,
            quorum_settle_ms: 500,
            workspace: WorkspaceSettings::default(),
            timeouts: TimeoutSettings::default(),
            rooms: RoomServiceSettings::default(),
            config_store: ConfigStoreSettings::default(),
            gateway: GatewaySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Directory under which every fractal gets `<root>/<id>/`.
    pub root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerSettings>,
    /// Directory of `.tera` files overriding the embedded templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
    pub dir_mode: u32,
    pub file_mode: u32,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/fraktal/workspaces"),
            owner: None,
            template_dir: None,
            dir_mode: 0o750,
            file_mode: 0o640,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSettings {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Per-collaborator call timeouts, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub room_ms: u64,
    pub config_store_ms: u64,
    pub filesystem_ms: u64,
    pub gateway_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            room_ms: 10_000,
            config_store_ms: 15_000,
            filesystem_ms: 5_000,
            gateway_ms: 30_000,
        }
    }
}

impl TimeoutSettings {
    pub fn room(&self) -> Duration {
        Duration::from_millis(self.room_ms)
    }
    pub fn config_store(&self) -> Duration {
        Duration::from_millis(self.config_store_ms)
    }
    pub fn filesystem(&self) -> Duration {
        Duration::from_millis(self.filesystem_ms)
    }
    pub fn gateway(&self) -> Duration {
        Duration::from_millis(self.gateway_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomBackend {
    #[default]
    Matrix,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomServiceSettings {
    pub backend: RoomBackend,
    pub homeserver: String,
    pub access_token: String,
    pub bot_user_id: String,
}

impl Default for RoomServiceSettings {
    fn default() -> Self {
        Self {
            backend: RoomBackend::Matrix,
            homeserver: "http://127.0.0.1:8008".to_string(),
            access_token: String::new(),
            bot_user_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStoreBackend {
    #[default]
    Cli,
    File,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigStoreSettings {
    pub backend: ConfigStoreBackend,
    /// Gateway CLI used by the `cli` backend.
    pub binary: String,
    /// Gateway JSON config used by the `file` backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for ConfigStoreSettings {
    fn default() -> Self {
        Self {
            backend: ConfigStoreBackend::Cli,
            binary: "openclaw".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayBackend {
    #[default]
    Command,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub backend: GatewayBackend,
    /// argv of the reload command.
    pub command: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            backend: GatewayBackend::Command,
            command: vec![
                "openclaw".to_string(),
                "gateway".to_string(),
                "restart".to_string(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

impl Settings {
    /// Load settings from `path`; a missing file yields defaults.
    ///
    /// `FRAKTAL_API_TOKEN`, when set and non-empty, replaces `api_token`.
    pub fn load_at(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| settings_io(path, e))?;
            if contents.trim().is_empty() {
                Settings::default()
            } else {
                serde_yaml::from_str(&contents).map_err(|e| SettingsError::Parse {
                    path: path.to_path_buf(),
                    source: e,
                })?
            }
        } else {
            Settings::default()
        };
        if let Ok(token) = std::env::var(API_TOKEN_ENV) {
            if !token.is_empty() {
                settings.api_token = token;
            }
        }
        Ok(settings)
    }

    /// `load_at` convenience wrapper for `~/.fraktal/config.yaml`.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_at(&settings_path_at(&home()?))
    }

    /// Registry file location, resolving the default against `home`.
    pub fn registry_path_at(&self, home: &Path) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| crate::registry::registry_path_at(home))
    }

    /// Checks that must hold before the service starts.
    pub fn validate_for_serve(&self) -> Result<(), SettingsError> {
        if self.api_token.trim().is_empty() {
            return Err(SettingsError::Invalid(format!(
                "api_token is empty; set it in the settings file or via {API_TOKEN_ENV}"
            )));
        }
        if self.max_fractals == 0 {
            return Err(SettingsError::Invalid("max_fractals must be at least 1".into()));
        }
        if self.rooms.backend == RoomBackend::Matrix
            && (self.rooms.access_token.is_empty() || self.rooms.bot_user_id.is_empty())
        {
            return Err(SettingsError::Invalid(
                "rooms.access_token and rooms.bot_user_id are required for the matrix backend"
                    .into(),
            ));
        }
        if self.config_store.backend == ConfigStoreBackend::File && self.config_store.path.is_none()
        {
            return Err(SettingsError::Invalid(
                "config_store.path is required for the file backend".into(),
            ));
        }
        if self.gateway.backend == GatewayBackend::Command && self.gateway.command.is_empty() {
            return Err(SettingsError::Invalid("gateway.command must not be empty".into()));
        }
        Ok(())
    }
}

/// Write a default settings file at `path` (mode 0600).
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn write_default_at(path: &Path, force: bool) -> Result<Settings, SettingsError> {
    if path.exists() && !force {
        return Err(SettingsError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| settings_io(dir, e))?;
    }
    let settings = Settings::default();
    let yaml = serde_yaml::to_string(&settings)?;
    let contents = format!(
        "# fraktal service settings\n# Every key is optional; omitted keys take the defaults shown here.\n{yaml}"
    );
    let tmp = crate::registry::tmp_path_for(path);
    std::fs::write(&tmp, contents).map_err(|e| settings_io(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| settings_io(path, e))?;
    Ok(settings)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), SettingsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| settings_io(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), SettingsError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_fractals: 3\ntimeouts:\n  room_ms: 250\n").expect("write");
        let settings = Settings::load_at(&path).expect("load");
        assert_eq!(settings.max_fractals, 3);
        assert_eq!(settings.timeouts.room(), Duration::from_millis(250));
        assert_eq!(settings.timeouts.gateway_ms, 30_000);
        assert_eq!(settings.channel, "matrix");
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_fractals: [unclosed").expect("write");
        let err = Settings::load_at(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn serve_requires_token() {
        let mut settings = Settings {
            rooms: RoomServiceSettings {
                backend: RoomBackend::Memory,
                ..RoomServiceSettings::default()
            },
            ..Settings::default()
        };
        assert!(settings.validate_for_serve().is_err());
        settings.api_token = "s3cret".into();
        assert!(settings.validate_for_serve().is_ok());
    }

    #[test]
    fn write_default_refuses_overwrite() {
        let dir = TempDir::new().expect("tempdir");
        let path = settings_path_at(dir.path());
        write_default_at(&path, false).expect("first write");
        let err = write_default_at(&path, false).unwrap_err();
        assert!(matches!(err, SettingsError::AlreadyExists { .. }));
        write_default_at(&path, true).expect("forced write");
    }
}
