//! In-memory copy of the gateway's configuration.
//!
//! The store only replaces whole collections, so every entry type keeps the
//! fields it does not model in a flattened map. Writing a collection back
//! never drops data belonging to other agents.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use fraktal_core::Fractal;

use crate::error::ConfigError;

/// Binding match kind for a room-specific route.
pub const PEER_KIND_CHANNEL: &str = "channel";

/// Channel whose room settings a store addresses unless told otherwise.
pub const DEFAULT_CHANNEL: &str = "matrix";

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// A sub-collection the store can replace independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Agents,
    Bindings,
    RoomSettings,
}

impl Collection {
    pub fn all() -> &'static [Collection] {
        &[Collection::Agents, Collection::Bindings, Collection::RoomSettings]
    }

    /// Dotted path of the collection inside the gateway config document.
    /// Room settings live under the channel the bindings route on.
    pub fn path(&self, channel: &str) -> String {
        match self {
            Collection::Agents => "agents.list".to_string(),
            Collection::Bindings => "bindings".to_string(),
            Collection::RoomSettings => format!("channels.{channel}.rooms"),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::Agents => f.write_str("agents.list"),
            Collection::Bindings => f.write_str("bindings"),
            Collection::RoomSettings => f.write_str("channels.<channel>.rooms"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentEntry {
    pub fn for_fractal(fractal: &Fractal) -> Self {
        AgentEntry {
            id: fractal.id.to_string(),
            name: Some(fractal.display_name.clone()),
            workspace: Some(fractal.workspace_path.clone()),
            model: Some(Value::String(fractal.model.clone())),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub kind: String,
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<Peer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingEntry {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(rename = "match", default)]
    pub matcher: BindingMatch,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BindingEntry {
    /// Route messages from one room on `channel` to `agent_id`.
    pub fn for_room(agent_id: &str, channel: &str, room: &str) -> Self {
        BindingEntry {
            agent_id: agent_id.to_owned(),
            matcher: BindingMatch {
                channel: Some(channel.to_owned()),
                peer: Some(Peer {
                    kind: PEER_KIND_CHANNEL.to_owned(),
                    id: room.to_owned(),
                    extra: Map::new(),
                }),
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    /// The catch-all route: no peer and no other match criteria.
    pub fn is_fallback(&self) -> bool {
        self.matcher.peer.is_none() && self.matcher.extra.is_empty()
    }

    pub fn room(&self) -> Option<&str> {
        self.matcher
            .peer
            .as_ref()
            .filter(|p| p.kind == PEER_KIND_CHANNEL)
            .map(|p| p.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettingsEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub require_mention: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl RoomSettingsEntry {
    pub fn new(auto_reply: bool) -> Self {
        RoomSettingsEntry {
            enabled: true,
            require_mention: !auto_reply,
            extra: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    pub agents: Vec<AgentEntry>,
    /// Ordered; the fallback entry must be last.
    pub bindings: Vec<BindingEntry>,
    pub room_settings: BTreeMap<String, RoomSettingsEntry>,
    /// Opaque stamp from the store, when it provides one.
    pub version: Option<String>,
}

impl ConfigSnapshot {
    /// Build from raw collection values. `None` or `null` is an empty collection.
    pub fn from_values(
        agents: Option<Value>,
        bindings: Option<Value>,
        room_settings: Option<Value>,
        version: Option<String>,
    ) -> Result<Self, ConfigError> {
        Ok(ConfigSnapshot {
            agents: decode(Collection::Agents, agents)?,
            bindings: decode(Collection::Bindings, bindings)?,
            room_settings: decode(Collection::RoomSettings, room_settings)?,
            version,
        })
    }

    /// Serialize one collection for a whole-collection replace.
    pub fn to_value(&self, collection: Collection) -> Result<Value, ConfigError> {
        let value = match collection {
            Collection::Agents => serde_json::to_value(&self.agents)?,
            Collection::Bindings => serde_json::to_value(&self.bindings)?,
            Collection::RoomSettings => serde_json::to_value(&self.room_settings)?,
        };
        Ok(value)
    }

    pub fn size(&self, collection: Collection) -> usize {
        match collection {
            Collection::Agents => self.agents.len(),
            Collection::Bindings => self.bindings.len(),
            Collection::RoomSettings => self.room_settings.len(),
        }
    }

    pub fn agent(&self, id: &str) -> Option<&AgentEntry> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// The specific (non-fallback) binding routing to `agent_id`.
    pub fn binding_for(&self, agent_id: &str) -> Option<&BindingEntry> {
        self.bindings
            .iter()
            .find(|b| b.agent_id == agent_id && !b.is_fallback())
    }

    pub fn fallback_index(&self) -> Option<usize> {
        self.bindings.iter().position(BindingEntry::is_fallback)
    }

    pub fn room_settings_for(&self, room: &str) -> Option<&RoomSettingsEntry> {
        self.room_settings.get(room)
    }
}

fn decode<T: serde::de::DeserializeOwned + Default>(
    collection: Collection,
    value: Option<Value>,
) -> Result<T, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v)
            .map_err(|source| ConfigError::Malformed { collection, source }),
    }
}
