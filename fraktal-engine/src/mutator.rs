//! Read-modify-write editing of whole config collections.
//!
//! ## `mutate` protocol
//!
//! 1. Fetch the full snapshot.
//! 2. If a floor is given and the collection is below it, fail with
//!    `CorruptionSuspected` without writing.
//! 3. Apply the transform to an in-memory copy.
//! 4. Check the size delta is in the expected range, else `InvariantViolation`.
//! 5. Replace the entire collection, passing the fetched version stamp.
//! 6. Re-fetch and check the size landed, else `PostWriteMismatch`.
//!
//! A transform that reports [`Applied::Unchanged`] ends the protocol after
//! step 3 with no write, which is what makes removals idempotent.
//!
//! The mutator does not serialize callers. Route every call through
//! [`crate::queue::MutationQueue`].

use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::quota;
use crate::snapshot::{AgentEntry, BindingEntry, Collection, ConfigSnapshot, RoomSettingsEntry};
use crate::store::ConfigStore;

/// What a transform did to its copy of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
}

pub struct ConfigMutator {
    store: Arc<dyn ConfigStore>,
    timeout: Duration,
}

impl ConfigMutator {
    /// `timeout` bounds each individual store call.
    pub fn new(store: Arc<dyn ConfigStore>, timeout: Duration) -> Self {
        ConfigMutator { store, timeout }
    }

    pub async fn snapshot(&self) -> Result<ConfigSnapshot, ConfigError> {
        self.bounded("fetch", self.store.fetch()).await
    }

    /// Run the six-step protocol against `collection`.
    ///
    /// Returns the verified post-write snapshot, or the fetched snapshot when
    /// the transform changed nothing.
    pub async fn mutate<F>(
        &self,
        collection: Collection,
        expected_delta: RangeInclusive<i64>,
        min_floor: Option<usize>,
        transform: F,
    ) -> Result<ConfigSnapshot, ConfigError>
    where
        F: FnOnce(&mut ConfigSnapshot) -> Result<Applied, ConfigError>,
    {
        let current = self.snapshot().await?;
        let before = current.size(collection);
        if let Some(floor) = min_floor {
            quota::check_config_healthy(collection, before, floor)?;
        }

        let mut next = current.clone();
        if transform(&mut next)? == Applied::Unchanged {
            tracing::debug!(collection = %collection, size = before, "transform was a no-op");
            return Ok(current);
        }

        let after = next.size(collection);
        let delta = after as i64 - before as i64;
        if !expected_delta.contains(&delta) {
            return Err(ConfigError::InvariantViolation {
                collection,
                expected: describe(&expected_delta),
                actual: delta,
            });
        }

        let value = next.to_value(collection)?;
        self.bounded(
            "replace",
            self.store.replace(collection, value, current.version.as_deref()),
        )
        .await?;

        let verified = self.snapshot().await?;
        let observed = verified.size(collection);
        if observed != after {
            return Err(ConfigError::PostWriteMismatch {
                collection,
                expected: after,
                observed,
            });
        }

        tracing::info!(collection = %collection, before, after, "config collection replaced");
        Ok(verified)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub async fn add_agent(
        &self,
        entry: AgentEntry,
        min_floor: Option<usize>,
    ) -> Result<ConfigSnapshot, ConfigError> {
        self.mutate(Collection::Agents, 1..=1, min_floor, move |snap| {
            if snap.agent(&entry.id).is_some() {
                return Err(ConfigError::AgentExists { id: entry.id });
            }
            snap.agents.push(entry);
            Ok(Applied::Changed)
        })
        .await
    }

    pub async fn remove_agent(&self, id: &str) -> Result<ConfigSnapshot, ConfigError> {
        self.mutate(Collection::Agents, -1..=-1, None, |snap| {
            match snap.agents.iter().position(|a| a.id == id) {
                Some(index) => {
                    snap.agents.remove(index);
                    Ok(Applied::Changed)
                }
                None => Ok(Applied::Unchanged),
            }
        })
        .await
    }

    /// Insert immediately before the fallback binding, or append when there
    /// is none. A stale binding for the same agent is replaced, so an agent
    /// never has more than one specific binding.
    pub async fn insert_binding(&self, entry: BindingEntry) -> Result<ConfigSnapshot, ConfigError> {
        self.mutate(Collection::Bindings, 0..=1, None, move |snap| {
            if let Some(existing) = snap.binding_for(&entry.agent_id) {
                if existing.room() == entry.room() {
                    return Ok(Applied::Unchanged);
                }
                tracing::warn!(
                    agent_id = %entry.agent_id,
                    stale_room = existing.room().unwrap_or_default(),
                    "replacing stale binding"
                );
                snap.bindings
                    .retain(|b| b.agent_id != entry.agent_id || b.is_fallback());
            }
            match snap.fallback_index() {
                Some(index) => snap.bindings.insert(index, entry),
                None => {
                    tracing::warn!(
                        agent_id = %entry.agent_id,
                        "no fallback binding found; appending"
                    );
                    snap.bindings.push(entry);
                }
            }
            Ok(Applied::Changed)
        })
        .await
    }

    pub async fn remove_binding(&self, agent_id: &str) -> Result<ConfigSnapshot, ConfigError> {
        self.mutate(Collection::Bindings, -1..=-1, None, |snap| {
            match snap
                .bindings
                .iter()
                .position(|b| b.agent_id == agent_id && !b.is_fallback())
            {
                Some(index) => {
                    snap.bindings.remove(index);
                    Ok(Applied::Changed)
                }
                None => Ok(Applied::Unchanged),
            }
        })
        .await
    }

    /// Insert or update. Fields of an existing entry that are not modelled
    /// are kept.
    pub async fn upsert_room_settings(
        &self,
        room: &str,
        entry: RoomSettingsEntry,
    ) -> Result<ConfigSnapshot, ConfigError> {
        self.mutate(Collection::RoomSettings, 0..=1, None, move |snap| {
            match snap.room_settings.get_mut(room) {
                Some(existing)
                    if existing.enabled == entry.enabled
                        && existing.require_mention == entry.require_mention =>
                {
                    Ok(Applied::Unchanged)
                }
                Some(existing) => {
                    existing.enabled = entry.enabled;
                    existing.require_mention = entry.require_mention;
                    Ok(Applied::Changed)
                }
                None => {
                    snap.room_settings.insert(room.to_owned(), entry);
                    Ok(Applied::Changed)
                }
            }
        })
        .await
    }

    pub async fn remove_room_settings(&self, room: &str) -> Result<ConfigSnapshot, ConfigError> {
        self.mutate(Collection::RoomSettings, -1..=-1, None, |snap| {
            Ok(match snap.room_settings.remove(room) {
                Some(_) => Applied::Changed,
                None => Applied::Unchanged,
            })
        })
        .await
    }

    async fn bounded<T>(
        &self,
        call: &'static str,
        fut: impl Future<Output = Result<T, ConfigError>>,
    ) -> Result<T, ConfigError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ConfigError::Timeout {
                call,
                after: self.timeout,
            })?
    }
}

fn describe(range: &RangeInclusive<i64>) -> String {
    if range.start() == range.end() {
        format!("{:+}", range.start())
    } else {
        format!("{:+}..={:+}", range.start(), range.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryConfigStore;
    use serde_json::json;

    fn seeded() -> Arc<MemoryConfigStore> {
        let store = MemoryConfigStore::new();
        store.seed(
            ConfigSnapshot::from_values(
                Some(json!([{ "id": "main", "default": true }])),
                Some(json!([{ "agentId": "main", "match": { "channel": "matrix" } }])),
                Some(json!({})),
                None,
            )
            .unwrap(),
        );
        Arc::new(store)
    }

    fn mutator(store: &Arc<MemoryConfigStore>) -> ConfigMutator {
        ConfigMutator::new(store.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn binding_lands_before_fallback() {
        let store = seeded();
        let snap = mutator(&store)
            .insert_binding(BindingEntry::for_room("scout", "matrix", "!r:x"))
            .await
            .unwrap();
        assert_eq!(snap.bindings[0].agent_id, "scout");
        assert!(snap.bindings[1].is_fallback());
    }

    #[tokio::test]
    async fn stale_binding_is_replaced_not_duplicated() {
        let store = seeded();
        let m = mutator(&store);
        m.insert_binding(BindingEntry::for_room("scout", "matrix", "!old:x"))
            .await
            .unwrap();
        let snap = m
            .insert_binding(BindingEntry::for_room("scout", "matrix", "!new:x"))
            .await
            .unwrap();

        let scout: Vec<_> = snap
            .bindings
            .iter()
            .filter(|b| b.agent_id == "scout")
            .collect();
        assert_eq!(scout.len(), 1);
        assert_eq!(scout[0].room(), Some("!new:x"));
        assert_eq!(snap.bindings.len(), 2);
        assert!(snap.bindings[1].is_fallback());
    }

    #[tokio::test]
    async fn binding_appends_without_fallback() {
        let store = MemoryConfigStore::new();
        let store = Arc::new(store);
        let snap = mutator(&store)
            .insert_binding(BindingEntry::for_room("scout", "matrix", "!r:x"))
            .await
            .unwrap();
        assert_eq!(snap.bindings.len(), 1);
    }

    #[tokio::test]
    async fn removing_absent_entry_writes_nothing() {
        let store = seeded();
        let m = mutator(&store);
        m.remove_agent("ghost").await.unwrap();
        m.remove_binding("ghost").await.unwrap();
        m.remove_room_settings("!nope:x").await.unwrap();
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn floor_violation_refuses_to_write() {
        let store = seeded();
        let err = mutator(&store)
            .add_agent(
                AgentEntry {
                    id: "scout".into(),
                    name: None,
                    workspace: None,
                    model: None,
                    extra: Default::default(),
                },
                Some(3),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::CorruptionSuspected { observed: 1, floor: 3, .. }));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn wrong_delta_is_an_invariant_violation() {
        let store = seeded();
        let err = mutator(&store)
            .mutate(Collection::Agents, 1..=1, None, |snap| {
                snap.agents.clear();
                Ok(Applied::Changed)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvariantViolation { actual: -1, .. }));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn dropped_write_is_detected() {
        let store = seeded();
        store.drop_writes(true);
        let err = mutator(&store)
            .remove_agent("main")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::PostWriteMismatch { expected: 0, observed: 1, .. }));
    }

    #[tokio::test]
    async fn upsert_preserves_unknown_room_fields() {
        let store = MemoryConfigStore::new();
        store.seed(
            ConfigSnapshot::from_values(
                None,
                None,
                Some(json!({ "!r:x": { "enabled": true, "requireMention": true, "users": ["@a:x"] } })),
                None,
            )
            .unwrap(),
        );
        let store = Arc::new(store);
        let snap = mutator(&store)
            .upsert_room_settings("!r:x", RoomSettingsEntry::new(true))
            .await
            .unwrap();
        let entry = snap.room_settings_for("!r:x").unwrap();
        assert!(!entry.require_mention);
        assert_eq!(entry.extra["users"], json!(["@a:x"]));
    }

    #[test]
    fn describe_formats_ranges() {
        assert_eq!(describe(&(1..=1)), "+1");
        assert_eq!(describe(&(0..=1)), "+0..=+1");
    }
}
