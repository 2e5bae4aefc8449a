//! In-process collaborators with latency and failure injection.
//!
//! Used by `backend: memory` in settings and by the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use fraktal_core::RoomHandle;

use crate::error::{ConfigError, GatewayError, RoomError};
use crate::gateway::GatewayControl;
use crate::rooms::RoomService;
use crate::snapshot::{Collection, ConfigSnapshot};
use crate::store::ConfigStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryRoomService
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryRoom {
    name: String,
    joined: Vec<String>,
    invited: Vec<String>,
    bot_display_name: Option<String>,
}

/// Rooms live in a map. Invitees join immediately unless auto-join is off.
pub struct MemoryRoomService {
    bot_user_id: String,
    rooms: Mutex<HashMap<String, MemoryRoom>>,
    next_id: AtomicUsize,
    auto_join: AtomicBool,
    fail_create: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryRoomService {
    pub fn new(bot_user_id: &str) -> Self {
        MemoryRoomService {
            bot_user_id: bot_user_id.to_owned(),
            rooms: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            auto_join: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_auto_join(&self, on: bool) {
        self.auto_join.store(on, Ordering::SeqCst);
    }

    pub fn fail_create(&self, on: bool) {
        self.fail_create.store(on, Ordering::SeqCst);
    }

    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn room_count(&self) -> usize {
        lock(&self.rooms).len()
    }

    /// Joined members of `room`, bot included.
    pub fn members(&self, room: &RoomHandle) -> Vec<String> {
        lock(&self.rooms)
            .get(room.as_str())
            .map(|r| r.joined.clone())
            .unwrap_or_default()
    }

    pub fn room_name(&self, room: &RoomHandle) -> Option<String> {
        lock(&self.rooms).get(room.as_str()).map(|r| r.name.clone())
    }

    pub fn bot_display_name(&self, room: &RoomHandle) -> Option<String> {
        lock(&self.rooms)
            .get(room.as_str())
            .and_then(|r| r.bot_display_name.clone())
    }

    async fn delay(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn add_member(&self, room: &mut MemoryRoom, user_id: &str) {
        if room.joined.iter().any(|m| m == user_id) {
            return;
        }
        if self.auto_join.load(Ordering::SeqCst) {
            room.joined.push(user_id.to_owned());
        } else if !room.invited.iter().any(|m| m == user_id) {
            room.invited.push(user_id.to_owned());
        }
    }
}

#[async_trait]
impl RoomService for MemoryRoomService {
    async fn create_room(&self, name: &str, invitees: &[String]) -> Result<RoomHandle, RoomError> {
        self.delay().await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RoomError::Http {
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        let id = format!("!room{}:memory", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut room = MemoryRoom {
            name: name.to_owned(),
            joined: vec![self.bot_user_id.clone()],
            ..MemoryRoom::default()
        };
        for user in invitees {
            self.add_member(&mut room, user);
        }
        lock(&self.rooms).insert(id.clone(), room);
        Ok(RoomHandle(id))
    }

    async fn invite(&self, room: &RoomHandle, user_id: &str) -> Result<(), RoomError> {
        self.delay().await;
        let mut rooms = lock(&self.rooms);
        let entry = rooms
            .get_mut(room.as_str())
            .ok_or_else(|| RoomError::UnknownRoom(room.to_string()))?;
        self.add_member(entry, user_id);
        Ok(())
    }

    async fn joined_member_count(&self, room: &RoomHandle) -> Result<usize, RoomError> {
        self.delay().await;
        lock(&self.rooms)
            .get(room.as_str())
            .map(|r| r.joined.len())
            .ok_or_else(|| RoomError::UnknownRoom(room.to_string()))
    }

    async fn set_display_name(&self, room: &RoomHandle, name: &str) -> Result<(), RoomError> {
        self.delay().await;
        let mut rooms = lock(&self.rooms);
        let entry = rooms
            .get_mut(room.as_str())
            .ok_or_else(|| RoomError::UnknownRoom(room.to_string()))?;
        entry.bot_display_name = Some(name.to_owned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryConfigStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    snapshot: ConfigSnapshot,
    version: u64,
}

/// A versioned snapshot behind a mutex.
///
/// Failure injection is per collection: `fail_replace_after(c, n)` lets `n`
/// more writes to `c` succeed, then fails every later one.
#[derive(Default)]
pub struct MemoryConfigStore {
    state: Mutex<StoreState>,
    write_latency: Mutex<Duration>,
    writes: AtomicUsize,
    writes_by_collection: Mutex<HashMap<Collection, usize>>,
    allowed_writes: Mutex<HashMap<Collection, usize>>,
    drop_writes: AtomicBool,
    fail_fetch: AtomicBool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole state. Not counted as a write.
    pub fn seed(&self, snapshot: ConfigSnapshot) {
        let mut state = lock(&self.state);
        state.snapshot = ConfigSnapshot {
            version: None,
            ..snapshot
        };
        state.version += 1;
    }

    /// Edit the stored state directly, bypassing the protocol.
    pub fn tamper(&self, edit: impl FnOnce(&mut ConfigSnapshot)) {
        let mut state = lock(&self.state);
        edit(&mut state.snapshot);
        state.version += 1;
    }

    pub fn current(&self) -> ConfigSnapshot {
        lock(&self.state).snapshot.clone()
    }

    /// Successful replace calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn writes_to(&self, collection: Collection) -> usize {
        lock(&self.writes_by_collection)
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Delay applied before every replace call.
    pub fn set_write_latency(&self, latency: Duration) {
        *lock(&self.write_latency) = latency;
    }

    /// Accept writes without applying them.
    pub fn drop_writes(&self, on: bool) {
        self.drop_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, on: bool) {
        self.fail_fetch.store(on, Ordering::SeqCst);
    }

    pub fn fail_replace(&self, collection: Collection) {
        self.fail_replace_after(collection, 0);
    }

    pub fn fail_replace_after(&self, collection: Collection, successes: usize) {
        lock(&self.allowed_writes).insert(collection, successes);
    }

    pub fn clear_failures(&self) {
        lock(&self.allowed_writes).clear();
        self.fail_fetch.store(false, Ordering::SeqCst);
        self.drop_writes.store(false, Ordering::SeqCst);
    }

    fn check_injected_failure(&self, collection: Collection) -> Result<(), ConfigError> {
        let mut allowed = lock(&self.allowed_writes);
        match allowed.get_mut(&collection) {
            Some(0) => Err(ConfigError::Store(format!(
                "injected failure writing {collection}"
            ))),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn fetch(&self) -> Result<ConfigSnapshot, ConfigError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ConfigError::Store("injected fetch failure".to_string()));
        }
        let state = lock(&self.state);
        Ok(ConfigSnapshot {
            version: Some(state.version.to_string()),
            ..state.snapshot.clone()
        })
    }

    async fn replace(
        &self,
        collection: Collection,
        value: Value,
        expected_version: Option<&str>,
    ) -> Result<(), ConfigError> {
        let latency = *lock(&self.write_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_injected_failure(collection)?;

        let mut state = lock(&self.state);
        if let Some(expected) = expected_version {
            if expected != state.version.to_string() {
                return Err(ConfigError::VersionConflict { collection });
            }
        }
        if self.drop_writes.load(Ordering::SeqCst) {
            return Ok(());
        }

        let decoded = match collection {
            Collection::Agents => ConfigSnapshot::from_values(Some(value), None, None, None)
                .map(|s| state.snapshot.agents = s.agents),
            Collection::Bindings => ConfigSnapshot::from_values(None, Some(value), None, None)
                .map(|s| state.snapshot.bindings = s.bindings),
            Collection::RoomSettings => ConfigSnapshot::from_values(None, None, Some(value), None)
                .map(|s| state.snapshot.room_settings = s.room_settings),
        };
        decoded?;
        state.version += 1;
        drop(state);

        self.writes.fetch_add(1, Ordering::SeqCst);
        *lock(&self.writes_by_collection).entry(collection).or_insert(0) += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NoopGateway
// ---------------------------------------------------------------------------

/// Counts reloads instead of signalling anything.
#[derive(Debug, Default)]
pub struct NoopGateway {
    reloads: AtomicUsize,
    fail: AtomicBool,
}

impl NoopGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayControl for NoopGateway {
    async fn reload(&self) -> Result<(), GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Failed {
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = MemoryConfigStore::new();
        let snap = store.fetch().await.unwrap();
        store
            .replace(Collection::Agents, json!([{ "id": "a" }]), snap.version.as_deref())
            .await
            .unwrap();
        let err = store
            .replace(Collection::Agents, json!([]), snap.version.as_deref())
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::VersionConflict { .. }));
        assert_eq!(store.current().agents.len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_after_successes() {
        let store = MemoryConfigStore::new();
        store.fail_replace_after(Collection::Bindings, 1);
        store.replace(Collection::Bindings, json!([]), None).await.unwrap();
        assert!(store.replace(Collection::Bindings, json!([]), None).await.is_err());
        assert_eq!(store.writes_to(Collection::Bindings), 1);
    }

    #[tokio::test]
    async fn invitees_join_unless_auto_join_is_off() {
        let rooms = MemoryRoomService::new("@bot:x");
        let room = rooms.create_room("r", &["@a:x".to_string()]).await.unwrap();
        assert_eq!(rooms.joined_member_count(&room).await.unwrap(), 2);

        rooms.set_auto_join(false);
        rooms.invite(&room, "@b:x").await.unwrap();
        assert_eq!(rooms.joined_member_count(&room).await.unwrap(), 2);
    }
}
