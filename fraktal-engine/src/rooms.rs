//! Chat-room provisioning: the room service seam plus quorum enforcement.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fraktal_core::RoomHandle;

use crate::error::{FractalError, RoomError};

/// Rooms with fewer joined members are treated as direct messages by the room
/// service, which channel bindings cannot select.
pub const MIN_ROOM_MEMBERS: usize = 3;

/// One external call per method, no retries.
#[async_trait]
pub trait RoomService: Send + Sync {
    async fn create_room(&self, name: &str, invitees: &[String]) -> Result<RoomHandle, RoomError>;
    async fn invite(&self, room: &RoomHandle, user_id: &str) -> Result<(), RoomError>;
    async fn joined_member_count(&self, room: &RoomHandle) -> Result<usize, RoomError>;
    /// Set the bot's own display name inside `room`.
    async fn set_display_name(&self, room: &RoomHandle, name: &str) -> Result<(), RoomError>;
}

/// Timeout-bounded wrapper over a [`RoomService`].
#[derive(Clone)]
pub struct RoomProvisioner {
    service: Arc<dyn RoomService>,
    timeout: Duration,
    filler: Option<String>,
    settle: Duration,
}

impl RoomProvisioner {
    /// `filler` is invited when a room is short of [`MIN_ROOM_MEMBERS`];
    /// `settle` is how long to wait before re-reading the member count.
    pub fn new(
        service: Arc<dyn RoomService>,
        timeout: Duration,
        filler: Option<String>,
        settle: Duration,
    ) -> Self {
        RoomProvisioner {
            service,
            timeout,
            filler,
            settle,
        }
    }

    pub async fn create_room(
        &self,
        name: &str,
        invitees: &[String],
    ) -> Result<RoomHandle, RoomError> {
        self.bounded("create_room", self.service.create_room(name, invitees))
            .await
    }

    pub async fn invite_participant(
        &self,
        room: &RoomHandle,
        user_id: &str,
    ) -> Result<(), RoomError> {
        self.bounded("invite", self.service.invite(room, user_id)).await
    }

    pub async fn member_count(&self, room: &RoomHandle) -> Result<usize, RoomError> {
        self.bounded("joined_members", self.service.joined_member_count(room))
            .await
    }

    pub async fn set_display_name(&self, room: &RoomHandle, name: &str) -> Result<(), RoomError> {
        self.bounded("set_display_name", self.service.set_display_name(room, name))
            .await
    }

    /// Pad `room` with the filler participant if it is short of quorum.
    ///
    /// Returns the final joined-member count.
    pub async fn ensure_quorum(&self, room: &RoomHandle) -> Result<usize, FractalError> {
        let members = self.member_count(room).await?;
        if members >= MIN_ROOM_MEMBERS {
            return Ok(members);
        }
        let Some(filler) = self.filler.as_deref() else {
            return Err(FractalError::QuorumFailure {
                room: room.to_string(),
                members,
                required: MIN_ROOM_MEMBERS,
            });
        };

        tracing::info!(room = %room, members, filler, "padding room to quorum");
        self.invite_participant(room, filler).await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        let members = self.member_count(room).await?;
        if members < MIN_ROOM_MEMBERS {
            return Err(FractalError::QuorumFailure {
                room: room.to_string(),
                members,
                required: MIN_ROOM_MEMBERS,
            });
        }
        Ok(members)
    }

    async fn bounded<T>(
        &self,
        call: &'static str,
        fut: impl Future<Output = Result<T, RoomError>>,
    ) -> Result<T, RoomError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RoomError::Timeout {
                call,
                after: self.timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryRoomService;

    fn provisioner(service: Arc<MemoryRoomService>, filler: Option<&str>) -> RoomProvisioner {
        RoomProvisioner::new(
            service,
            Duration::from_secs(1),
            filler.map(str::to_owned),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn two_member_room_is_padded_to_three() {
        let service = Arc::new(MemoryRoomService::new("@bot:x"));
        let rooms = provisioner(service.clone(), Some("@filler:x"));
        let room = rooms
            .create_room("Scout", &["@alice:x".to_string()])
            .await
            .unwrap();
        assert_eq!(rooms.member_count(&room).await.unwrap(), 2);

        assert_eq!(rooms.ensure_quorum(&room).await.unwrap(), 3);
        assert!(service.members(&room).contains(&"@filler:x".to_string()));
    }

    #[tokio::test]
    async fn full_room_is_left_alone() {
        let service = Arc::new(MemoryRoomService::new("@bot:x"));
        let rooms = provisioner(service.clone(), Some("@filler:x"));
        let room = rooms
            .create_room("Scout", &["@a:x".to_string(), "@b:x".to_string()])
            .await
            .unwrap();
        assert_eq!(rooms.ensure_quorum(&room).await.unwrap(), 3);
        assert!(!service.members(&room).contains(&"@filler:x".to_string()));
    }

    #[tokio::test]
    async fn no_filler_means_quorum_failure() {
        let service = Arc::new(MemoryRoomService::new("@bot:x"));
        let rooms = provisioner(service, None);
        let room = rooms.create_room("Scout", &[]).await.unwrap();
        let err = rooms.ensure_quorum(&room).await.unwrap_err();
        assert!(matches!(err, FractalError::QuorumFailure { members: 1, .. }));
    }

    #[tokio::test]
    async fn filler_that_never_joins_fails_quorum() {
        let service = Arc::new(MemoryRoomService::new("@bot:x"));
        service.set_auto_join(false);
        let rooms = provisioner(service, Some("@filler:x"));
        let room = rooms.create_room("Scout", &[]).await.unwrap();
        let err = rooms.ensure_quorum(&room).await.unwrap_err();
        assert!(matches!(err, FractalError::QuorumFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_service_times_out() {
        let service = Arc::new(MemoryRoomService::new("@bot:x"));
        service.set_latency(Duration::from_secs(30));
        let rooms = provisioner(service, None);
        let err = rooms.create_room("Scout", &[]).await.unwrap_err();
        assert!(matches!(err, RoomError::Timeout { call: "create_room", .. }));
    }
}
