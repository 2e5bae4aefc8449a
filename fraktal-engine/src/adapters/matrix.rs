//! Matrix client-server API (v3) room service.
//!
//! `ureq` is blocking, so every request runs on the blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use fraktal_core::RoomHandle;

use crate::error::RoomError;
use crate::rooms::RoomService;

const API_PREFIX: &str = "/_matrix/client/v3";

pub struct MatrixRoomService {
    agent: ureq::Agent,
    homeserver: String,
    access_token: String,
    bot_user_id: String,
}

impl MatrixRoomService {
    pub fn new(homeserver: &str, access_token: &str, bot_user_id: &str, timeout: Duration) -> Self {
        MatrixRoomService {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            homeserver: homeserver.trim_end_matches('/').to_owned(),
            access_token: access_token.to_owned(),
            bot_user_id: bot_user_id.to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.homeserver)
    }

    async fn call(
        &self,
        method: &'static str,
        path: String,
        body: Option<Value>,
    ) -> Result<Value, RoomError> {
        let agent = self.agent.clone();
        let url = self.url(&path);
        let auth = format!("Bearer {}", self.access_token);
        tokio::task::spawn_blocking(move || {
            let request = agent.request(method, &url).set("Authorization", &auth);
            let response = match body {
                Some(body) => request.send_json(body),
                None => request.call(),
            };
            match response {
                Ok(resp) => resp
                    .into_json::<Value>()
                    .map_err(|e| RoomError::Decode(e.to_string())),
                Err(ureq::Error::Status(status, resp)) => Err(RoomError::Http {
                    status,
                    body: resp.into_string().unwrap_or_default(),
                }),
                Err(ureq::Error::Transport(t)) => Err(RoomError::Transport(t.to_string())),
            }
        })
        .await
        .map_err(|e| RoomError::Join(e.to_string()))?
    }
}

#[async_trait]
impl RoomService for MatrixRoomService {
    async fn create_room(&self, name: &str, invitees: &[String]) -> Result<RoomHandle, RoomError> {
        let body = json!({
            "name": name,
            "preset": "private_chat",
            "is_direct": false,
            "invite": invitees,
        });
        let resp = self
            .call("POST", "/createRoom".to_string(), Some(body))
            .await?;
        resp.get("room_id")
            .and_then(Value::as_str)
            .map(RoomHandle::from)
            .ok_or_else(|| RoomError::Decode("createRoom response has no room_id".to_string()))
    }

    async fn invite(&self, room: &RoomHandle, user_id: &str) -> Result<(), RoomError> {
        let path = format!("/rooms/{}/invite", encode_segment(room.as_str()));
        self.call("POST", path, Some(json!({ "user_id": user_id })))
            .await
            .map(|_| ())
    }

    async fn joined_member_count(&self, room: &RoomHandle) -> Result<usize, RoomError> {
        let path = format!("/rooms/{}/joined_members", encode_segment(room.as_str()));
        let resp = self.call("GET", path, None).await?;
        resp.get("joined")
            .and_then(Value::as_object)
            .map(|joined| joined.len())
            .ok_or_else(|| RoomError::Decode("joined_members response has no joined map".to_string()))
    }

    async fn set_display_name(&self, room: &RoomHandle, name: &str) -> Result<(), RoomError> {
        let path = format!(
            "/rooms/{}/state/m.room.member/{}",
            encode_segment(room.as_str()),
            encode_segment(&self.bot_user_id)
        );
        let body = json!({ "membership": "join", "displayname": name });
        self.call("PUT", path, Some(body)).await.map(|_| ())
    }
}

/// Percent-encode one URL path segment (RFC 3986 unreserved set kept).
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_ids_are_escaped() {
        assert_eq!(encode_segment("!abc:example.org"), "%21abc%3Aexample.org");
        assert_eq!(encode_segment("@bot:x"), "%40bot%3Ax");
    }

    #[test]
    fn urls_join_cleanly() {
        let svc = MatrixRoomService::new("https://hs.example/", "t", "@bot:x", Duration::from_secs(1));
        assert_eq!(
            svc.url("/createRoom"),
            "https://hs.example/_matrix/client/v3/createRoom"
        );
    }
}
