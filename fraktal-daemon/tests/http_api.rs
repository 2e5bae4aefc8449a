use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use warp::http::StatusCode;

use fraktal_core::settings::{ConfigStoreBackend, GatewayBackend, RoomBackend};
use fraktal_core::Settings;
use fraktal_daemon::{api, build_service};

const TOKEN: &str = "s3cret";

fn settings(home: &TempDir, max_fractals: usize) -> Settings {
    let mut s = Settings::default();
    s.api_token = TOKEN.to_string();
    s.max_fractals = max_fractals;
    s.min_agent_floor = 0;
    s.filler_participant = Some("@filler:memory".to_string());
    s.quorum_settle_ms = 0;
    s.rooms.backend = RoomBackend::Memory;
    s.config_store.backend = ConfigStoreBackend::Memory;
    s.gateway.backend = GatewayBackend::Noop;
    s.workspace.root = home.path().join("workspaces");
    s.registry_path = Some(home.path().join("registry.json"));
    s
}

fn body(id: &str) -> Value {
    json!({
        "name": format!("Fractal {id}"),
        "id": id,
        "inviteParticipants": ["@alice:memory"],
        "autoReply": true
    })
}

fn decode(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

macro_rules! routes {
    ($home:expr, $max:expr) => {{
        let service = build_service(&settings($home, $max), $home.path()).unwrap();
        api(service.orchestrator, Arc::from(TOKEN))
    }};
}

fn bearer() -> String {
    format!("Bearer {TOKEN}")
}

#[tokio::test]
async fn health_needs_no_credentials() {
    let home = TempDir::new().unwrap();
    let routes = routes!(&home, 4);

    let res = warp::test::request().path("/health").reply(&routes).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        decode(res.body()),
        json!({ "status": "ok", "active": 0, "total": 0, "max": 4 })
    );
}

#[tokio::test]
async fn missing_token_is_401_and_wrong_token_is_403() {
    let home = TempDir::new().unwrap();
    let routes = routes!(&home, 4);

    let res = warp::test::request().path("/fractal").reply(&routes).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(decode(res.body())["error"], "unauthorized");

    let res = warp::test::request()
        .path("/fractal")
        .header("authorization", "Bearer nope")
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_get_list_delete_round_trip() {
    let home = TempDir::new().unwrap();
    let routes = routes!(&home, 4);

    let res = warp::test::request()
        .method("POST")
        .path("/fractal")
        .header("authorization", bearer())
        .json(&body("scout"))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created = decode(res.body());
    assert_eq!(created["id"], "scout");
    assert_eq!(created["status"], "active");
    assert_eq!(created["autoReply"], true);

    let res = warp::test::request()
        .path("/fractal/scout")
        .header("authorization", bearer())
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = warp::test::request()
        .path("/fractal")
        .header("authorization", bearer())
        .reply(&routes)
        .await;
    assert_eq!(decode(res.body()).as_array().unwrap().len(), 1);

    let res = warp::test::request()
        .method("DELETE")
        .path("/fractal/scout?deleteWorkspace=true")
        .header("authorization", bearer())
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(!home.path().join("workspaces/scout").exists());

    let res = warp::test::request()
        .method("DELETE")
        .path("/fractal/scout")
        .header("authorization", bearer())
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(decode(res.body())["error"], "not_found");
}

#[tokio::test]
async fn invalid_body_is_400() {
    let home = TempDir::new().unwrap();
    let routes = routes!(&home, 4);

    let res = warp::test::request()
        .method("POST")
        .path("/fractal")
        .header("authorization", bearer())
        .json(&json!({ "name": "Scout", "id": "Bad Id" }))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(decode(res.body())["error"], "validation");

    let res = warp::test::request()
        .method("POST")
        .path("/fractal")
        .header("authorization", bearer())
        .header("content-type", "application/json")
        .body("{not json")
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_is_409_and_limit_is_429() {
    let home = TempDir::new().unwrap();
    let routes = routes!(&home, 1);

    let create = |id: &'static str| {
        warp::test::request()
            .method("POST")
            .path("/fractal")
            .header("authorization", bearer())
            .json(&body(id))
    };

    assert_eq!(create("scout").reply(&routes).await.status(), StatusCode::CREATED);
    assert_eq!(create("scout").reply(&routes).await.status(), StatusCode::CONFLICT);

    let res = create("ranger").reply(&routes).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(decode(res.body())["error"], "limit_exceeded");
}

#[tokio::test]
async fn rollback_detail_is_returned_with_500() {
    let home = TempDir::new().unwrap();
    // Nobody to pad with: the room never reaches quorum.
    let mut s = settings(&home, 4);
    s.filler_participant = None;
    let service = build_service(&s, home.path()).unwrap();
    let routes = api(service.orchestrator, Arc::from(TOKEN));

    let res = warp::test::request()
        .method("POST")
        .path("/fractal")
        .header("authorization", bearer())
        .json(&body("scout"))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = decode(res.body());
    assert_eq!(detail["error"], "aggregate_rollback");
    assert_eq!(detail["rollback"]["failedStep"], "ensure quorum");
    assert!(detail["rollback"]["leakedRoom"].is_string());
    assert_eq!(detail["rollback"]["requiresManualIntervention"], false);
}

#[tokio::test]
async fn audit_requires_auth_and_reports() {
    let home = TempDir::new().unwrap();
    let routes = routes!(&home, 4);

    let res = warp::test::request().path("/audit").reply(&routes).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = warp::test::request()
        .path("/audit")
        .header("authorization", bearer())
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(decode(res.body())["checked"], 0);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let home = TempDir::new().unwrap();
    let routes = routes!(&home, 4);
    let res = warp::test::request().path("/nowhere").reply(&routes).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
