//! Registry error-message, atomic-write-safety, and lifecycle integration tests.

use std::fs;
use std::path::PathBuf;

use assert_fs::prelude::*;
use fraktal_core::{
    registry::{self, Registry},
    Fractal, FractalId, FractalStatus, RegistryError, RoomHandle,
};
use predicates::prelude::predicate;
use rstest::rstest;

fn id(raw: &str) -> FractalId {
    FractalId::parse(raw).expect("valid id")
}

fn record(raw: &str) -> Fractal {
    Fractal::pending(
        id(raw),
        format!("Fractal {raw}"),
        PathBuf::from("/srv/fractals").join(raw),
        "default".to_string(),
    )
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_corrupt_json_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = registry::registry_path_at(home.path());
    fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
    fs::write(&path, b"[{\"id\": \"scout\", broken").expect("write");

    let err = Registry::open_at(&path).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("registry.json"), "must contain file path, got: {err}");
}

#[test]
fn load_rejects_record_with_invalid_id() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut good = record("scout");
    good.status = FractalStatus::Active;
    let mut value = serde_json::to_value(vec![good]).expect("to_value");
    value[0]["id"] = serde_json::json!("Not Valid");
    let file = home.child("registry.json");
    file.write_str(&value.to_string()).expect("write");

    let err = Registry::open_at(file.path()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = registry::registry_path_at(home.path());
    let mut reg = Registry::open_at(&path).expect("open");
    reg.add(record("scout")).expect("add");
    let original = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = registry::tmp_path_for(&path);
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(fs::read(&path).expect("read after crash"), original);
    let reopened = Registry::open_at(&path).expect("reopen after crash");
    assert_eq!(reopened.len(), 1);
}

#[cfg(unix)]
#[test]
fn registry_file_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = registry::registry_path_at(home.path());
    let mut reg = Registry::open_at(&path).expect("open");
    reg.add(record("scout")).expect("add");
    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn file_is_a_json_array_of_records() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = registry::registry_path_at(home.path());
    let mut reg = Registry::open_at(&path).expect("open");
    reg.add(record("scout")).expect("add");
    reg.add(record("ranger")).expect("add");

    home.child(".fraktal/registry.json")
        .assert(predicate::str::contains("\"displayName\": \"Fractal scout\""));
    let parsed: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed.as_array().map(Vec::len), Some(2));
}

// ---------------------------------------------------------------------------
// 3. Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn lifecycle_pending_to_active_then_removed() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = registry::registry_path_at(home.path());
    let mut reg = Registry::open_at(&path).expect("open");

    reg.add(record("scout")).expect("add");
    reg.update(&id("scout"), |f| {
        f.status = FractalStatus::Provisioning;
        f.room = Some(RoomHandle::from("!abc:example.org"));
    })
    .expect("provisioning");
    reg.update_status(&id("scout"), FractalStatus::Active).expect("active");

    let reopened = Registry::open_at(&path).expect("reopen");
    let scout = reopened.get(&id("scout")).expect("record");
    assert_eq!(scout.status, FractalStatus::Active);
    assert_eq!(scout.room.as_ref().map(RoomHandle::as_str), Some("!abc:example.org"));
    assert_eq!(reopened.count_with_status(FractalStatus::Active), 1);

    let mut reg = reopened;
    assert!(reg.remove(&id("scout")).expect("remove").is_some());
    assert!(reg.remove(&id("scout")).expect("second remove").is_none());
    assert!(Registry::open_at(&path).expect("reopen").is_empty());
}

#[rstest]
#[case::update_status(true)]
#[case::update(false)]
fn updating_unknown_id_is_not_found(#[case] status_only: bool) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut reg = Registry::open_at(registry::registry_path_at(home.path())).expect("open");
    let err = if status_only {
        reg.update_status(&id("ghost"), FractalStatus::Active).unwrap_err()
    } else {
        reg.update(&id("ghost"), |f| f.auto_reply = true).unwrap_err()
    };
    assert!(matches!(err, RegistryError::NotFound { .. }));
    assert!(err.to_string().contains("ghost"));
}
