//! Scaffold create/remove integration tests against a temp workspace root.

use std::fs;
use std::path::PathBuf;

use fraktal_core::{Fractal, FractalId};
use fraktal_workspace::{WorkspaceError, WorkspaceManager, WorkspaceOptions};
use tempfile::TempDir;

fn options(root: &TempDir) -> WorkspaceOptions {
    WorkspaceOptions {
        root: root.path().to_path_buf(),
        owner: None,
        template_dir: None,
        dir_mode: 0o750,
        file_mode: 0o640,
    }
}

fn fractal(manager: &WorkspaceManager, raw: &str) -> Fractal {
    let id = FractalId::parse(raw).expect("id");
    let path = manager.path_for(&id);
    let mut f = Fractal::pending(id, "Scout".to_string(), path, "default".to_string());
    f.purpose = Some("Triage alerts.".to_string());
    f
}

#[test]
fn create_writes_all_documents_and_memory_dir() {
    let root = TempDir::new().unwrap();
    let manager = WorkspaceManager::new(options(&root)).unwrap();
    let f = fractal(&manager, "scout");

    let report = manager.create(&f, Some("Calm under pressure.")).unwrap();
    assert_eq!(report.path, root.path().join("scout"));
    assert_eq!(report.written(), 3);
    for name in ["IDENTITY.md", "SOUL.md", "AGENTS.md"] {
        assert!(report.path.join(name).is_file(), "{name} missing");
    }
    assert!(report.path.join("memory").is_dir());
    let soul = fs::read_to_string(report.path.join("SOUL.md")).unwrap();
    assert!(soul.contains("Calm under pressure."));
}

#[test]
fn second_create_is_hash_gated() {
    let root = TempDir::new().unwrap();
    let manager = WorkspaceManager::new(options(&root)).unwrap();
    let f = fractal(&manager, "scout");
    manager.create(&f, None).unwrap();
    let again = manager.create(&f, None).unwrap();
    assert_eq!(again.written(), 0);
}

#[test]
fn remove_is_idempotent() {
    let root = TempDir::new().unwrap();
    let manager = WorkspaceManager::new(options(&root)).unwrap();
    let f = fractal(&manager, "scout");
    let report = manager.create(&f, None).unwrap();

    assert!(manager.remove(&report.path).unwrap());
    assert!(!report.path.exists());
    assert!(!manager.remove(&report.path).unwrap());
}

#[test]
fn remove_refuses_root_itself() {
    let root = TempDir::new().unwrap();
    let manager = WorkspaceManager::new(options(&root)).unwrap();
    let err = manager.remove(root.path()).unwrap_err();
    assert!(matches!(err, WorkspaceError::OutsideRoot { .. }));
    assert!(root.path().exists());
}

#[test]
fn template_dir_overrides_documents() {
    let root = TempDir::new().unwrap();
    let templates = TempDir::new().unwrap();
    fs::write(templates.path().join("agents.md.tera"), "agents for {{ identity.id }}\n").unwrap();
    let mut opts = options(&root);
    opts.template_dir = Some(PathBuf::from(templates.path()));
    let manager = WorkspaceManager::new(opts).unwrap();

    let report = manager.create(&fractal(&manager, "scout"), None).unwrap();
    let agents = fs::read_to_string(report.path.join("AGENTS.md")).unwrap();
    assert_eq!(agents, "agents for scout\n");
}

#[cfg(unix)]
#[test]
fn modes_are_applied() {
    use std::os::unix::fs::PermissionsExt;

    let root = TempDir::new().unwrap();
    let manager = WorkspaceManager::new(options(&root)).unwrap();
    let report = manager.create(&fractal(&manager, "scout"), None).unwrap();
    let dir_mode = fs::metadata(&report.path).unwrap().permissions().mode() & 0o777;
    let file_mode = fs::metadata(report.path.join("IDENTITY.md")).unwrap().permissions().mode() & 0o777;
    assert_eq!(dir_mode, 0o750);
    assert_eq!(file_mode, 0o640);
}
