use std::fs;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const TOKEN: &str = "round-trip-token";

fn fraktal_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fraktal"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("FRAKTAL_API_TOKEN");
    cmd
}

struct Server(Child);

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind probe")
        .local_addr()
        .expect("probe addr")
        .port()
}

fn write_settings(home: &TempDir, port: u16) {
    let dir = home.path().join(".fraktal");
    fs::create_dir_all(&dir).expect("settings dir");
    let yaml = format!(
        r#"bind: "127.0.0.1:{port}"
api_token: "{TOKEN}"
max_fractals: 4
min_agent_floor: 0
filler_participant: "@filler:memory"
quorum_settle_ms: 0
workspace:
  root: "{root}"
rooms:
  backend: memory
config_store:
  backend: memory
gateway:
  backend: noop
"#,
        root = home.path().join("workspaces").display()
    );
    fs::write(dir.join("config.yaml"), yaml).expect("write settings");
}

fn wait_for_health(home: &Path) {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let ok = fraktal_cmd(home)
            .arg("health")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false);
        if ok {
            return;
        }
        assert!(Instant::now() < deadline, "service did not come up");
        sleep(Duration::from_millis(100));
    }
}

#[test]
fn create_list_get_delete_through_a_running_service() {
    let home = TempDir::new().expect("home");
    let port = free_port();
    write_settings(&home, port);

    let child = fraktal_cmd(home.path())
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn serve");
    let _server = Server(child);
    wait_for_health(home.path());

    fraktal_cmd(home.path())
        .args(["create", "scout", "--name", "Scout", "--invite", "@alice:memory"])
        .assert()
        .success()
        .stdout(contains("Created 'scout'"));
    assert!(home.path().join("workspaces/scout").is_dir());

    fraktal_cmd(home.path())
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(contains("\"id\": \"scout\""));

    fraktal_cmd(home.path())
        .args(["get", "scout"])
        .assert()
        .success()
        .stdout(contains("active"));

    fraktal_cmd(home.path())
        .args(["create", "scout", "--name", "Scout again"])
        .assert()
        .failure()
        .stderr(contains("409"));

    fraktal_cmd(home.path())
        .args(["delete", "scout", "--delete-workspace"])
        .assert()
        .success()
        .stdout(contains("Deleted 'scout'"));
    assert!(!home.path().join("workspaces/scout").exists());

    fraktal_cmd(home.path())
        .args(["get", "scout"])
        .assert()
        .failure()
        .stderr(contains("not_found"));

    fraktal_cmd(home.path())
        .args(["audit"])
        .assert()
        .success()
        .stdout(contains("clean"));
}
