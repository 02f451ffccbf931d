//! Binary-level tests driving `pstart` against a scripted `lxc`.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Answers `config show` with `pstart0` attached and accepts `profile remove`.
const FAKE_LXC: &str = r#"#!/bin/sh
echo "$*" >> "$PSTART_TEST_LOG"
case "$1 $2" in
    "config show")
        printf 'architecture: x86_64\nconfig: {}\nprofiles:\n- default\n- pstart0\n'
        ;;
    "profile remove")
        ;;
    *)
        echo "Error: Instance not found" >&2
        exit 1
        ;;
esac
"#;

/// Keeps instance state in marker files; the readiness wait takes two seconds.
const SLOW_LXC: &str = r#"#!/bin/sh
echo "$*" >> "$PSTART_TEST_LOG"
state=$(dirname "$PSTART_TEST_LOG")
case "$1" in
    info)
        if [ -e "$state/running" ]; then echo "Status: RUNNING"; else echo "Status: STOPPED"; fi
        ;;
    config)
        printf 'config: {}\nprofiles:\n- default\n'
        if [ -e "$state/attached" ]; then echo "- pstart0"; fi
        ;;
    network)
        printf 'config:\n  ipv4.address: 10.3.23.1/24\n  ipv4.nat: "true"\n'
        ;;
    profile)
        case "$2" in
            show)
                printf 'config:\n  raw.lxc: lxc.init.cmd = /sbin/pstart-init --network=10.3.23.1/24\n'
                printf 'devices:\n  eth0:\n    name: eth0\n    nictype: bridged\n    parent: pstart0\n    type: nic\n'
                ;;
            add) touch "$state/attached" ;;
            remove) rm -f "$state/attached" ;;
        esac
        ;;
    file) cat > /dev/null ;;
    start) touch "$state/running" ;;
    stop) rm -f "$state/running" ;;
    exec) sleep 2 ;;
esac
"#;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("lxc");
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fake_lxc(dir: &Path) -> PathBuf {
    write_script(dir, FAKE_LXC)
}

fn pstart(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pstart").unwrap();
    cmd.env_remove("PSTART_BASE_NAME")
        .env_remove("PSTART_AGENT")
        .env_remove("PSTART_LXC")
        .env_remove("RUST_LOG")
        .env("PSTART_TEST_LOG", dir.path().join("calls.log"));
    cmd
}

fn calls(dir: &TempDir) -> String {
    fs::read_to_string(dir.path().join("calls.log")).unwrap_or_default()
}

#[test]
fn help_exits_zero() {
    let dir = TempDir::new().unwrap();
    pstart(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--base-name"))
        .stdout(predicate::str::contains("--dump"));
}

#[test]
fn clean_with_command_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    pstart(&dir)
        .args(["--clean", "box1", "echo", "hi"])
        .assert()
        .code(1);
    assert!(calls(&dir).is_empty());
}

#[test]
fn conflicting_modes_exit_one() {
    let dir = TempDir::new().unwrap();
    pstart(&dir).args(["--stop", "--clean", "box1"]).assert().code(1);
}

#[test]
fn clean_detaches_profile() {
    let dir = TempDir::new().unwrap();
    let lxc = fake_lxc(dir.path());
    pstart(&dir)
        .arg("--lxc")
        .arg(&lxc)
        .args(["--clean", "myhost:box1"])
        .assert()
        .success();
    assert_eq!(
        calls(&dir),
        "config show myhost:box1\nprofile remove myhost:box1 pstart0\n"
    );
}

#[test]
fn base_name_from_environment() {
    let dir = TempDir::new().unwrap();
    let lxc = fake_lxc(dir.path());
    pstart(&dir)
        .env("PSTART_LXC", &lxc)
        .env("PSTART_BASE_NAME", "other")
        .args(["--clean", "box1"])
        .assert()
        .success();
    // `other` is not attached, so nothing is removed.
    assert_eq!(calls(&dir), "config show box1\n");
}

#[test]
fn missing_container_is_fatal() {
    let dir = TempDir::new().unwrap();
    let lxc = fake_lxc(dir.path());
    pstart(&dir)
        .arg("--lxc")
        .arg(&lxc)
        .arg("box1")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Container not found: box1"));
}

#[test]
fn fatal_error_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let lxc = fake_lxc(dir.path());
    let output = pstart(&dir).arg("--lxc").arg(&lxc).arg("box1").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("Container not found: box1").count(), 1, "{stderr}");
}

#[test]
fn missing_lxc_binary_is_fatal() {
    let dir = TempDir::new().unwrap();
    pstart(&dir)
        .arg("--lxc")
        .arg(dir.path().join("no-such-lxc"))
        .args(["--stop", "box1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to execute"));
}

#[test]
fn sigint_during_readiness_wait_rolls_back() {
    let dir = TempDir::new().unwrap();
    let lxc = write_script(dir.path(), SLOW_LXC);
    let agent = dir.path().join("pstart-init");
    fs::write(&agent, b"agent").unwrap();

    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("pstart"))
        .env_remove("PSTART_BASE_NAME")
        .env("PSTART_TEST_LOG", dir.path().join("calls.log"))
        .arg("--lxc")
        .arg(&lxc)
        .arg("--agent")
        .arg(&agent)
        .arg("box1")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !calls(&dir).contains("exec box1 -- /sbin/pstart-init wait") {
        assert!(Instant::now() < deadline, "never reached the readiness wait");
        thread::sleep(Duration::from_millis(20));
    }
    let status = std::process::Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(130));

    let log = calls(&dir);
    assert!(log.contains("stop box1\n"), "{log}");
    assert!(log.contains("profile remove box1 pstart0\n"), "{log}");
    assert!(!dir.path().join("attached").exists());
    assert!(!dir.path().join("running").exists());
}
