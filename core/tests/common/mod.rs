#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use claude_bridge_core::ClaudeBridge;
use claude_bridge_core::CliConfig;
use claude_bridge_core::ExecOptions;
use tempfile::TempDir;

/// Writes an executable script standing in for the real CLI. The body runs
/// under `/bin/sh` with the invocation's argv in `"$@"`.
pub fn stub_tool(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("claude");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub tool");
    let mut perms = std::fs::metadata(&path).expect("stat stub tool").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod stub tool");
    path
}

pub fn config_for(tool: impl Into<PathBuf>) -> CliConfig {
    CliConfig::default()
        .with_claude_path(tool)
        .with_api_key("sk-test")
        .with_grace_period(Duration::from_millis(200))
}

pub fn bridge_for(tool: impl Into<PathBuf>) -> ClaudeBridge {
    ClaudeBridge::new(config_for(tool))
}

/// Options with a deadline short enough that a wedged stub cannot stall
/// the whole test run.
pub fn options() -> ExecOptions {
    ExecOptions::default().with_timeout(Duration::from_secs(10))
}

/// True while `pid` names a live process.
pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Polls until `pid` is gone, failing the test if it survives `within`.
pub async fn wait_until_dead(pid: u32, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    while process_alive(pid) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "process {pid} still alive after {within:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
