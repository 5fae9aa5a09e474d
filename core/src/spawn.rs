use std::path::Path;
use std::process::Stdio;

use tokio::process::Child;
use tokio::process::Command;

use crate::config::CliConfig;
use crate::error::BridgeErr;
use crate::error::Result;
use crate::exec::ExecOptions;
use crate::session::SessionId;

const PREVIEW_MAX_CHARS: usize = 160;

/// How a turn is tied to the conversation history the CLI keeps on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Correlation {
    /// First turn of a session: have the CLI create its history under this
    /// token.
    Create(SessionId),
    /// Later turns: resume the history already recorded for this token.
    Resume(SessionId),
}

/// Argument vector for one invocation. The prompt is always a single argv
/// element; nothing here passes through a shell.
pub(crate) fn build_argv(
    prompt: &str,
    options: &ExecOptions,
    correlation: Option<Correlation>,
) -> Vec<String> {
    let mut argv = vec!["-p".to_string(), prompt.to_string()];
    if options.bypass_permissions {
        argv.push("--dangerously-skip-permissions".to_string());
    }
    if let Some(model) = &options.model {
        argv.push("--model".to_string());
        argv.push(model.clone());
    }
    match correlation {
        Some(Correlation::Create(id)) => {
            argv.push("--session-id".to_string());
            argv.push(id.to_string());
        }
        Some(Correlation::Resume(id)) => {
            argv.push("--resume".to_string());
            argv.push(id.to_string());
        }
        None => {}
    }
    argv
}

/// Launch the CLI: stdin closed, stdout and stderr piped, the configured
/// environment layered over the inherited one. The caller must hand the
/// child to the reaper before waiting on it.
pub(crate) fn spawn_claude(
    config: &CliConfig,
    argv: &[String],
    options: &ExecOptions,
) -> Result<Child> {
    let mut env = config.child_env();
    for (key, value) in &options.env {
        env.insert(key.clone(), value.clone());
    }

    let mut command = Command::new(&config.claude_path);
    command
        .args(argv)
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &options.cwd {
        command.current_dir(cwd);
    }

    tracing::debug!("spawning {}", preview(&config.claude_path, argv));
    command.spawn().map_err(BridgeErr::Spawn)
}

/// Shell-quoted rendition of the invocation for logs, truncated so a long
/// prompt cannot flood them.
pub(crate) fn preview(program: &Path, argv: &[String]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(argv.iter().cloned());
    let joined = shlex::try_join(parts.iter().map(String::as_str))
        .unwrap_or_else(|_| parts.join(" "));
    if joined.chars().count() <= PREVIEW_MAX_CHARS {
        return joined;
    }
    let truncated: String = joined.chars().take(PREVIEW_MAX_CHARS).collect();
    format!("{truncated}...")
}
