use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::CliConfig;
use crate::error::BridgeErr;
use crate::error::Result;
use crate::reaper::ExitOutcome;
use crate::reaper::ProcessReaper;
use crate::spawn;
use crate::spawn::Correlation;
use crate::stream::OutputLines;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

// I/O buffer sizing
const READ_CHUNK_SIZE: usize = 8192;
const AGGREGATE_INITIAL_CAPACITY: usize = 8 * 1024;

/// Per-invocation knobs. The defaults run headless: permission prompts are
/// bypassed, since there is no terminal to answer them on.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Hard deadline for the whole invocation.
    pub timeout: Duration,
    /// Model override; the CLI's own default applies when unset.
    pub model: Option<String>,
    pub bypass_permissions: bool,
    /// Extra environment entries layered over the configured base.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            model: None,
            bypass_permissions: true,
            env: HashMap::new(),
            cwd: None,
        }
    }
}

impl ExecOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Let the CLI ask for tool permissions instead of skipping the
    /// prompts. Only useful when a human is watching the transcript.
    pub fn keep_permission_prompts(mut self) -> Self {
        self.bypass_permissions = false;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(BridgeErr::validation("timeout must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct ExecOutput {
    pub text: String,
    pub duration: Duration,
}

/// Run one invocation to completion: spawn, drain both pipes, wait under
/// the deadline, and map the outcome onto the error taxonomy.
pub(crate) async fn run_to_completion(
    config: &CliConfig,
    reaper: &ProcessReaper,
    prompt: &str,
    options: &ExecOptions,
    correlation: Option<Correlation>,
) -> Result<ExecOutput> {
    validate_prompt(prompt)?;
    options.validate()?;

    let start = Instant::now();
    let argv = spawn::build_argv(prompt, options, correlation);
    let mut child = spawn::spawn_claude(config, &argv, options)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BridgeErr::Io(io::Error::other("stdout pipe was unexpectedly not available")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BridgeErr::Io(io::Error::other("stderr pipe was unexpectedly not available")))?;

    // Both pipes are drained while the process runs; an unread stderr
    // buffer would otherwise block the child once it fills.
    let (agg_tx, agg_rx) = async_channel::unbounded::<Vec<u8>>();
    let stdout_task = tokio::spawn(read_to_channel(stdout, agg_tx.clone()));
    let stderr_task = tokio::spawn(read_to_channel(stderr, agg_tx.clone()));
    drop(agg_tx);

    let handle = reaper.register(child, options.timeout);
    let outcome = handle.wait().await;

    stdout_task.await??;
    stderr_task.await??;

    let mut merged = Vec::with_capacity(AGGREGATE_INITIAL_CAPACITY);
    while let Ok(chunk) = agg_rx.recv().await {
        merged.extend_from_slice(&chunk);
    }
    let text = String::from_utf8_lossy(&merged).to_string();
    let duration = start.elapsed();

    match outcome {
        ExitOutcome::Exited { code: 0 } => {
            tracing::debug!(duration_ms = duration.as_millis() as u64, "claude finished");
            Ok(ExecOutput { text, duration })
        }
        ExitOutcome::Exited { code } => Err(BridgeErr::Exec {
            exit_code: code,
            output: text,
        }),
        ExitOutcome::TimedOut => Err(BridgeErr::Timeout {
            timeout: options.timeout,
        }),
        // Only a close path produces this; report it like a signal death.
        ExitOutcome::Terminated => Err(BridgeErr::Exec {
            exit_code: -1,
            output: text,
        }),
        ExitOutcome::WaitFailed(message) => Err(BridgeErr::Io(io::Error::other(message))),
    }
}

/// Spawn one invocation and hand its output back as a live line sequence
/// instead of waiting for the aggregate.
pub(crate) fn run_streaming(
    config: &CliConfig,
    reaper: &ProcessReaper,
    prompt: &str,
    options: &ExecOptions,
) -> Result<OutputLines> {
    validate_prompt(prompt)?;
    options.validate()?;

    let argv = spawn::build_argv(prompt, options, None);
    let mut child = spawn::spawn_claude(config, &argv, options)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BridgeErr::Io(io::Error::other("stdout pipe was unexpectedly not available")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BridgeErr::Io(io::Error::other("stderr pipe was unexpectedly not available")))?;

    let handle = reaper.register(child, options.timeout);
    Ok(OutputLines::new(stdout, stderr, handle, options.timeout))
}

/// Whether the CLI could run at all: the binary is reachable and at least
/// one credential is configured. Never spawns anything.
pub(crate) fn is_available(config: &CliConfig) -> bool {
    config.resolved_cli_path().is_some() && config.has_credentials()
}

/// Best-effort `claude --version` under a short fixed deadline. Any
/// failure, including the deadline, reports as `None`.
pub(crate) async fn version(config: &CliConfig) -> Option<String> {
    let mut command = Command::new(&config.claude_path);
    command
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(VERSION_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            tracing::debug!("version probe failed to run: {err}");
            return None;
        }
        Err(_) => {
            tracing::debug!("version probe timed out");
            return None;
        }
    };
    if !output.status.success() {
        tracing::debug!(code = output.status.code(), "version probe exited non-zero");
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(BridgeErr::validation("prompt must not be blank"));
    }
    Ok(())
}

async fn read_to_channel<R>(mut reader: R, tx: async_channel::Sender<Vec<u8>>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        // A send failure means the aggregate side is gone; keep reading to
        // EOF regardless so the pipe cannot fill and stall the child.
        let _ = tx.send(buf[..n].to_vec()).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_prompts_are_rejected() {
        assert!(matches!(validate_prompt(""), Err(BridgeErr::Validation(_))));
        assert!(matches!(
            validate_prompt("   \n\t"),
            Err(BridgeErr::Validation(_))
        ));
        assert!(validate_prompt("hello").is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let options = ExecOptions::default().with_timeout(Duration::ZERO);
        assert!(matches!(options.validate(), Err(BridgeErr::Validation(_))));
    }

    #[test]
    fn defaults_run_headless() {
        let options = ExecOptions::default();
        assert!(options.bypass_permissions);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert!(options.model.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn availability_needs_both_binary_and_credentials() {
        let missing = CliConfig::default()
            .with_claude_path("/nonexistent/claude")
            .with_api_key("sk-test");
        assert!(!is_available(&missing));

        let no_creds = CliConfig {
            api_key: None,
            oauth_token: None,
            ..CliConfig::default().with_claude_path("/bin/sh")
        };
        assert!(!is_available(&no_creds));
        assert!(is_available(&no_creds.with_oauth_token("oauth-test")));
    }
}
