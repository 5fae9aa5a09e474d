use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::CliConfig;
use crate::error::Result;
use crate::exec;
use crate::exec::ExecOptions;
use crate::reaper::ProcessReaper;
use crate::session::SessionDescriptor;
use crate::session::SessionId;
use crate::session::SessionManager;
use crate::stream::OutputLines;

/// Single entry point for running claude: one-shot, detached, streaming,
/// and session-oriented execution behind one surface.
///
/// Construct it inside a Tokio runtime; the registry sweep and every
/// process supervisor run as background tasks on it. The bridge is cheap
/// to share behind an `Arc`.
pub struct ClaudeBridge {
    config: Arc<CliConfig>,
    reaper: ProcessReaper,
    sessions: SessionManager,
}

impl ClaudeBridge {
    pub fn new(config: CliConfig) -> Self {
        let config = Arc::new(config);
        let reaper = ProcessReaper::new(config.grace_period);
        let sessions = SessionManager::new(Arc::clone(&config), reaper.clone());
        Self {
            config,
            reaper,
            sessions,
        }
    }

    /// Run one prompt to completion and return the merged output.
    pub async fn execute(&self, prompt: &str, options: ExecOptions) -> Result<String> {
        exec::run_to_completion(&self.config, &self.reaper, prompt, &options, None)
            .await
            .map(|output| output.text)
    }

    /// Like [`execute`](Self::execute), but the invocation runs on the
    /// runtime's worker pool; the returned handle is the future carrying
    /// the result. The process keeps running, and stays under its
    /// deadline, even if the handle is dropped.
    pub fn execute_detached(
        &self,
        prompt: impl Into<String>,
        options: ExecOptions,
    ) -> JoinHandle<Result<String>> {
        let config = Arc::clone(&self.config);
        let reaper = self.reaper.clone();
        let prompt = prompt.into();
        tokio::spawn(async move {
            exec::run_to_completion(&config, &reaper, &prompt, &options, None)
                .await
                .map(|output| output.text)
        })
    }

    /// Run one prompt and consume its output line by line as it is
    /// produced.
    pub fn execute_stream(&self, prompt: &str, options: ExecOptions) -> Result<OutputLines> {
        exec::run_streaming(&self.config, &self.reaper, prompt, &options)
    }

    /// Open a conversation. Nothing is spawned until its first turn.
    pub async fn create_session(&self, options: ExecOptions) -> Result<SessionId> {
        self.sessions.create(options).await
    }

    /// Send one turn on a session; turns on the same session run strictly
    /// one at a time, while different sessions overlap freely.
    pub async fn send_message(&self, id: SessionId, text: &str) -> Result<String> {
        let session = self.sessions.get(id).await?;
        session.send_message(text).await
    }

    pub async fn close_session(&self, id: SessionId) {
        self.sessions.close(id).await;
    }

    pub async fn is_session_active(&self, id: SessionId) -> bool {
        self.sessions.is_active(id).await
    }

    pub async fn list_sessions(&self) -> Vec<SessionDescriptor> {
        self.sessions.list().await
    }

    /// Whether the CLI is runnable at all: binary on disk plus at least
    /// one recognized credential.
    pub fn is_available(&self) -> bool {
        exec::is_available(&self.config)
    }

    /// Best-effort `claude --version`; `None` on any failure.
    pub async fn version(&self) -> Option<String> {
        exec::version(&self.config).await
    }

    /// Close every session and stop background work. One-shot calls keep
    /// working afterwards.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    /// Number of claude processes currently alive under this bridge.
    pub fn running_processes(&self) -> usize {
        self.reaper.supervised_count()
    }
}
