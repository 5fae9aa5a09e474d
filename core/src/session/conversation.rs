use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CliConfig;
use crate::error::BridgeErr;
use crate::error::Result;
use crate::exec;
use crate::exec::ExecOptions;
use crate::reaper::ProcessReaper;
use crate::session::SessionId;
use crate::spawn::Correlation;

/// Lifecycle of a conversation. `Closed` and `Failed` are terminal; no
/// transition ever leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closed,
    Failed,
}

impl SessionState {
    const ACTIVE: u8 = 0;
    const CLOSED: u8 = 1;
    const FAILED: u8 = 2;

    fn from_u8(raw: u8) -> Self {
        match raw {
            Self::CLOSED => SessionState::Closed,
            Self::FAILED => SessionState::Failed,
            _ => SessionState::Active,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Active => "active",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Point-in-time summary of a session, fit for listings and status
/// endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDescriptor {
    pub id: SessionId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub uptime: Duration,
    pub idle: Duration,
    pub turns: u64,
    pub model: Option<String>,
}

/// One multi-turn conversation. The session itself holds no process;
/// every turn spawns a fresh invocation and the CLI stitches them into
/// one history via the correlation token.
pub struct Session {
    id: SessionId,
    options: ExecOptions,
    config: Arc<CliConfig>,
    reaper: ProcessReaper,
    created_at: DateTime<Utc>,
    created: Instant,
    last_activity: Mutex<Instant>,
    state: AtomicU8,
    first_turn: AtomicBool,
    turns: AtomicU64,
    /// Turns on one session run strictly one at a time, in lock
    /// acquisition order.
    turn_lock: Mutex<()>,
}

impl Session {
    pub(crate) fn new(options: ExecOptions, config: Arc<CliConfig>, reaper: ProcessReaper) -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::generate(),
            options,
            config,
            reaper,
            created_at: Utc::now(),
            created: now,
            last_activity: Mutex::new(now),
            state: AtomicU8::new(SessionState::ACTIVE),
            first_turn: AtomicBool::new(true),
            turns: AtomicU64::new(0),
            turn_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Send one conversational turn and wait for the reply.
    ///
    /// The first turn asks the CLI to create its history under this
    /// session's token; every later one resumes it. Any execution failure
    /// moves the session to [`SessionState::Failed`] for good, since the
    /// on-disk history can no longer be trusted to match what the caller
    /// saw.
    pub async fn send_message(&self, text: &str) -> Result<String> {
        self.ensure_active()?;
        if text.trim().is_empty() {
            return Err(BridgeErr::validation("message must not be blank"));
        }

        let _turn = self.turn_lock.lock().await;
        // A concurrent turn or close may have retired the session while
        // this one queued.
        self.ensure_active()?;
        self.touch().await;

        let correlation = if self.first_turn.load(Ordering::SeqCst) {
            Correlation::Create(self.id)
        } else {
            Correlation::Resume(self.id)
        };

        tracing::debug!(
            session = %self.id,
            resume = matches!(correlation, Correlation::Resume(_)),
            "turn started"
        );
        match exec::run_to_completion(
            &self.config,
            &self.reaper,
            text,
            &self.options,
            Some(correlation),
        )
        .await
        {
            Ok(output) => {
                self.first_turn.store(false, Ordering::SeqCst);
                let turn = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
                self.touch().await;
                tracing::info!(
                    session = %self.id,
                    turn,
                    duration_ms = output.duration.as_millis() as u64,
                    "turn finished"
                );
                Ok(output.text)
            }
            Err(err) => {
                self.mark_failed();
                tracing::warn!(session = %self.id, "turn failed, session retired: {err}");
                Err(err)
            }
        }
    }

    /// Retire the session. Idempotent; a failed session stays failed.
    pub fn close(&self) {
        let done = self.state.compare_exchange(
            SessionState::ACTIVE,
            SessionState::CLOSED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if done.is_ok() {
            tracing::debug!(session = %self.id, "session closed");
        }
    }

    /// Whether the session has been idle longer than `threshold`. Read
    /// only; the registry sweep decides what to do with the answer.
    pub async fn is_expired(&self, threshold: Duration) -> bool {
        self.last_activity.lock().await.elapsed() > threshold
    }

    pub async fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            id: self.id,
            state: self.state(),
            created_at: self.created_at,
            uptime: self.created.elapsed(),
            idle: self.last_activity.lock().await.elapsed(),
            turns: self.turns.load(Ordering::SeqCst),
            model: self.options.model.clone(),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state() {
            SessionState::Active => Ok(()),
            state => Err(BridgeErr::SessionNotActive { id: self.id, state }),
        }
    }

    fn mark_failed(&self) {
        // Never overwrites Closed; close wins whichever lands first.
        let _ = self.state.compare_exchange(
            SessionState::ACTIVE,
            SessionState::FAILED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
