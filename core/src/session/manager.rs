use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::CliConfig;
use crate::error::BridgeErr;
use crate::error::Result;
use crate::exec::ExecOptions;
use crate::reaper::ProcessReaper;
use crate::session::Session;
use crate::session::SessionDescriptor;
use crate::session::SessionId;

/// Registry of live conversations: creation, lookup, explicit close, and
/// periodic reclamation of sessions nobody is talking to anymore.
pub struct SessionManager {
    registry: Arc<Registry>,
    sweeper: CancellationToken,
}

struct Registry {
    config: Arc<CliConfig>,
    reaper: ProcessReaper,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionManager {
    /// Starts the reclamation sweep immediately; it runs until
    /// [`shutdown`](Self::shutdown) or drop.
    pub fn new(config: Arc<CliConfig>, reaper: ProcessReaper) -> Self {
        let registry = Arc::new(Registry {
            config,
            reaper,
            sessions: Mutex::new(HashMap::new()),
        });
        let sweeper = CancellationToken::new();
        spawn_sweeper(Arc::clone(&registry), sweeper.clone());
        Self { registry, sweeper }
    }

    /// Register a new conversation. No process is spawned until its first
    /// turn.
    pub async fn create(&self, options: ExecOptions) -> Result<SessionId> {
        options.validate()?;
        let session = Arc::new(Session::new(
            options,
            Arc::clone(&self.registry.config),
            self.registry.reaper.clone(),
        ));
        let id = session.id();
        self.registry.sessions.lock().await.insert(id, session);
        tracing::info!(session = %id, "session created");
        Ok(id)
    }

    /// Look up a live session. The map lock is released before the caller
    /// does anything with it, so one session's long turn never blocks the
    /// registry.
    pub async fn get(&self, id: SessionId) -> Result<Arc<Session>> {
        let sessions = self.registry.sessions.lock().await;
        sessions.get(&id).cloned().ok_or(BridgeErr::SessionNotFound(id))
    }

    /// Close and forget a session. Unknown ids are treated as already
    /// closed.
    pub async fn close(&self, id: SessionId) {
        let removed = self.registry.sessions.lock().await.remove(&id);
        if let Some(session) = removed {
            session.close();
        }
    }

    /// `true` only for a registered session still in its active state.
    pub async fn is_active(&self, id: SessionId) -> bool {
        let sessions = self.registry.sessions.lock().await;
        sessions.get(&id).is_some_and(|session| session.is_active())
    }

    /// Descriptors for every registered session, oldest first.
    pub async fn list(&self) -> Vec<SessionDescriptor> {
        let sessions: Vec<Arc<Session>> = {
            let guard = self.registry.sessions.lock().await;
            guard.values().cloned().collect()
        };
        let mut descriptors = Vec::with_capacity(sessions.len());
        for session in sessions {
            descriptors.push(session.descriptor().await);
        }
        descriptors.sort_by_key(|descriptor| descriptor.created_at);
        descriptors
    }

    pub async fn session_count(&self) -> usize {
        self.registry.sessions.lock().await.len()
    }

    /// Close every session and stop the sweep. Idempotent; the manager is
    /// inert afterwards except for creating new sessions.
    pub async fn shutdown(&self) {
        self.sweeper.cancel();
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.registry.sessions.lock().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "closed all sessions on shutdown");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

fn spawn_sweeper(registry: Arc<Registry>, token: CancellationToken) {
    let idle_timeout = registry.config.idle_timeout;
    let reap_interval = registry.config.reap_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reap_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            sweep(&registry, idle_timeout).await;
        }
    });
}

/// One reclamation pass. Expiry is evaluated outside the map lock so a
/// slow descriptor or turn elsewhere cannot stall it; each removal
/// re-takes the lock briefly.
async fn sweep(registry: &Registry, idle_timeout: Duration) {
    let candidates: Vec<Arc<Session>> = {
        let guard = registry.sessions.lock().await;
        guard.values().cloned().collect()
    };

    for session in candidates {
        let stale = !session.is_active();
        if !stale && !session.is_expired(idle_timeout).await {
            continue;
        }
        registry.sessions.lock().await.remove(&session.id());
        session.close();
        if stale {
            tracing::debug!(session = %session.id(), state = %session.state(), "pruned finished session");
        } else {
            tracing::info!(session = %session.id(), "reclaimed idle session");
        }
    }
}
