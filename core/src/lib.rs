//! Conversational process engine over the Claude Code CLI.
//!
//! Every turn is one `claude -p` invocation run to completion; multi-turn
//! conversations are stitched together by a session token the CLI uses to
//! persist and resume its on-disk history. Each spawned process is handed
//! to a supervisor that enforces a hard deadline, so nothing runs forever
//! even when the caller is gone.
//!
//! [`ClaudeBridge`] is the entry point; everything else supports it.

mod bridge;
mod config;
mod error;
mod exec;
mod reaper;
mod session;
mod spawn;
mod stream;

pub use bridge::ClaudeBridge;
pub use config::API_KEY_ENV_VAR;
pub use config::CA_BUNDLE_ENV_VAR;
pub use config::CliConfig;
pub use config::OAUTH_TOKEN_ENV_VAR;
pub use error::BridgeErr;
pub use error::Result;
pub use exec::ExecOptions;
pub use reaper::ExitOutcome;
pub use reaper::ProcessHandle;
pub use reaper::ProcessReaper;
pub use session::Session;
pub use session::SessionDescriptor;
pub use session::SessionId;
pub use session::SessionManager;
pub use session::SessionState;
pub use stream::OutputLines;
