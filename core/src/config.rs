use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable carrying an Anthropic API key.
pub const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";
/// Environment variable carrying an OAuth token minted by `claude setup-token`.
pub const OAUTH_TOKEN_ENV_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";
/// Extra CA bundle handed to the CLI's Node runtime on TLS-intercepted
/// networks.
pub const CA_BUNDLE_ENV_VAR: &str = "NODE_EXTRA_CA_CERTS";

const DEFAULT_CLI_NAME: &str = "claude";

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// How to find and authenticate the claude executable, plus the lifecycle
/// knobs shared by everything spawned through one [`crate::ClaudeBridge`].
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Executable to invoke. A bare name is resolved against `PATH`.
    pub claude_path: PathBuf,
    pub api_key: Option<String>,
    pub oauth_token: Option<String>,
    /// Home directory exported to the child. The CLI keeps its on-disk
    /// conversation history under it, so resuming a session only works
    /// while this stays stable.
    pub home_dir: Option<PathBuf>,
    pub ca_bundle: Option<PathBuf>,
    /// Sessions idle longer than this are reclaimed by the registry sweep.
    pub idle_timeout: Duration,
    /// How often the registry sweep runs.
    pub reap_interval: Duration,
    /// How long a graceful termination may take before escalating to a kill.
    pub grace_period: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            claude_path: PathBuf::from(DEFAULT_CLI_NAME),
            api_key: None,
            oauth_token: None,
            home_dir: dirs::home_dir(),
            ca_bundle: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reap_interval: DEFAULT_REAP_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl CliConfig {
    /// Credentials and CA bundle picked up from the process environment,
    /// everything else at defaults. Empty variables count as unset.
    pub fn from_env() -> Self {
        Self {
            api_key: non_empty_var(API_KEY_ENV_VAR),
            oauth_token: non_empty_var(OAUTH_TOKEN_ENV_VAR),
            ca_bundle: non_empty_var(CA_BUNDLE_ENV_VAR).map(PathBuf::from),
            ..Self::default()
        }
    }

    pub fn with_claude_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.claude_path = path.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_oauth_token(mut self, token: impl Into<String>) -> Self {
        self.oauth_token = Some(token.into());
        self
    }

    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    pub fn with_ca_bundle(mut self, bundle: impl Into<PathBuf>) -> Self {
        self.ca_bundle = Some(bundle.into());
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// At least one recognized credential is configured. The CLI decides
    /// which one wins when both are present; we only check that it will not
    /// start up unauthenticated.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() || self.oauth_token.is_some()
    }

    /// Where `claude_path` actually points: the path itself when it names a
    /// location, otherwise a `PATH` lookup. `None` when nothing runnable is
    /// found.
    pub fn resolved_cli_path(&self) -> Option<PathBuf> {
        if self.claude_path.components().count() > 1 {
            return self.claude_path.exists().then(|| self.claude_path.clone());
        }
        which::which(&self.claude_path).ok()
    }

    /// Base environment for spawned tools. The child inherits the parent
    /// environment; these entries are layered on top of it, and any
    /// per-call overlay is layered on top of these.
    pub(crate) fn child_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Some(home) = &self.home_dir {
            env.insert("HOME".to_string(), home.display().to_string());
        }
        if let Some(key) = &self.api_key {
            env.insert(API_KEY_ENV_VAR.to_string(), key.clone());
        }
        if let Some(token) = &self.oauth_token {
            env.insert(OAUTH_TOKEN_ENV_VAR.to_string(), token.clone());
        }
        if let Some(bundle) = &self.ca_bundle {
            env.insert(CA_BUNDLE_ENV_VAR.to_string(), bundle.display().to_string());
        }
        env
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn no_credentials_by_default() {
        let config = CliConfig {
            home_dir: None,
            ..CliConfig::default()
        };
        assert!(!config.has_credentials());
        assert_eq!(config.child_env(), HashMap::new());
    }

    #[test]
    fn either_credential_counts() {
        assert!(CliConfig::default().with_api_key("sk-test").has_credentials());
        assert!(CliConfig::default().with_oauth_token("oauth-test").has_credentials());
    }

    #[test]
    fn child_env_carries_configured_entries() {
        let config = CliConfig::default()
            .with_api_key("sk-test")
            .with_home_dir("/srv/claude-home")
            .with_ca_bundle("/etc/ssl/corp.pem");

        let env = config.child_env();
        assert_eq!(env.get("HOME").map(String::as_str), Some("/srv/claude-home"));
        assert_eq!(env.get(API_KEY_ENV_VAR).map(String::as_str), Some("sk-test"));
        assert_eq!(
            env.get(CA_BUNDLE_ENV_VAR).map(String::as_str),
            Some("/etc/ssl/corp.pem")
        );
        assert!(!env.contains_key(OAUTH_TOKEN_ENV_VAR));
    }

    #[test]
    fn explicit_path_is_not_searched() {
        let config = CliConfig::default().with_claude_path("/nonexistent/claude");
        assert_eq!(config.resolved_cli_path(), None);
    }

    #[cfg(unix)]
    #[test]
    fn explicit_path_resolves_when_present() {
        let config = CliConfig::default().with_claude_path("/bin/sh");
        assert_eq!(config.resolved_cli_path(), Some(PathBuf::from("/bin/sh")));
    }
}
