use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Runtime configuration with environment variable overrides.
///
/// Access policy (guilds, roles, servers) lives in the TOML file at
/// `policy_path`, see [`crate::policy`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "warden.db")
    pub database_path: String,

    /// Access policy file path
    /// Env: POLICY_PATH (default: "warden.toml")
    pub policy_path: String,

    /// Discord API Token
    /// Env: DISCORD_TOKEN (required by the binary)
    pub discord_token: Option<String>,

    /// Shared secret the proxy sends as a bearer token
    /// Env: PROXY_API_KEY (optional; proxy routes are open when unset)
    pub proxy_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", 1024 * 1024),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            port: env_or_default("PORT", 3000),
            database_path: env_or_default_string("DATABASE_PATH", "warden.db"),
            policy_path: env_or_default_string("POLICY_PATH", "warden.toml"),
            discord_token: non_empty_var("DISCORD_TOKEN"),
            proxy_api_key: non_empty_var("PROXY_API_KEY"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            database_path: "warden.db".to_string(),
            policy_path: "warden.toml".to_string(),
            discord_token: None,
            proxy_api_key: None,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

fn non_empty_var(key: &str) -> Option<String> {
    var(key).ok().filter(|val| !val.trim().is_empty())
}
