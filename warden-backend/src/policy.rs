//! Access policy loaded from a TOML file.
//!
//! The file is parsed into loosely typed `Raw*` structs and then validated
//! into [`Policy`]. Discord ids are written as strings in the file (TOML
//! integers are awkward for snowflakes) and must parse as non-zero `u64`.
//! Nothing here is validated lazily: a policy that loads is a policy the
//! permission path can read without further checks.
//!
//! ```toml
//! [servers.lobby]
//! address = "127.0.0.1:25566"
//! display_name = "Lobby"
//!
//! [guilds."1234567890123456789"]
//! name = "Main"
//! channel_id = "2345678901234567890"
//!
//! [guilds."1234567890123456789".roles."1111111111111111111"]
//! name = "Member"
//! server_access = { lobby = true, vip = false }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::validation::validate_server_name;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field} '{value}': expected a Discord snowflake")]
    InvalidId { field: &'static str, value: String },

    #[error("invalid server name '{name}': {reason}")]
    InvalidServerName { name: String, reason: String },

    #[error("server '{0}' has no address")]
    MissingAddress(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("policy has no backing file to reload from")]
    NoSource,
}

// ============================================================================
// Validated policy
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub linking: LinkingPolicy,
    pub discovery: DiscoveryPolicy,
    pub monitor: MonitorPolicy,
    pub lookup: LookupPolicy,
    /// Backend servers known to the proxy, by proxy name.
    pub servers: BTreeMap<String, BackendServer>,
    /// Explicitly configured communities, by guild id. Ordered, so every
    /// permission check walks them in the same order.
    pub guilds: BTreeMap<u64, CommunityConfig>,
}

#[derive(Debug, Clone)]
pub struct LinkingPolicy {
    pub enabled: bool,
    /// Deny unlinked players at the door (gate 1).
    pub required: bool,
    pub verification_timeout: Duration,
    /// Disconnect text for unlinked players; `{code}` and `{minutes}` are substituted.
    pub denied_message: String,
    pub audit_channel_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryPolicy {
    pub enabled: bool,
    /// Servers any member holding at least one role may join in auto-discovery mode.
    pub basic_servers: Vec<String>,
    /// Case-insensitive role name fragments that grant every server in auto-discovery mode.
    pub admin_keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorPolicy {
    pub enabled: bool,
    pub scan_delay: Duration,
    pub ping_timeout: Duration,
    pub initial_delay: Duration,
    pub channel_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LookupPolicy {
    /// Upper bound on a single Discord member lookup.
    pub member_timeout: Duration,
    /// Upper bound on a single link store call.
    pub store_timeout: Duration,
    /// Upper bound on a whole connection decision, across every lookup.
    pub decision_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendServer {
    pub name: String,
    pub address: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityConfig {
    pub id: u64,
    pub name: Option<String>,
    pub enabled: bool,
    pub channel_id: Option<u64>,
    /// Role id -> grants. Never populated automatically.
    pub roles: BTreeMap<u64, RoleGrant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleGrant {
    pub name: Option<String>,
    /// Backend server name -> explicit grant.
    pub server_access: BTreeMap<String, bool>,
}

impl RoleGrant {
    /// True only for an explicit `true` entry.
    pub fn grants(&self, server: &str) -> bool {
        self.server_access.get(server).copied().unwrap_or(false)
    }
}

impl CommunityConfig {
    pub fn has_role_entries(&self) -> bool {
        !self.roles.is_empty()
    }
}

impl Default for LinkingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            required: true,
            verification_timeout: Duration::from_secs(600),
            denied_message: default_denied_message(),
            audit_channel_id: None,
        }
    }
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            basic_servers: default_basic_servers(),
            admin_keywords: default_admin_keywords(),
        }
    }
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_delay: Duration::from_secs(30),
            ping_timeout: Duration::from_millis(3000),
            initial_delay: Duration::from_secs(5),
            channel_id: None,
        }
    }
}

impl Default for LookupPolicy {
    fn default() -> Self {
        Self {
            member_timeout: Duration::from_millis(5000),
            store_timeout: Duration::from_millis(3000),
            decision_timeout: Duration::from_millis(20_000),
        }
    }
}

impl Policy {
    /// Parse and validate a policy from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, PolicyError> {
        let raw: RawPolicy = toml::from_str(text)?;
        raw.validate()
    }

    /// Read, parse and validate a policy file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PolicyError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_toml_str(&text)
    }

    /// Human readable name of a backend server, falling back to its proxy name.
    pub fn display_name<'a>(&'a self, server: &'a str) -> &'a str {
        self.servers
            .get(server)
            .and_then(|s| s.display_name.as_deref())
            .unwrap_or(server)
    }

    pub fn guild(&self, guild_id: u64) -> Option<&CommunityConfig> {
        self.guilds.get(&guild_id)
    }

    /// Enabled, explicitly configured communities in id order.
    pub fn enabled_guilds(&self) -> impl Iterator<Item = &CommunityConfig> {
        self.guilds.values().filter(|g| g.enabled)
    }

    /// Whether candidate communities come from the bot's joined guild list
    /// rather than from configuration.
    pub fn uses_joined_guilds(&self) -> bool {
        self.discovery.enabled && self.guilds.is_empty()
    }

    /// Text shown to an unlinked player alongside a fresh code.
    pub fn denial_text(&self, code: &str) -> String {
        let minutes = self.linking.verification_timeout.as_secs().div_ceil(60);
        self.linking
            .denied_message
            .replace("{code}", code)
            .replace("{minutes}", &minutes.to_string())
    }
}

// ============================================================================
// Shared, reloadable handle
// ============================================================================

/// Holds the current policy. Readers take an `Arc` snapshot, so a reload
/// never changes a decision that is already in flight.
#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<Arc<Policy>>,
    path: Option<PathBuf>,
}

impl PolicyStore {
    /// A store with no backing file (reload is unavailable).
    pub fn new(policy: Policy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
            path: None,
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PolicyError> {
        let path = path.into();
        let policy = Policy::load(&path).await?;
        info!(
            path = %path.display(),
            servers = policy.servers.len(),
            guilds = policy.guilds.len(),
            "policy loaded"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(policy)),
            path: Some(path),
        })
    }

    pub fn current(&self) -> Arc<Policy> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new policy and return it.
    pub fn replace(&self, policy: Policy) -> Arc<Policy> {
        let policy = Arc::new(policy);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&policy),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&policy),
        }
        policy
    }

    /// Re-read the backing file. On failure the previous policy stays active.
    pub async fn reload(&self) -> Result<Arc<Policy>, PolicyError> {
        let path = self.path.as_ref().ok_or(PolicyError::NoSource)?;
        let policy = Policy::load(path).await?;
        info!(
            path = %path.display(),
            servers = policy.servers.len(),
            guilds = policy.guilds.len(),
            "policy reloaded"
        );
        Ok(self.replace(policy))
    }
}

// ============================================================================
// Raw file format
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_denied_message() -> String {
    "Discord account link required\n\n\
     Your verification code: {code}\n\
     Run /link {code} in Discord, then reconnect.\n\
     The code expires in {minutes} minutes."
        .to_string()
}

fn default_basic_servers() -> Vec<String> {
    ["lobby", "seikatsu", "sigen"].map(String::from).to_vec()
}

fn default_admin_keywords() -> Vec<String> {
    ["admin", "管理", "owner", "mod"].map(String::from).to_vec()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPolicy {
    linking: RawLinking,
    discovery: RawDiscovery,
    monitor: RawMonitor,
    lookup: RawLookup,
    servers: BTreeMap<String, RawServer>,
    guilds: BTreeMap<String, RawGuild>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLinking {
    enabled: bool,
    required: bool,
    verification_timeout_secs: u64,
    denied_message: String,
    audit_channel_id: Option<String>,
}

impl Default for RawLinking {
    fn default() -> Self {
        Self {
            enabled: true,
            required: true,
            verification_timeout_secs: 600,
            denied_message: default_denied_message(),
            audit_channel_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawDiscovery {
    enabled: bool,
    basic_servers: Vec<String>,
    admin_keywords: Vec<String>,
}

impl Default for RawDiscovery {
    fn default() -> Self {
        Self {
            enabled: true,
            basic_servers: default_basic_servers(),
            admin_keywords: default_admin_keywords(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawMonitor {
    enabled: bool,
    scan_delay_secs: u64,
    ping_timeout_ms: u64,
    initial_delay_secs: u64,
    channel_id: Option<String>,
}

impl Default for RawMonitor {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_delay_secs: 30,
            ping_timeout_ms: 3000,
            initial_delay_secs: 5,
            channel_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLookup {
    member_timeout_ms: u64,
    store_timeout_ms: u64,
    decision_timeout_ms: u64,
}

impl Default for RawLookup {
    fn default() -> Self {
        Self {
            member_timeout_ms: 5000,
            store_timeout_ms: 3000,
            decision_timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawServer {
    #[serde(default)]
    address: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGuild {
    name: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    channel_id: Option<String>,
    #[serde(default)]
    roles: BTreeMap<String, RawRole>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRole {
    name: Option<String>,
    #[serde(default)]
    server_access: BTreeMap<String, bool>,
}

fn parse_snowflake(field: &'static str, value: &str) -> Result<u64, PolicyError> {
    match value.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(PolicyError::InvalidId {
            field,
            value: value.to_string(),
        }),
    }
}

/// Empty strings mean "unset", as in hand-edited templates.
fn parse_optional_snowflake(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<u64>, PolicyError> {
    match value {
        Some(v) if !v.trim().is_empty() => parse_snowflake(field, &v).map(Some),
        _ => Ok(None),
    }
}

fn non_zero(field: &'static str, value: u64) -> Result<u64, PolicyError> {
    if value == 0 {
        return Err(PolicyError::ZeroDuration(field));
    }
    Ok(value)
}

impl RawPolicy {
    fn validate(self) -> Result<Policy, PolicyError> {
        let linking = LinkingPolicy {
            enabled: self.linking.enabled,
            required: self.linking.required,
            verification_timeout: Duration::from_secs(non_zero(
                "linking.verification_timeout_secs",
                self.linking.verification_timeout_secs,
            )?),
            denied_message: self.linking.denied_message,
            audit_channel_id: parse_optional_snowflake(
                "linking.audit_channel_id",
                self.linking.audit_channel_id,
            )?,
        };

        let discovery = DiscoveryPolicy {
            enabled: self.discovery.enabled,
            basic_servers: self.discovery.basic_servers,
            admin_keywords: self
                .discovery
                .admin_keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        };

        let monitor = MonitorPolicy {
            enabled: self.monitor.enabled,
            scan_delay: Duration::from_secs(non_zero(
                "monitor.scan_delay_secs",
                self.monitor.scan_delay_secs,
            )?),
            ping_timeout: Duration::from_millis(non_zero(
                "monitor.ping_timeout_ms",
                self.monitor.ping_timeout_ms,
            )?),
            initial_delay: Duration::from_secs(self.monitor.initial_delay_secs),
            channel_id: parse_optional_snowflake("monitor.channel_id", self.monitor.channel_id)?,
        };

        let lookup = LookupPolicy {
            member_timeout: Duration::from_millis(non_zero(
                "lookup.member_timeout_ms",
                self.lookup.member_timeout_ms,
            )?),
            store_timeout: Duration::from_millis(non_zero(
                "lookup.store_timeout_ms",
                self.lookup.store_timeout_ms,
            )?),
            decision_timeout: Duration::from_millis(non_zero(
                "lookup.decision_timeout_ms",
                self.lookup.decision_timeout_ms,
            )?),
        };

        let mut servers = BTreeMap::new();
        for (name, raw) in self.servers {
            validate_server_name(&name).map_err(|e| PolicyError::InvalidServerName {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            if raw.address.trim().is_empty() {
                return Err(PolicyError::MissingAddress(name));
            }
            servers.insert(
                name.clone(),
                BackendServer {
                    name,
                    address: raw.address.trim().to_string(),
                    display_name: raw.display_name.filter(|d| !d.is_empty()),
                },
            );
        }

        let mut guilds = BTreeMap::new();
        for (raw_id, raw) in self.guilds {
            let id = parse_snowflake("guild id", &raw_id)?;
            let mut roles = BTreeMap::new();
            for (raw_role_id, role) in raw.roles {
                let role_id = parse_snowflake("role id", &raw_role_id)?;
                for server in role.server_access.keys() {
                    if !servers.contains_key(server) {
                        warn!(
                            guild_id = id,
                            role_id,
                            %server,
                            "role grants access to a server that is not configured"
                        );
                    }
                }
                roles.insert(
                    role_id,
                    RoleGrant {
                        name: role.name,
                        server_access: role.server_access,
                    },
                );
            }
            guilds.insert(
                id,
                CommunityConfig {
                    id,
                    name: raw.name,
                    enabled: raw.enabled,
                    channel_id: parse_optional_snowflake("channel id", raw.channel_id)?,
                    roles,
                },
            );
        }

        Ok(Policy {
            linking,
            discovery,
            monitor,
            lookup,
            servers,
            guilds,
        })
    }
}
