use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_db::DbError;

use crate::directory::{DirectoryError, GuildMember, JoinedGuild, MemberDirectory};
use crate::links::LinkStore;
use crate::policy::{Policy, PolicyStore};
use crate::roles::{self, ResolverMode};

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("link store error: {0}")]
    Store(#[from] DbError),

    #[error("link store timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("failed to list joined communities: {0}")]
    Directory(#[from] DirectoryError),
}

/// Per-community view used by the access report.
#[derive(Debug, Clone)]
pub struct CommunityReport {
    pub guild_id: u64,
    pub name: Option<String>,
    pub mode: ResolverMode,
    pub member: Option<GuildMember>,
    pub lookup_error: Option<String>,
    /// Decision for every known backend server, in name order.
    pub grants: Vec<(String, bool)>,
}

#[derive(Debug, Clone)]
pub struct AccessReport {
    pub player_id: Uuid,
    pub discord_id: Option<u64>,
    pub joined_guilds_mode: bool,
    pub communities: Vec<CommunityReport>,
}

struct Candidate {
    id: u64,
    name: Option<String>,
}

/// Decides whether a linked player may join a backend server.
///
/// Role data is fetched fresh from Discord on every check. All failures
/// deny.
pub struct PermissionGate {
    links: Arc<dyn LinkStore>,
    directory: Arc<dyn MemberDirectory>,
    policy: Arc<PolicyStore>,
}

impl PermissionGate {
    pub fn new(
        links: Arc<dyn LinkStore>,
        directory: Arc<dyn MemberDirectory>,
        policy: Arc<PolicyStore>,
    ) -> Self {
        Self {
            links,
            directory,
            policy,
        }
    }

    pub async fn can_access(&self, player_id: Uuid, server: &str) -> bool {
        match self.evaluate(player_id, server).await {
            Ok(granted) => granted,
            Err(e) => {
                warn!(%player_id, server, error = %e, "permission check failed, denying");
                false
            }
        }
    }

    /// Like [`can_access`](Self::can_access) but surfaces failures.
    pub async fn evaluate(&self, player_id: Uuid, server: &str) -> Result<bool, PermissionError> {
        let policy = self.policy.current();

        let Some(discord_id) = self.discord_id(&policy, player_id).await? else {
            debug!(%player_id, server, "player not linked, denying");
            return Ok(false);
        };

        for candidate in self.candidates(&policy).await? {
            let Some(member) = self.member(&policy, candidate.id, discord_id).await else {
                continue;
            };

            if roles::resolve(
                policy.guild(candidate.id),
                &policy.discovery,
                &member.roles,
                server,
            ) {
                info!(%player_id, server, guild_id = candidate.id, "access granted");
                return Ok(true);
            }
        }

        info!(%player_id, server, discord_id, "no community grants access");
        Ok(false)
    }

    /// Walk every candidate community without short-circuiting.
    pub async fn inspect(&self, player_id: Uuid) -> Result<AccessReport, PermissionError> {
        let policy = self.policy.current();
        let discord_id = self.discord_id(&policy, player_id).await?;
        let joined_guilds_mode = policy.uses_joined_guilds();

        let mut report = AccessReport {
            player_id,
            discord_id,
            joined_guilds_mode,
            communities: Vec::new(),
        };
        let Some(discord_id) = discord_id else {
            return Ok(report);
        };

        let servers: Vec<String> = if policy.servers.is_empty() {
            policy.discovery.basic_servers.clone()
        } else {
            policy.servers.keys().cloned().collect()
        };

        for candidate in self.candidates(&policy).await? {
            let community = policy.guild(candidate.id);
            let mode = ResolverMode::for_community(community, &policy.discovery);
            let (member, lookup_error) = match self.lookup(&policy, candidate.id, discord_id).await {
                Ok(member) => (member, None),
                Err(e) => (None, Some(e.to_string())),
            };
            let grants = servers
                .iter()
                .map(|server| {
                    let granted = member.as_ref().is_some_and(|m| {
                        roles::resolve(community, &policy.discovery, &m.roles, server)
                    });
                    (server.clone(), granted)
                })
                .collect();

            report.communities.push(CommunityReport {
                guild_id: candidate.id,
                name: candidate.name,
                mode,
                member,
                lookup_error,
                grants,
            });
        }

        Ok(report)
    }

    /// Joined communities that have no role mapping yet. Role entries are
    /// never filled in automatically.
    pub async fn incomplete_communities(&self) -> Result<Vec<JoinedGuild>, PermissionError> {
        let policy = self.policy.current();
        let joined = self.joined_guilds(&policy).await?;
        Ok(joined
            .into_iter()
            .filter(|g| {
                policy
                    .guild(g.id)
                    .is_none_or(|c| !c.has_role_entries())
            })
            .collect())
    }

    async fn discord_id(
        &self,
        policy: &Policy,
        player_id: Uuid,
    ) -> Result<Option<u64>, PermissionError> {
        let limit = policy.lookup.store_timeout;
        match timeout(limit, self.links.discord_id(player_id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PermissionError::StoreTimeout(limit)),
        }
    }

    async fn joined_guilds(&self, policy: &Policy) -> Result<Vec<JoinedGuild>, PermissionError> {
        let limit = policy.lookup.member_timeout;
        match timeout(limit, self.directory.joined_guilds()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DirectoryError::Timeout(limit).into()),
        }
    }

    /// Communities to check, in a stable order.
    async fn candidates(&self, policy: &Policy) -> Result<Vec<Candidate>, PermissionError> {
        if policy.uses_joined_guilds() {
            let mut joined = self.joined_guilds(policy).await?;
            joined.sort_by_key(|g| g.id);
            return Ok(joined
                .into_iter()
                .map(|g| Candidate {
                    id: g.id,
                    name: Some(g.name),
                })
                .collect());
        }

        Ok(policy
            .enabled_guilds()
            .map(|g| Candidate {
                id: g.id,
                name: g.name.clone(),
            })
            .collect())
    }

    async fn lookup(
        &self,
        policy: &Policy,
        guild_id: u64,
        discord_id: u64,
    ) -> Result<Option<GuildMember>, DirectoryError> {
        let limit = policy.lookup.member_timeout;
        match timeout(limit, self.directory.member(guild_id, discord_id)).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(limit)),
        }
    }

    /// A failed lookup counts as "not a member here".
    async fn member(&self, policy: &Policy, guild_id: u64, discord_id: u64) -> Option<GuildMember> {
        match self.lookup(policy, guild_id, discord_id).await {
            Ok(Some(member)) => Some(member),
            Ok(None) => {
                debug!(guild_id, discord_id, "not a member");
                None
            }
            Err(e) => {
                warn!(guild_id, discord_id, error = %e, "member lookup failed, skipping community");
                None
            }
        }
    }
}
