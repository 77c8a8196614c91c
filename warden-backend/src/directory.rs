//! Discord member and community lookups.

use async_trait::async_trait;
use serenity::all::{GuildId, GuildPagination, Http, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRole {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildMember {
    pub user_id: u64,
    pub display_name: String,
    pub roles: Vec<MemberRole>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedGuild {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("discord api error: {0}")]
    Api(String),

    #[error("discord lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Remote member lookup. "Not a member" is `Ok(None)`, never an error.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn member(&self, guild_id: u64, user_id: u64) -> Result<Option<GuildMember>, DirectoryError>;

    /// Every community the bot currently belongs to.
    async fn joined_guilds(&self) -> Result<Vec<JoinedGuild>, DirectoryError>;
}

/// Page size of the current-user guild list endpoint.
const GUILD_PAGE: u64 = 200;

/// [`MemberDirectory`] backed by the Discord REST API.
pub struct DiscordDirectory {
    http: Arc<Http>,
}

impl DiscordDirectory {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn is_not_found(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Http(http) => http.status_code().map(|s| s.as_u16()) == Some(404),
        _ => false,
    }
}

#[async_trait]
impl MemberDirectory for DiscordDirectory {
    async fn member(&self, guild_id: u64, user_id: u64) -> Result<Option<GuildMember>, DirectoryError> {
        let guild = GuildId::new(guild_id);
        let member = match self.http.get_member(guild, UserId::new(user_id)).await {
            Ok(member) => member,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(DirectoryError::Api(e.to_string())),
        };

        let mut roles = Vec::with_capacity(member.roles.len());
        if !member.roles.is_empty() {
            let names: HashMap<u64, String> = self
                .http
                .get_guild_roles(guild)
                .await
                .map_err(|e| DirectoryError::Api(e.to_string()))?
                .into_iter()
                .map(|role| (role.id.get(), role.name))
                .collect();

            for role_id in &member.roles {
                let id = role_id.get();
                roles.push(MemberRole {
                    id,
                    name: names.get(&id).cloned().unwrap_or_default(),
                });
            }
        }

        Ok(Some(GuildMember {
            user_id,
            display_name: member.display_name().to_string(),
            roles,
        }))
    }

    async fn joined_guilds(&self) -> Result<Vec<JoinedGuild>, DirectoryError> {
        let mut guilds = Vec::new();
        let mut after = None;

        loop {
            let page = self
                .http
                .get_guilds(after.map(GuildPagination::After), Some(GUILD_PAGE))
                .await
                .map_err(|e| DirectoryError::Api(e.to_string()))?;

            let full = page.len() as u64 == GUILD_PAGE;
            after = page.last().map(|g| g.id);
            guilds.extend(page.into_iter().map(|g| JoinedGuild {
                id: g.id.get(),
                name: g.name,
            }));

            if !full {
                break;
            }
        }

        Ok(guilds)
    }
}
