//! Narrow entry points the proxy and the Discord commands call into.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;
use warden_db::{DbError, LinkedAccount};

use crate::AppState;
use crate::gate::{ConnectionAttempt, GateDecision};
use crate::helpers::now;
use crate::notify::{LinkFailure, PlayerAction};
use crate::policy::{Policy, PolicyError};
use crate::sessions::{ReportedSession, SessionError};
use crate::validation::validate_code;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid or expired verification code")]
    InvalidCode,

    #[error("discord account is already linked to another player")]
    AlreadyLinked,

    #[error("storage error: {0}")]
    Storage(DbError),
}

impl LinkError {
    fn failure(&self) -> LinkFailure {
        match self {
            LinkError::InvalidCode => LinkFailure::InvalidCode,
            LinkError::AlreadyLinked => LinkFailure::AlreadyLinked,
            LinkError::Storage(_) => LinkFailure::Storage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub name: String,
    pub display_name: String,
    pub reachable: bool,
}

impl AppState {
    /// Decide a backend connection attempt.
    pub async fn on_connection_attempt(&self, attempt: &ConnectionAttempt) -> GateDecision {
        self.gate.check(attempt).await
    }

    /// A player finished connecting to `server`. `previous_server` is the
    /// proxy's view and is used when the session cache has none.
    pub async fn on_server_connected(
        &self,
        player_id: Uuid,
        player_name: &str,
        server: &str,
        previous_server: Option<String>,
    ) -> Result<(), SessionError> {
        let cached = self
            .sessions
            .join(player_id, player_name, server, now())
            .await?;

        let action = match cached.or(previous_server) {
            Some(from) if from != server => PlayerAction::Move {
                from,
                to: server.to_string(),
            },
            Some(_) => return Ok(()),
            None => PlayerAction::Join {
                server: server.to_string(),
            },
        };

        info!(player = player_name, ?action, "player action");
        self.notifications.player_action(player_name, action);
        Ok(())
    }

    /// A player left the proxy.
    pub async fn on_disconnect(&self, player_id: Uuid, player_name: &str) {
        let server = self.sessions.leave(player_id).await;
        info!(player = player_name, server = ?server, "player left");
        self.notifications
            .player_action(player_name, PlayerAction::Leave);
    }

    /// Replace the session view after a proxy restart.
    pub async fn sync_sessions(&self, sessions: &[ReportedSession]) {
        self.sessions.sync(sessions, now()).await;
        info!(count = sessions.len(), "sessions synced");
    }

    /// Redeem `code` and link its player to `discord_id`.
    ///
    /// The code is consumed before the write; if the write fails the player
    /// reconnects for a new code.
    pub async fn link_with_code(
        &self,
        code: &str,
        discord_id: u64,
    ) -> Result<LinkedAccount, LinkError> {
        let result = self.redeem_and_link(code, discord_id).await;

        match &result {
            Ok(link) => {
                info!(player_id = %link.player_id, discord_id, "account linked");
                self.notifications.link_succeeded(link.player_id, discord_id);
            }
            Err(e) => {
                match e {
                    LinkError::Storage(db_err) => {
                        error!(discord_id, error = %db_err, "failed to store link")
                    }
                    _ => warn!(discord_id, error = %e, "link attempt rejected"),
                }
                self.notifications.link_failed(discord_id, e.failure());
            }
        }

        result
    }

    async fn redeem_and_link(&self, code: &str, discord_id: u64) -> Result<LinkedAccount, LinkError> {
        let code = code.trim();
        validate_code(code).map_err(|_| LinkError::InvalidCode)?;

        let player_id = self
            .codes
            .redeem(code)
            .await
            .ok_or(LinkError::InvalidCode)?;

        match self.links.link(player_id, discord_id, now()).await {
            Ok(link) => Ok(link),
            Err(DbError::DiscordIdConflict) => Err(LinkError::AlreadyLinked),
            Err(e) => Err(LinkError::Storage(e)),
        }
    }

    /// Remove the link owned by `discord_id`. Returns the unlinked player.
    pub async fn unlink_discord(&self, discord_id: u64) -> Result<Option<Uuid>, DbError> {
        let Some(player_id) = self.links.player_id(discord_id).await? else {
            return Ok(None);
        };

        if self.links.unlink(player_id).await? {
            info!(%player_id, discord_id, "account unlinked");
            Ok(Some(player_id))
        } else {
            Ok(None)
        }
    }

    /// Re-read the policy file and apply its timings.
    pub async fn reload_policy(&self) -> Result<Arc<Policy>, PolicyError> {
        let policy = self.policy.reload().await?;
        self.codes.set_ttl(policy.linking.verification_timeout);
        self.monitor.restart();
        Ok(policy)
    }

    /// Reachability of every observed server with display names.
    pub async fn reachability(&self) -> Vec<ServerStatus> {
        let policy = self.policy.current();
        self.monitor
            .current()
            .await
            .into_iter()
            .map(|(name, reachable)| ServerStatus {
                display_name: policy.display_name(&name).to_string(),
                name,
                reachable,
            })
            .collect()
    }
}
