//! Best-effort notifications to Discord.

use async_trait::async_trait;
use serenity::all::{ChannelId, CreateEmbed, CreateMessage, Http, Timestamp};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::policy::PolicyStore;

const COLOR_GREEN: u32 = 0x57F287;
const COLOR_RED: u32 = 0xED4245;
const COLOR_BLURPLE: u32 = 0x5865F2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
    Join { server: String },
    Leave,
    Move { from: String, to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    InvalidCode,
    AlreadyLinked,
    Storage,
}

impl LinkFailure {
    pub fn describe(self) -> &'static str {
        match self {
            LinkFailure::InvalidCode => "invalid or expired code",
            LinkFailure::AlreadyLinked => "discord account already linked to another player",
            LinkFailure::Storage => "storage error",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to deliver to {failed} of {total} channels: {last}")]
    Delivery {
        failed: usize,
        total: usize,
        last: String,
    },
}

/// Outbound notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn link_succeeded(&self, player_id: Uuid, discord_id: u64) -> Result<(), NotifyError>;
    async fn link_failed(&self, discord_id: u64, reason: LinkFailure) -> Result<(), NotifyError>;
    async fn player_action(&self, player_name: &str, action: &PlayerAction) -> Result<(), NotifyError>;
    async fn server_status_changed(
        &self,
        server: &str,
        display_name: &str,
        reachable: bool,
    ) -> Result<(), NotifyError>;
}

/// Fire-and-forget front for a [`Notifier`]: each call runs on its own task
/// and failures are only logged.
#[derive(Clone)]
pub struct Notifications {
    sink: Arc<dyn Notifier>,
}

impl Notifications {
    pub fn new(sink: Arc<dyn Notifier>) -> Self {
        Self { sink }
    }

    pub fn link_succeeded(&self, player_id: Uuid, discord_id: u64) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.link_succeeded(player_id, discord_id).await {
                warn!(error = %e, "link notification failed");
            }
        });
    }

    pub fn link_failed(&self, discord_id: u64, reason: LinkFailure) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.link_failed(discord_id, reason).await {
                warn!(error = %e, "link failure notification failed");
            }
        });
    }

    pub fn player_action(&self, player_name: &str, action: PlayerAction) {
        let sink = Arc::clone(&self.sink);
        let player_name = player_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = sink.player_action(&player_name, &action).await {
                warn!(error = %e, player = %player_name, "player action notification failed");
            }
        });
    }

    pub fn server_status_changed(&self, server: &str, display_name: &str, reachable: bool) {
        let sink = Arc::clone(&self.sink);
        let server = server.to_string();
        let display_name = display_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = sink.server_status_changed(&server, &display_name, reachable).await {
                warn!(error = %e, %server, "status notification failed");
            }
        });
    }
}

/// Posts embeds to the channels named in the current policy.
pub struct DiscordNotifier {
    http: Arc<Http>,
    policy: Arc<PolicyStore>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, policy: Arc<PolicyStore>) -> Self {
        Self { http, policy }
    }

    /// Every enabled community's channel.
    fn community_channels(&self) -> Vec<u64> {
        self.policy
            .current()
            .enabled_guilds()
            .filter_map(|g| g.channel_id)
            .collect()
    }

    fn status_channels(&self) -> Vec<u64> {
        match self.policy.current().monitor.channel_id {
            Some(channel) => vec![channel],
            None => self.community_channels(),
        }
    }

    fn audit_channels(&self) -> Vec<u64> {
        self.policy
            .current()
            .linking
            .audit_channel_id
            .into_iter()
            .collect()
    }

    async fn broadcast(&self, channels: Vec<u64>, embed: CreateEmbed) -> Result<(), NotifyError> {
        let total = channels.len();
        let mut failed = 0;
        let mut last = String::new();

        for channel in channels {
            let message = CreateMessage::new().embed(embed.clone());
            if let Err(e) = self
                .http
                .send_message(ChannelId::new(channel), Vec::new(), &message)
                .await
            {
                debug!(channel, error = %e, "embed delivery failed");
                failed += 1;
                last = e.to_string();
            }
        }

        if failed > 0 {
            return Err(NotifyError::Delivery { failed, total, last });
        }
        Ok(())
    }
}

fn embed(description: String, color: u32) -> CreateEmbed {
    CreateEmbed::new()
        .description(description)
        .color(color)
        .timestamp(Timestamp::now())
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn link_succeeded(&self, player_id: Uuid, discord_id: u64) -> Result<(), NotifyError> {
        let text = format!("<@{discord_id}> linked Minecraft account `{player_id}`");
        self.broadcast(self.audit_channels(), embed(text, COLOR_GREEN))
            .await
    }

    async fn link_failed(&self, discord_id: u64, reason: LinkFailure) -> Result<(), NotifyError> {
        let text = format!("<@{discord_id}> failed to link: {}", reason.describe());
        self.broadcast(self.audit_channels(), embed(text, COLOR_RED))
            .await
    }

    async fn player_action(&self, player_name: &str, action: &PlayerAction) -> Result<(), NotifyError> {
        let policy = self.policy.current();
        let (text, color) = match action {
            PlayerAction::Join { server } => (
                format!(
                    "**{player_name}** joined **{}**",
                    policy.display_name(server)
                ),
                COLOR_GREEN,
            ),
            PlayerAction::Leave => (format!("**{player_name}** left the server"), COLOR_RED),
            PlayerAction::Move { from, to } => (
                format!(
                    "**{player_name}** moved from **{}** to **{}**",
                    policy.display_name(from),
                    policy.display_name(to)
                ),
                COLOR_BLURPLE,
            ),
        };
        self.broadcast(self.community_channels(), embed(text, color))
            .await
    }

    async fn server_status_changed(
        &self,
        _server: &str,
        display_name: &str,
        reachable: bool,
    ) -> Result<(), NotifyError> {
        let (text, color) = if reachable {
            (format!("**{display_name}** server is online"), COLOR_GREEN)
        } else {
            (format!("**{display_name}** server is offline"), COLOR_RED)
        };
        self.broadcast(self.status_channels(), embed(text, color))
            .await
    }
}
