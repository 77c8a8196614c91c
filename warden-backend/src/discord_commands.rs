use crate::Context;
use poise::CreateReply;
use poise::command;
use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter};
use uuid::Uuid;
use warden_backend::events::LinkError;
use warden_backend::helpers::{format_duration, now};

pub(crate) type Error = Box<dyn std::error::Error + Send + Sync>;

const COLOR: u32 = 0x5865F2;

fn ephemeral(text: impl Into<String>) -> CreateReply {
    CreateReply::default().content(text).ephemeral(true)
}

/// Link your Minecraft account with the code shown when you tried to join
#[command(slash_command, prefix_command)]
pub async fn link(
    ctx: Context<'_>,
    #[description = "Six digit verification code"] code: String,
) -> Result<(), Error> {
    let state = &ctx.data().state;
    let discord_id = ctx.author().id.get();

    let reply = match state.link_with_code(&code, discord_id).await {
        Ok(_) => "✅ Account linked! Reconnect to Minecraft to continue.",
        Err(LinkError::InvalidCode) => "❌ That code is invalid or has expired. Reconnect to get a new one.",
        Err(LinkError::AlreadyLinked) => {
            "❌ This Discord account is already linked to another Minecraft account. Run `/unlink` first."
        }
        Err(LinkError::Storage(_)) => {
            "❌ Linking failed because of a database error. Reconnect to get a new code and try again."
        }
    };
    ctx.send(ephemeral(reply)).await?;
    Ok(())
}

/// Remove the link between your Discord and Minecraft accounts
#[command(slash_command, prefix_command)]
pub async fn unlink(ctx: Context<'_>) -> Result<(), Error> {
    let state = &ctx.data().state;
    let reply = match state.unlink_discord(ctx.author().id.get()).await? {
        Some(_) => "Your Minecraft account has been unlinked.",
        None => "Your Discord account is not linked to any Minecraft account.",
    };
    ctx.send(ephemeral(reply)).await?;
    Ok(())
}

/// Show which Minecraft servers are online
#[command(slash_command, prefix_command)]
pub async fn serverstatus(ctx: Context<'_>) -> Result<(), Error> {
    let state = &ctx.data().state;
    let servers = state.reachability().await;

    let embed = CreateEmbed::default().title("Server Status").color(COLOR);
    if servers.is_empty() {
        ctx.send(CreateReply::default().embed(embed.description("No servers have been checked yet.")))
            .await?;
        return Ok(());
    }

    let current_time = now();
    let mut embed = embed;
    for server in servers {
        let players = state.sessions.players_on(&server.name).await;
        let status = if server.reachable { "🟢 Online" } else { "🔴 Offline" };
        let value = if players.is_empty() {
            status.to_string()
        } else {
            let list = players
                .iter()
                .map(|p| format!("- {} ({})", p.name, format_duration(current_time - p.joined_at)))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{status} · {} online\n{list}", players.len())
        };
        embed = embed.field(server.display_name, value, false);
    }

    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Explain which servers a Minecraft player can join and why
#[command(slash_command, prefix_command, required_permissions = "ADMINISTRATOR")]
pub async fn access(
    ctx: Context<'_>,
    #[description = "Minecraft player UUID"] player: String,
) -> Result<(), Error> {
    let state = &ctx.data().state;
    let player_id = match Uuid::parse_str(player.trim()) {
        Ok(id) => id,
        Err(_) => {
            ctx.send(ephemeral("That is not a valid player UUID.")).await?;
            return Ok(());
        }
    };

    let report = state.permissions.inspect(player_id).await?;
    let mut embed = CreateEmbed::default()
        .title(format!("Access for {player_id}"))
        .color(COLOR)
        .footer(CreateEmbedFooter::new(if report.joined_guilds_mode {
            "Candidates: every joined server (auto-discovery)"
        } else {
            "Candidates: configured servers"
        }));

    let Some(discord_id) = report.discord_id else {
        ctx.send(CreateReply::default().embed(embed.description("Not linked to a Discord account.")).ephemeral(true))
            .await?;
        return Ok(());
    };
    embed = embed.description(format!("Linked to <@{discord_id}>"));

    if report.communities.is_empty() {
        embed = embed.field("Communities", "No candidate communities.", false);
    }
    for community in report.communities {
        let name = community
            .name
            .clone()
            .unwrap_or_else(|| community.guild_id.to_string());
        let mut lines = vec![format!("Mode: {}", community.mode.label())];
        match (&community.member, &community.lookup_error) {
            (_, Some(error)) => lines.push(format!("Lookup failed: {error}")),
            (None, None) => lines.push("Not a member".to_string()),
            (Some(member), None) => {
                let roles = if member.roles.is_empty() {
                    "none".to_string()
                } else {
                    member
                        .roles
                        .iter()
                        .map(|r| r.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                lines.push(format!("Member: {} · Roles: {roles}", member.display_name));
                let grants = community
                    .grants
                    .iter()
                    .map(|(server, granted)| format!("{server} {}", if *granted { "✅" } else { "❌" }))
                    .collect::<Vec<_>>()
                    .join(" ");
                lines.push(grants);
            }
        }
        embed = embed.field(name, lines.join("\n"), false);
    }

    ctx.send(CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Reload the access policy file
#[command(slash_command, prefix_command, required_permissions = "ADMINISTRATOR")]
pub async fn reload(ctx: Context<'_>) -> Result<(), Error> {
    let state = &ctx.data().state;
    let reply = match state.reload_policy().await {
        Ok(policy) => format!(
            "Policy reloaded: {} servers, {} communities.",
            policy.servers.len(),
            policy.guilds.len()
        ),
        Err(e) => {
            tracing::error!(error = %e, "policy reload failed");
            format!("Reload failed, keeping the previous policy: {e}")
        }
    };
    ctx.send(ephemeral(reply)).await?;
    Ok(())
}
