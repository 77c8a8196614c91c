mod discord_commands;
use poise::{Framework, FrameworkOptions, serenity_prelude as serenity};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use warden_backend::directory::DiscordDirectory;
use warden_backend::monitor::TcpProber;
use warden_backend::notify::DiscordNotifier;
use warden_backend::policy::PolicyStore;
use warden_backend::{AppState, Collaborators, create_app};
use warden_db::Database;

type Context<'a> = poise::Context<'a, crate::Data, crate::discord_commands::Error>;

pub(crate) struct Data {
    pub(crate) state: Arc<AppState>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing for structured logging; RUST_LOG overrides the default level
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting Warden backend server...");
    // Load configuration from environment variables or use defaults
    let config = warden_backend::config::Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, policy_path={}, body_limit={}KB, timeout={}s, proxy_auth={}",
        config.port,
        config.database_path,
        config.policy_path,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        config.proxy_api_key.is_some()
    );
    if config.proxy_api_key.is_none() {
        tracing::warn!("PROXY_API_KEY is not set; proxy routes accept unauthenticated requests");
    }

    let token = config
        .discord_token
        .clone()
        .expect("DISCORD_TOKEN must be set");
    let db = Database::open(&config.database_path)
        .await
        .expect("Error opening database");
    let policy = Arc::new(
        PolicyStore::open(&config.policy_path)
            .await
            .expect("Error loading policy"),
    );

    let http = Arc::new(serenity::Http::new(&token));
    let state = Arc::new(AppState::new(
        Collaborators {
            links: Arc::new(db),
            directory: Arc::new(DiscordDirectory::new(Arc::clone(&http))),
            notifier: Arc::new(DiscordNotifier::new(Arc::clone(&http), Arc::clone(&policy))),
            prober: Arc::new(TcpProber),
        },
        policy,
        config.proxy_api_key.as_deref(),
    ));
    state.monitor.start();

    let app = create_app(
        Arc::clone(&state),
        config.request_body_limit,
        config.request_timeout,
    );
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Error binding listener");
    tracing::info!("Server listening on {}", addr);

    // Slash commands only; member and role data comes from REST lookups
    let intents = serenity::GatewayIntents::GUILDS;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![
                discord_commands::link(),
                discord_commands::unlink(),
                discord_commands::serverstatus(),
                discord_commands::access(),
                discord_commands::reload(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "Executing command '{}' by user '{}'",
                        ctx.command().name,
                        ctx.author().name
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "Finished command '{}' by user '{}'",
                        ctx.command().name,
                        ctx.author().name
                    );
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            let state = Arc::clone(&state);
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                report_incomplete_communities(&state).await;
                Ok(Data { state })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .expect("Error creating Discord client");
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("Axum server error: {}", e);
            }
        }
        result = client.start() => {
            if let Err(e) = result {
                tracing::error!("Discord client error: {:?}", e);
            }
        }
    }
}

/// Joined communities without role entries only get auto-discovery access
/// (or none), so point them out to the operator.
async fn report_incomplete_communities(state: &AppState) {
    if !state.policy.current().discovery.enabled {
        return;
    }

    match state.permissions.incomplete_communities().await {
        Ok(guilds) if guilds.is_empty() => {}
        Ok(guilds) => {
            for guild in guilds {
                tracing::warn!(
                    guild_id = guild.id,
                    name = %guild.name,
                    "community has no role mapping; add [guilds.\"{}\".roles] to the policy",
                    guild.id
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not list joined communities"),
    }
}
