//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;
use warden_backend::codes::{CodeGenerator, CodeRegistry};
use warden_backend::directory::{DirectoryError, GuildMember, JoinedGuild, MemberDirectory, MemberRole};
use warden_backend::links::LinkStore;
use warden_backend::monitor::Prober;
use warden_backend::notify::{LinkFailure, Notifier, NotifyError, PlayerAction};
use warden_backend::policy::{Policy, PolicyStore};
use warden_backend::{AppState, Collaborators};
use warden_db::{DbError, LinkedAccount};

pub fn steve() -> Uuid {
    Uuid::parse_str("069a79f4-44e9-4726-a5be-fca90e38aaf5").unwrap()
}

pub fn alex() -> Uuid {
    Uuid::parse_str("ec561538-f3fd-461d-aff5-086b22154bce").unwrap()
}

pub fn policy(toml: &str) -> Arc<PolicyStore> {
    Arc::new(PolicyStore::new(Policy::from_toml_str(toml).unwrap()))
}

/// Always hands out the same code.
pub fn fixed_codes(code: &str, ttl: Duration) -> CodeRegistry {
    let code = code.to_string();
    let generator: CodeGenerator = Arc::new(move || code.clone());
    CodeRegistry::with_generator(ttl, generator)
}

pub fn role(id: u64, name: &str) -> MemberRole {
    MemberRole {
        id,
        name: name.to_string(),
    }
}

// ============================================================================
// Link store
// ============================================================================

#[derive(Default)]
pub struct MemoryLinks {
    links: Mutex<HashMap<Uuid, u64>>,
}

impl MemoryLinks {
    pub fn with(links: &[(Uuid, u64)]) -> Self {
        Self {
            links: Mutex::new(links.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl LinkStore for MemoryLinks {
    async fn link(&self, player_id: Uuid, discord_id: u64, now: i64) -> Result<LinkedAccount, DbError> {
        let mut links = self.links.lock().unwrap();
        if links
            .iter()
            .any(|(player, discord)| *discord == discord_id && *player != player_id)
        {
            return Err(DbError::DiscordIdConflict);
        }
        links.insert(player_id, discord_id);
        Ok(LinkedAccount {
            player_id,
            discord_id,
            linked_at: now,
        })
    }

    async fn is_linked(&self, player_id: Uuid) -> Result<bool, DbError> {
        Ok(self.links.lock().unwrap().contains_key(&player_id))
    }

    async fn discord_id(&self, player_id: Uuid) -> Result<Option<u64>, DbError> {
        Ok(self.links.lock().unwrap().get(&player_id).copied())
    }

    async fn player_id(&self, discord_id: u64) -> Result<Option<Uuid>, DbError> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .find(|(_, d)| **d == discord_id)
            .map(|(p, _)| *p))
    }

    async fn unlink(&self, player_id: Uuid) -> Result<bool, DbError> {
        Ok(self.links.lock().unwrap().remove(&player_id).is_some())
    }
}

/// Every call fails like a broken database.
pub struct FailingLinks;

fn broken() -> DbError {
    DbError::InvalidPlayerId("corrupt".to_string())
}

#[async_trait]
impl LinkStore for FailingLinks {
    async fn link(&self, _: Uuid, _: u64, _: i64) -> Result<LinkedAccount, DbError> {
        Err(broken())
    }
    async fn is_linked(&self, _: Uuid) -> Result<bool, DbError> {
        Err(broken())
    }
    async fn discord_id(&self, _: Uuid) -> Result<Option<u64>, DbError> {
        Err(broken())
    }
    async fn player_id(&self, _: u64) -> Result<Option<Uuid>, DbError> {
        Err(broken())
    }
    async fn unlink(&self, _: Uuid) -> Result<bool, DbError> {
        Err(broken())
    }
}

/// Every call blocks forever.
pub struct HangingLinks;

#[async_trait]
impl LinkStore for HangingLinks {
    async fn link(&self, _: Uuid, _: u64, _: i64) -> Result<LinkedAccount, DbError> {
        std::future::pending().await
    }
    async fn is_linked(&self, _: Uuid) -> Result<bool, DbError> {
        std::future::pending().await
    }
    async fn discord_id(&self, _: Uuid) -> Result<Option<u64>, DbError> {
        std::future::pending().await
    }
    async fn player_id(&self, _: u64) -> Result<Option<Uuid>, DbError> {
        std::future::pending().await
    }
    async fn unlink(&self, _: Uuid) -> Result<bool, DbError> {
        std::future::pending().await
    }
}

// ============================================================================
// Member directory
// ============================================================================

#[derive(Default)]
pub struct FakeDirectory {
    members: Mutex<HashMap<(u64, u64), GuildMember>>,
    joined: Mutex<Vec<JoinedGuild>>,
    failing: Mutex<HashSet<u64>>,
    hanging: Mutex<HashSet<u64>>,
    joined_fails: Mutex<bool>,
    lookups: Mutex<Vec<u64>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(self, guild_id: u64, user_id: u64, roles: Vec<MemberRole>) -> Self {
        self.members.lock().unwrap().insert(
            (guild_id, user_id),
            GuildMember {
                user_id,
                display_name: format!("user-{user_id}"),
                roles,
            },
        );
        self
    }

    pub fn with_joined(self, guild_id: u64, name: &str) -> Self {
        self.joined.lock().unwrap().push(JoinedGuild {
            id: guild_id,
            name: name.to_string(),
        });
        self
    }

    pub fn failing(self, guild_id: u64) -> Self {
        self.failing.lock().unwrap().insert(guild_id);
        self
    }

    pub fn hanging(self, guild_id: u64) -> Self {
        self.hanging.lock().unwrap().insert(guild_id);
        self
    }

    pub fn joined_list_fails(self) -> Self {
        *self.joined_fails.lock().unwrap() = true;
        self
    }

    /// Guilds looked up so far, in order.
    pub fn lookups(&self) -> Vec<u64> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl MemberDirectory for FakeDirectory {
    async fn member(&self, guild_id: u64, user_id: u64) -> Result<Option<GuildMember>, DirectoryError> {
        self.lookups.lock().unwrap().push(guild_id);
        if self.hanging.lock().unwrap().contains(&guild_id) {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().unwrap().contains(&guild_id) {
            return Err(DirectoryError::Api("500 Internal Server Error".to_string()));
        }
        Ok(self.members.lock().unwrap().get(&(guild_id, user_id)).cloned())
    }

    async fn joined_guilds(&self) -> Result<Vec<JoinedGuild>, DirectoryError> {
        if *self.joined_fails.lock().unwrap() {
            return Err(DirectoryError::Api("gateway unavailable".to_string()));
        }
        Ok(self.joined.lock().unwrap().clone())
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Linked(Uuid, u64),
    LinkFailed(u64, LinkFailure),
    Player(String, PlayerAction),
    Status(String, bool),
}

pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<Recorded>,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Recorded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn record(&self, event: Recorded) -> Result<(), NotifyError> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn link_succeeded(&self, player_id: Uuid, discord_id: u64) -> Result<(), NotifyError> {
        self.record(Recorded::Linked(player_id, discord_id))
    }

    async fn link_failed(&self, discord_id: u64, reason: LinkFailure) -> Result<(), NotifyError> {
        self.record(Recorded::LinkFailed(discord_id, reason))
    }

    async fn player_action(&self, player_name: &str, action: &PlayerAction) -> Result<(), NotifyError> {
        self.record(Recorded::Player(player_name.to_string(), action.clone()))
    }

    async fn server_status_changed(
        &self,
        server: &str,
        _display_name: &str,
        reachable: bool,
    ) -> Result<(), NotifyError> {
        self.record(Recorded::Status(server.to_string(), reachable))
    }
}

/// Let spawned notification tasks run, then take everything recorded.
pub async fn drain(rx: &mut mpsc::UnboundedReceiver<Recorded>) -> Vec<Recorded> {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Prober
// ============================================================================

#[derive(Default)]
pub struct ScriptedProber {
    reachable: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
    count: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, reachable: bool) {
        let mut set = self.reachable.lock().unwrap();
        if reachable {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    pub fn hang(&self, address: &str) {
        self.hanging.lock().unwrap().insert(address.to_string());
    }

    /// Every probe takes this long before answering.
    pub fn slow(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: &str, _limit: Duration) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(address.to_string());
        if self.hanging.lock().unwrap().contains(address) {
            std::future::pending::<()>().await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.reachable.lock().unwrap().contains(address)
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub state: Arc<AppState>,
    pub events: mpsc::UnboundedReceiver<Recorded>,
    pub prober: Arc<ScriptedProber>,
}

pub fn harness(
    links: Arc<dyn LinkStore>,
    directory: Arc<dyn MemberDirectory>,
    policy: Arc<PolicyStore>,
    codes: CodeRegistry,
    proxy_api_key: Option<&str>,
) -> Harness {
    let (notifier, events) = RecordingNotifier::new();
    let prober = Arc::new(ScriptedProber::new());
    let state = Arc::new(AppState::with_codes(
        Collaborators {
            links,
            directory,
            notifier: Arc::new(notifier),
            prober: prober.clone(),
        },
        policy,
        proxy_api_key,
        codes,
    ));
    Harness {
        state,
        events,
        prober,
    }
}
