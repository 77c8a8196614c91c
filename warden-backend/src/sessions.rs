use arrayvec::ArrayString;
use scc::HashMap;
use scc::hash_map::Entry;
use std::collections::BTreeSet;
use uuid::Uuid;

pub type PlayerName = ArrayString<16>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub player_id: Uuid,
    pub name: PlayerName,
    pub joined_at: i64,
}

#[derive(Default)]
struct ServerSessions {
    players: Vec<SessionEntry>,
}

/// A session reported by the proxy during a full resync.
#[derive(Debug, Clone)]
pub struct ReportedSession {
    pub player_id: Uuid,
    pub player_name: String,
    pub server: String,
}

/// In-memory view of which player is connected to which backend server.
///
/// Fed by the proxy; a player is on at most one server at a time.
pub struct SessionCache {
    servers: HashMap<String, ServerSessions>,
    players: HashMap<Uuid, String>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
            players: HashMap::new(),
        }
    }

    /// Record a player arriving on `server`. Returns the server they were
    /// on before, if any.
    pub async fn join(
        &self,
        player_id: Uuid,
        player: &str,
        server: &str,
        now: i64,
    ) -> Result<Option<String>, SessionError> {
        let name = PlayerName::try_from(player).map_err(|_| SessionError::PlayerNameTooLong)?;

        let previous = match self.players.entry_async(player_id).await {
            Entry::Occupied(mut entry) => Some(std::mem::replace(entry.get_mut(), server.to_string())),
            Entry::Vacant(entry) => {
                entry.insert_entry(server.to_string());
                None
            }
        };

        if let Some(previous) = previous.as_deref() {
            if previous != server {
                self.remove_from(previous, player_id).await;
            }
        }

        let mut entry = self
            .servers
            .entry_async(server.to_string())
            .await
            .or_insert_with(ServerSessions::default);
        let sessions = entry.get_mut();
        // Don't add duplicates
        if !sessions.players.iter().any(|p| p.player_id == player_id) {
            sessions.players.push(SessionEntry {
                player_id,
                name,
                joined_at: now,
            });
        }

        Ok(previous)
    }

    /// Record a player leaving the proxy. Returns the server they were on.
    pub async fn leave(&self, player_id: Uuid) -> Option<String> {
        let (_, server) = self.players.remove_async(&player_id).await?;
        self.remove_from(&server, player_id).await;
        Some(server)
    }

    /// Replace every session with the proxy's full list.
    pub async fn sync(&self, sessions: &[ReportedSession], now: i64) {
        self.servers.clear_async().await;
        self.players.clear_async().await;

        for session in sessions {
            // Invalid names were rejected upstream; skip anything that slips through
            let _ = self
                .join(session.player_id, &session.player_name, &session.server, now)
                .await;
        }
    }

    pub async fn server_of(&self, player_id: Uuid) -> Option<String> {
        self.players
            .read_async(&player_id, |_, server| server.clone())
            .await
    }

    /// Get a copy of the players on a server.
    pub async fn players_on(&self, server: &str) -> Vec<SessionEntry> {
        self.servers
            .read_async(server, |_, sessions| sessions.players.clone())
            .await
            .unwrap_or_default()
    }

    /// Servers with at least one connected player.
    pub async fn occupied_servers(&self) -> BTreeSet<String> {
        let mut occupied = BTreeSet::new();
        self.servers
            .retain_async(|server, sessions| {
                if !sessions.players.is_empty() {
                    occupied.insert(server.clone());
                }
                true
            })
            .await;
        occupied
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Uses swap_remove for O(1); drops the server entry once empty.
    async fn remove_from(&self, server: &str, player_id: Uuid) {
        self.servers
            .update_async(server, |_, sessions| {
                if let Some(idx) = sessions.players.iter().position(|p| p.player_id == player_id) {
                    sessions.players.swap_remove(idx);
                }
            })
            .await;
        let _ = self
            .servers
            .remove_if_async(server, |sessions| sessions.players.is_empty())
            .await;
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("player name exceeds 16 characters")]
    PlayerNameTooLong,
}
