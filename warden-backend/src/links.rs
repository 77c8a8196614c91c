use async_trait::async_trait;
use uuid::Uuid;
use warden_db::{Database, DbError, LinkedAccount};

/// Persistent player <-> Discord account links.
///
/// "No link" is an empty result; `Err` is reserved for storage failures.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn link(&self, player_id: Uuid, discord_id: u64, now: i64) -> Result<LinkedAccount, DbError>;
    async fn is_linked(&self, player_id: Uuid) -> Result<bool, DbError>;
    async fn discord_id(&self, player_id: Uuid) -> Result<Option<u64>, DbError>;
    async fn player_id(&self, discord_id: u64) -> Result<Option<Uuid>, DbError>;
    async fn unlink(&self, player_id: Uuid) -> Result<bool, DbError>;
}

#[async_trait]
impl LinkStore for Database {
    async fn link(&self, player_id: Uuid, discord_id: u64, now: i64) -> Result<LinkedAccount, DbError> {
        self.link_account(player_id, discord_id, now).await
    }

    async fn is_linked(&self, player_id: Uuid) -> Result<bool, DbError> {
        Database::is_linked(self, player_id).await
    }

    async fn discord_id(&self, player_id: Uuid) -> Result<Option<u64>, DbError> {
        self.get_discord_id(player_id).await
    }

    async fn player_id(&self, discord_id: u64) -> Result<Option<Uuid>, DbError> {
        self.get_player_id(discord_id).await
    }

    async fn unlink(&self, player_id: Uuid) -> Result<bool, DbError> {
        self.unlink_account(player_id).await
    }
}
