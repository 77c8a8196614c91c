mod error;
mod models;

pub use error::{DbError, Result};
pub use models::LinkedAccount;

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

/// Database wrapper for all Warden link operations.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().await?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self
      .conn
      .call(|conn| -> rusqlite::Result<()> {
        // Enable WAL mode for better concurrent read/write performance
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute_batch(
          r#"
                    -- One row per link; both sides are unique
                    CREATE TABLE IF NOT EXISTS linked_accounts (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        player_id TEXT NOT NULL UNIQUE,
                        discord_id INTEGER NOT NULL UNIQUE,
                        linked_at INTEGER NOT NULL
                    );
                    "#,
        )?;
        Ok(())
      })
      .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Linked Accounts
  // ========================================================================

  /// Link a player to a Discord account.
  ///
  /// Re-linking the same player replaces its Discord account. Returns
  /// `DiscordIdConflict` if the Discord account belongs to a different player.
  /// The write happens in one transaction, so readers see either the old
  /// link or the new one.
  pub async fn link_account(
    &self,
    player_id: Uuid,
    discord_id: u64,
    now: i64,
  ) -> Result<LinkedAccount> {
    let result = self
      .conn
      .call(move |conn| -> rusqlite::Result<Result<LinkedAccount>> {
        let tx = conn.transaction()?;
        let player = player_id.to_string();

        let owner: Option<String> = tx
          .prepare_cached("SELECT player_id FROM linked_accounts WHERE discord_id = ?1")?
          .query_row(params![discord_id], |row| row.get(0))
          .optional()?;

        if owner.is_some_and(|owner| owner != player) {
          return Ok(Err(DbError::DiscordIdConflict));
        }

        tx.prepare_cached(
          "INSERT INTO linked_accounts (player_id, discord_id, linked_at) VALUES (?1, ?2, ?3)
           ON CONFLICT(player_id) DO UPDATE SET discord_id = excluded.discord_id, linked_at = excluded.linked_at",
        )?
        .execute(params![&player, discord_id, now])?;

        tx.commit()?;
        Ok(Ok(LinkedAccount {
          player_id,
          discord_id,
          linked_at: now,
        }))
      })
      .await??;

    debug!(%result.player_id, result.discord_id, "linked account");
    Ok(result)
  }

  /// Check whether a player has a linked Discord account.
  pub async fn is_linked(&self, player_id: Uuid) -> Result<bool> {
    let linked = self
      .conn
      .call(move |conn| -> rusqlite::Result<bool> {
        conn
          .prepare_cached("SELECT EXISTS(SELECT 1 FROM linked_accounts WHERE player_id = ?1)")?
          .query_row(params![player_id.to_string()], |row| row.get(0))
      })
      .await?;

    Ok(linked)
  }

  /// Get the Discord account linked to a player.
  /// Returns None if the player is not linked.
  pub async fn get_discord_id(&self, player_id: Uuid) -> Result<Option<u64>> {
    let discord_id = self
      .conn
      .call(move |conn| -> rusqlite::Result<Option<u64>> {
        conn
          .prepare_cached("SELECT discord_id FROM linked_accounts WHERE player_id = ?1")?
          .query_row(params![player_id.to_string()], |row| row.get(0))
          .optional()
      })
      .await?;

    Ok(discord_id)
  }

  /// Get the player linked to a Discord account.
  /// Returns None if the Discord account is not linked.
  pub async fn get_player_id(&self, discord_id: u64) -> Result<Option<Uuid>> {
    let player: Option<String> = self
      .conn
      .call(move |conn| -> rusqlite::Result<Option<String>> {
        conn
          .prepare_cached("SELECT player_id FROM linked_accounts WHERE discord_id = ?1")?
          .query_row(params![discord_id], |row| row.get(0))
          .optional()
      })
      .await?;

    player
      .map(|p| Uuid::parse_str(&p).map_err(|_| DbError::InvalidPlayerId(p)))
      .transpose()
  }

  /// Get the full link record for a player.
  pub async fn get_link(&self, player_id: Uuid) -> Result<Option<LinkedAccount>> {
    let link = self
      .conn
      .call(move |conn| -> rusqlite::Result<Option<(u64, i64)>> {
        conn
          .prepare_cached("SELECT discord_id, linked_at FROM linked_accounts WHERE player_id = ?1")?
          .query_row(params![player_id.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })
          .optional()
      })
      .await?;

    Ok(link.map(|(discord_id, linked_at)| LinkedAccount {
      player_id,
      discord_id,
      linked_at,
    }))
  }

  /// Remove a player's link. Returns false if the player was not linked.
  pub async fn unlink_account(&self, player_id: Uuid) -> Result<bool> {
    let deleted = self
      .conn
      .call(move |conn| -> rusqlite::Result<usize> {
        conn
          .prepare_cached("DELETE FROM linked_accounts WHERE player_id = ?1")?
          .execute(params![player_id.to_string()])
      })
      .await?;

    debug!(%player_id, deleted, "unlinked account");
    Ok(deleted > 0)
  }

  /// Number of stored links.
  pub async fn count_links(&self) -> Result<u64> {
    let count = self
      .conn
      .call(|conn| -> rusqlite::Result<u64> {
        conn
          .prepare_cached("SELECT COUNT(*) FROM linked_accounts")?
          .query_row([], |row| row.get(0))
      })
      .await?;

    Ok(count)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn now() -> i64 {
    1700000000 // Fixed timestamp for testing
  }

  fn steve() -> Uuid {
    Uuid::parse_str("069a79f4-44e9-4726-a5be-fca90e38aaf5").unwrap()
  }

  fn alex() -> Uuid {
    Uuid::parse_str("ec561538-f3fd-461d-aff5-086b22154bce").unwrap()
  }

  #[tokio::test]
  async fn test_link_lifecycle() {
    let db = Database::open_in_memory().await.unwrap();

    assert!(!db.is_linked(steve()).await.unwrap());
    assert!(db.get_discord_id(steve()).await.unwrap().is_none());

    let link = db.link_account(steve(), 1111, now()).await.unwrap();
    assert_eq!(link.player_id, steve());
    assert_eq!(link.discord_id, 1111);

    assert!(db.is_linked(steve()).await.unwrap());
    assert_eq!(db.get_discord_id(steve()).await.unwrap(), Some(1111));
    assert_eq!(db.get_player_id(1111).await.unwrap(), Some(steve()));

    let stored = db.get_link(steve()).await.unwrap().unwrap();
    assert_eq!(stored.linked_at, now());

    // Unlink it
    assert!(db.unlink_account(steve()).await.unwrap());
    assert!(!db.is_linked(steve()).await.unwrap());
    assert!(db.get_player_id(1111).await.unwrap().is_none());

    // Second unlink finds nothing
    assert!(!db.unlink_account(steve()).await.unwrap());
  }

  #[tokio::test]
  async fn test_relink_replaces_discord_account() {
    let db = Database::open_in_memory().await.unwrap();

    db.link_account(steve(), 1111, now()).await.unwrap();
    db.link_account(steve(), 2222, now() + 60).await.unwrap();

    assert_eq!(db.get_discord_id(steve()).await.unwrap(), Some(2222));
    assert!(db.get_player_id(1111).await.unwrap().is_none());
    assert_eq!(db.count_links().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_discord_id_conflict() {
    let db = Database::open_in_memory().await.unwrap();

    db.link_account(steve(), 1111, now()).await.unwrap();

    // Same Discord account, different player
    let result = db.link_account(alex(), 1111, now()).await;
    assert!(matches!(result, Err(DbError::DiscordIdConflict)));

    // The existing link is untouched
    assert_eq!(db.get_player_id(1111).await.unwrap(), Some(steve()));
    assert!(!db.is_linked(alex()).await.unwrap());
  }

  #[tokio::test]
  async fn test_relinking_same_pair_is_idempotent() {
    let db = Database::open_in_memory().await.unwrap();

    db.link_account(steve(), 1111, now()).await.unwrap();
    db.link_account(steve(), 1111, now()).await.unwrap();

    assert_eq!(db.count_links().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_count_links() {
    let db = Database::open_in_memory().await.unwrap();

    db.link_account(steve(), 1111, now()).await.unwrap();
    db.link_account(alex(), 2222, now()).await.unwrap();

    assert_eq!(db.count_links().await.unwrap(), 2);
  }
}
