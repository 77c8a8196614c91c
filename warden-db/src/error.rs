use thiserror::Error;
use tokio_rusqlite::rusqlite;

#[derive(Debug, Error)]
pub enum DbError {
  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("database connection error: {0}")]
  Connection(#[from] tokio_rusqlite::Error),

  #[error("discord account is already linked to another player")]
  DiscordIdConflict,

  #[error("stored player id is not a valid uuid: {0}")]
  InvalidPlayerId(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
