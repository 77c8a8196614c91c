use uuid::Uuid;

/// A durable association between a Minecraft player and a Discord account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedAccount {
  /// Minecraft player UUID (unique)
  pub player_id: Uuid,
  /// Discord user snowflake (unique)
  pub discord_id: u64,
  /// Unix timestamp when the link was written
  pub linked_at: i64,
}
