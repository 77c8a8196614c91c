mod common;

use common::*;
use std::sync::Arc;
use warden_backend::permission::{PermissionError, PermissionGate};
use warden_backend::roles::ResolverMode;

const MAIN: u64 = 1000;
const SECOND: u64 = 2000;
const STEVE_DISCORD: u64 = 42;

const TWO_GUILDS: &str = r#"
    [servers.survival]
    address = "127.0.0.1:25566"

    [servers.creative]
    address = "127.0.0.1:25567"

    [guilds."1000"]
    name = "Main"
    [guilds."1000".roles."10"]
    server_access = { survival = false, creative = false }

    [guilds."2000"]
    name = "Second"
    [guilds."2000".roles."20"]
    server_access = { survival = true, creative = false }
"#;

fn gate(
    links: impl warden_backend::links::LinkStore + 'static,
    directory: FakeDirectory,
    toml: &str,
) -> (PermissionGate, Arc<FakeDirectory>) {
    let directory = Arc::new(directory);
    let gate = PermissionGate::new(Arc::new(links), directory.clone(), policy(toml));
    (gate, directory)
}

fn linked_steve() -> MemoryLinks {
    MemoryLinks::with(&[(steve(), STEVE_DISCORD)])
}

// =============================================================================
// LINK REQUIREMENT
// =============================================================================

#[tokio::test]
async fn test_unlinked_player_has_no_access() {
    // GIVEN: A player who never linked, even though a matching member exists
    let directory = FakeDirectory::new().with_member(SECOND, STEVE_DISCORD, vec![role(20, "Member")]);
    let (gate, directory) = gate(MemoryLinks::default(), directory, TWO_GUILDS);

    // WHEN/THEN: Every server is denied without touching Discord
    assert!(!gate.can_access(steve(), "survival").await);
    assert!(!gate.can_access(steve(), "creative").await);
    assert!(directory.lookups().is_empty());
}

// =============================================================================
// CONFIGURED MODE
// =============================================================================

#[tokio::test]
async fn test_role_mapping_is_per_server() {
    // GIVEN: Role 20 maps to { survival: true, creative: false }
    let directory = FakeDirectory::new().with_member(SECOND, STEVE_DISCORD, vec![role(20, "Member")]);
    let (gate, _) = gate(linked_steve(), directory, TWO_GUILDS);

    // THEN: Only survival is granted
    assert!(gate.can_access(steve(), "survival").await);
    assert!(!gate.can_access(steve(), "creative").await);
    assert!(!gate.can_access(steve(), "unknown").await);
}

#[tokio::test]
async fn test_second_community_can_grant() {
    // GIVEN: A member of both communities; the first denies, the second grants
    let directory = FakeDirectory::new()
        .with_member(MAIN, STEVE_DISCORD, vec![role(10, "Guest")])
        .with_member(SECOND, STEVE_DISCORD, vec![role(20, "Member")]);
    let (gate, directory) = gate(linked_steve(), directory, TWO_GUILDS);

    // WHEN: Checking survival
    let granted = gate.can_access(steve(), "survival").await;

    // THEN: Access is granted after consulting both, in id order
    assert!(granted);
    assert_eq!(directory.lookups(), vec![MAIN, SECOND]);
}

#[tokio::test]
async fn test_first_grant_short_circuits() {
    let toml = r#"
        [guilds."1000".roles."10"]
        server_access = { survival = true }
        [guilds."2000".roles."20"]
        server_access = { survival = true }
    "#;
    let directory = FakeDirectory::new()
        .with_member(MAIN, STEVE_DISCORD, vec![role(10, "a")])
        .with_member(SECOND, STEVE_DISCORD, vec![role(20, "b")]);
    let (gate, directory) = gate(linked_steve(), directory, toml);

    assert!(gate.can_access(steve(), "survival").await);
    assert_eq!(directory.lookups(), vec![MAIN]);
}

#[tokio::test]
async fn test_disabled_community_is_not_consulted() {
    let toml = r#"
        [guilds."1000"]
        enabled = false
        [guilds."1000".roles."10"]
        server_access = { survival = true }
    "#;
    let directory = FakeDirectory::new().with_member(MAIN, STEVE_DISCORD, vec![role(10, "a")]);
    let (gate, directory) = gate(linked_steve(), directory, toml);

    assert!(!gate.can_access(steve(), "survival").await);
    assert!(directory.lookups().is_empty());
}

#[tokio::test]
async fn test_lookup_failure_moves_on_to_next_community() {
    // GIVEN: The first community's member lookup errors out
    let directory = FakeDirectory::new()
        .failing(MAIN)
        .with_member(SECOND, STEVE_DISCORD, vec![role(20, "Member")]);
    let (gate, _) = gate(linked_steve(), directory, TWO_GUILDS);

    // THEN: The failure is a non-match, not a denial
    assert!(gate.can_access(steve(), "survival").await);
}

#[tokio::test]
async fn test_not_a_member_anywhere() {
    let (gate, directory) = gate(linked_steve(), FakeDirectory::new(), TWO_GUILDS);

    assert!(!gate.can_access(steve(), "survival").await);
    assert_eq!(directory.lookups(), vec![MAIN, SECOND]);
}

// =============================================================================
// AUTO-DISCOVERY MODE
// =============================================================================

#[tokio::test]
async fn test_auto_discovery_uses_joined_communities() {
    // GIVEN: No configured communities; the bot is in one guild
    let directory = FakeDirectory::new()
        .with_joined(MAIN, "Main")
        .with_member(MAIN, STEVE_DISCORD, vec![role(1, "Member")]);
    let (gate, _) = gate(linked_steve(), directory, "");

    // THEN: Basic servers only
    assert!(gate.can_access(steve(), "lobby").await);
    assert!(gate.can_access(steve(), "seikatsu").await);
    assert!(!gate.can_access(steve(), "survival").await);
}

#[tokio::test]
async fn test_auto_discovery_member_without_roles_is_denied() {
    let directory = FakeDirectory::new()
        .with_joined(MAIN, "Main")
        .with_member(MAIN, STEVE_DISCORD, vec![]);
    let (gate, _) = gate(linked_steve(), directory, "");

    assert!(!gate.can_access(steve(), "lobby").await);
    assert!(!gate.can_access(steve(), "survival").await);
}

#[tokio::test]
async fn test_auto_discovery_admin_role_gets_everything() {
    let directory = FakeDirectory::new()
        .with_joined(MAIN, "Main")
        .with_member(MAIN, STEVE_DISCORD, vec![role(1, "Server ADMIN")]);
    let (gate, _) = gate(linked_steve(), directory, "");

    assert!(gate.can_access(steve(), "lobby").await);
    assert!(gate.can_access(steve(), "survival").await);
    assert!(gate.can_access(steve(), "anything-else").await);
}

#[tokio::test]
async fn test_configured_communities_disable_joined_list() {
    // GIVEN: One configured community, and the bot also sits in another
    let toml = r#"
        [guilds."1000".roles."10"]
        server_access = { survival = true }
    "#;
    let directory = FakeDirectory::new()
        .with_joined(SECOND, "Other")
        .with_member(SECOND, STEVE_DISCORD, vec![role(99, "Admin")]);
    let (gate, directory) = gate(linked_steve(), directory, toml);

    // THEN: Only the configured community is a candidate
    assert!(!gate.can_access(steve(), "survival").await);
    assert_eq!(directory.lookups(), vec![MAIN]);
}

#[tokio::test]
async fn test_configured_community_without_roles_uses_auto_mode() {
    let toml = r#"
        [guilds."1000"]
        name = "Fresh"
    "#;
    let directory = FakeDirectory::new().with_member(MAIN, STEVE_DISCORD, vec![role(1, "Moderator")]);
    let (gate, _) = gate(linked_steve(), directory, toml);

    assert!(gate.can_access(steve(), "survival").await);
}

// =============================================================================
// FAIL CLOSED
// =============================================================================

#[tokio::test]
async fn test_store_failure_denies() {
    let directory = FakeDirectory::new().with_member(SECOND, STEVE_DISCORD, vec![role(20, "Member")]);
    let (gate, _) = gate(FailingLinks, directory, TWO_GUILDS);

    assert!(!gate.can_access(steve(), "survival").await);
    assert!(matches!(
        gate.evaluate(steve(), "survival").await,
        Err(PermissionError::Store(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_store_is_bounded() {
    let (gate, _) = gate(HangingLinks, FakeDirectory::new(), TWO_GUILDS);

    assert!(matches!(
        gate.evaluate(steve(), "survival").await,
        Err(PermissionError::StoreTimeout(_))
    ));
    assert!(!gate.can_access(steve(), "survival").await);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_member_lookup_is_skipped() {
    // GIVEN: The first community never answers
    let directory = FakeDirectory::new()
        .hanging(MAIN)
        .with_member(SECOND, STEVE_DISCORD, vec![role(20, "Member")]);
    let (gate, _) = gate(linked_steve(), directory, TWO_GUILDS);

    // THEN: It times out and the second community still grants
    assert!(gate.can_access(steve(), "survival").await);
}

#[tokio::test]
async fn test_joined_list_failure_denies() {
    let directory = FakeDirectory::new()
        .joined_list_fails()
        .with_member(MAIN, STEVE_DISCORD, vec![role(1, "Admin")]);
    let (gate, _) = gate(linked_steve(), directory, "");

    assert!(!gate.can_access(steve(), "lobby").await);
    assert!(matches!(
        gate.evaluate(steve(), "lobby").await,
        Err(PermissionError::Directory(_))
    ));
}

// =============================================================================
// INSPECTION
// =============================================================================

#[tokio::test]
async fn test_inspect_reports_every_community() {
    let directory = FakeDirectory::new()
        .failing(MAIN)
        .with_member(SECOND, STEVE_DISCORD, vec![role(20, "Member")]);
    let (gate, _) = gate(linked_steve(), directory, TWO_GUILDS);

    let report = gate.inspect(steve()).await.unwrap();

    assert_eq!(report.discord_id, Some(STEVE_DISCORD));
    assert!(!report.joined_guilds_mode);
    assert_eq!(report.communities.len(), 2);

    let main = &report.communities[0];
    assert_eq!(main.name.as_deref(), Some("Main"));
    assert_eq!(main.mode, ResolverMode::Configured);
    assert!(main.lookup_error.is_some());
    assert!(main.grants.iter().all(|(_, granted)| !granted));

    let second = &report.communities[1];
    assert!(second.member.is_some());
    assert_eq!(
        second.grants,
        vec![("creative".to_string(), false), ("survival".to_string(), true)]
    );
}

#[tokio::test]
async fn test_inspect_unlinked_player() {
    let (gate, _) = gate(MemoryLinks::default(), FakeDirectory::new(), TWO_GUILDS);

    let report = gate.inspect(steve()).await.unwrap();
    assert_eq!(report.discord_id, None);
    assert!(report.communities.is_empty());
}

#[tokio::test]
async fn test_incomplete_communities() {
    let toml = r#"
        [guilds."1000".roles."10"]
        server_access = { survival = true }
        [guilds."2000"]
        name = "No roles yet"
    "#;
    let directory = FakeDirectory::new()
        .with_joined(MAIN, "Main")
        .with_joined(SECOND, "Second")
        .with_joined(3000, "Unknown");
    let (gate, _) = gate(linked_steve(), directory, toml);

    let ids: Vec<u64> = gate
        .incomplete_communities()
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.id)
        .collect();
    assert_eq!(ids, vec![SECOND, 3000]);
}
