//! Role to server authorization.
//!
//! Two strategies, chosen per community: the configured role mapping when
//! the community has any role entries, the auto-discovery heuristic otherwise.

use crate::directory::MemberRole;
use crate::policy::{CommunityConfig, DiscoveryPolicy, RoleGrant};
use std::collections::BTreeMap;

/// How a community's members are authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverMode {
    Configured,
    AutoDiscovery,
}

impl ResolverMode {
    /// Auto-discovery only applies to communities without any role entries,
    /// and only while discovery is enabled. An explicit mapping always wins.
    pub fn for_community(community: Option<&CommunityConfig>, discovery: &DiscoveryPolicy) -> Self {
        let has_entries = community.is_some_and(CommunityConfig::has_role_entries);
        if discovery.enabled && !has_entries {
            ResolverMode::AutoDiscovery
        } else {
            ResolverMode::Configured
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResolverMode::Configured => "configured",
            ResolverMode::AutoDiscovery => "auto-discovery",
        }
    }
}

/// Configured mode: true if any held role explicitly grants `server`.
pub fn configured_grants(
    mapping: &BTreeMap<u64, RoleGrant>,
    held: &[MemberRole],
    server: &str,
) -> bool {
    held.iter()
        .filter_map(|role| mapping.get(&role.id))
        .any(|grant| grant.grants(server))
}

/// Auto-discovery mode: at least one role, and either a basic server or an
/// admin-like role name.
pub fn auto_grants(discovery: &DiscoveryPolicy, held: &[MemberRole], server: &str) -> bool {
    if held.is_empty() {
        return false;
    }

    if discovery.basic_servers.iter().any(|s| s == server) {
        return true;
    }

    held.iter().any(|role| {
        let name = role.name.to_lowercase();
        discovery
            .admin_keywords
            .iter()
            .any(|keyword| name.contains(keyword.as_str()))
    })
}

/// Evaluate `server` for one community's member.
pub fn resolve(
    community: Option<&CommunityConfig>,
    discovery: &DiscoveryPolicy,
    held: &[MemberRole],
    server: &str,
) -> bool {
    match ResolverMode::for_community(community, discovery) {
        ResolverMode::AutoDiscovery => auto_grants(discovery, held, server),
        ResolverMode::Configured => community
            .map(|c| configured_grants(&c.roles, held, server))
            .unwrap_or(false),
    }
}
