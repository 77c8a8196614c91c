use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info};
use uuid::Uuid;
use warden_db::DbError;

use crate::codes::{CodeError, CodeRegistry};
use crate::links::LinkStore;
use crate::permission::{PermissionError, PermissionGate};
use crate::policy::{Policy, PolicyStore};

const SERVER_ERROR_MESSAGE: &str =
    "A server error occurred while checking your access.\nPlease try again in a moment.";

const LINK_REQUIRED_MESSAGE: &str = "Discord account link required\n\n\
     Link your Minecraft account with /link in Discord, then reconnect.";

#[derive(Debug, Error)]
pub enum GateError {
    #[error("link store error: {0}")]
    Store(#[from] DbError),

    #[error("link store timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error(transparent)]
    Code(#[from] CodeError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("connection decision timed out after {0:?}")]
    DecisionTimeout(Duration),
}

/// One attempt to connect to a backend server, as reported by the proxy.
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    pub player_id: Uuid,
    pub player_name: String,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// No linked Discord account. Carries a fresh code only when the link
    /// requirement itself turned the player away.
    NotLinked { code: Option<String> },
    /// Linked, but no community grants the target server.
    Unauthorized { server: String },
    ServerError,
}

impl Denial {
    pub fn reason(&self) -> DenialReason {
        match self {
            Denial::NotLinked { .. } => DenialReason::NotLinked,
            Denial::Unauthorized { .. } => DenialReason::Unauthorized,
            Denial::ServerError => DenialReason::ServerError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NotLinked,
    Unauthorized,
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny { denial: Denial, message: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            GateDecision::Allow => None,
            GateDecision::Deny { denial, .. } => Some(denial),
        }
    }

    /// Player-facing disconnect text; `None` when allowed.
    pub fn message(&self) -> Option<&str> {
        match self {
            GateDecision::Allow => None,
            GateDecision::Deny { message, .. } => Some(message),
        }
    }

    fn server_error() -> Self {
        GateDecision::Deny {
            denial: Denial::ServerError,
            message: SERVER_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Policy point for every backend connection attempt.
///
/// Gate 1 denies unlinked players (and hands them a code) when linking is
/// required. Gate 2 then always asks the [`PermissionGate`]. Errors and
/// decisions that outlast `lookup.decision_timeout` deny.
pub struct ConnectionGate {
    links: Arc<dyn LinkStore>,
    codes: CodeRegistry,
    permissions: Arc<PermissionGate>,
    policy: Arc<PolicyStore>,
}

impl ConnectionGate {
    pub fn new(
        links: Arc<dyn LinkStore>,
        codes: CodeRegistry,
        permissions: Arc<PermissionGate>,
        policy: Arc<PolicyStore>,
    ) -> Self {
        Self {
            links,
            codes,
            permissions,
            policy,
        }
    }

    pub async fn check(&self, attempt: &ConnectionAttempt) -> GateDecision {
        let limit = self.policy.current().lookup.decision_timeout;
        let decision = timeout(limit, self.decide(attempt))
            .await
            .unwrap_or_else(|_| Err(GateError::DecisionTimeout(limit)));

        match decision {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    player = %attempt.player_name,
                    player_id = %attempt.player_id,
                    server = %attempt.server,
                    error = %e,
                    "connection check failed, denying"
                );
                GateDecision::server_error()
            }
        }
    }

    async fn decide(&self, attempt: &ConnectionAttempt) -> Result<GateDecision, GateError> {
        let policy = self.policy.current();

        // Gate 1: link requirement
        if policy.linking.enabled
            && policy.linking.required
            && !self.is_linked(&policy, attempt.player_id).await?
        {
            return self.issue_code(&policy, attempt).await;
        }

        // Gate 2: authorization
        if self
            .permissions
            .evaluate(attempt.player_id, &attempt.server)
            .await?
        {
            info!(
                player = %attempt.player_name,
                server = %attempt.server,
                "connection allowed"
            );
            return Ok(GateDecision::Allow);
        }

        if !self.is_linked(&policy, attempt.player_id).await? {
            info!(
                player = %attempt.player_name,
                player_id = %attempt.player_id,
                server = %attempt.server,
                "connection denied: account not linked"
            );
            return Ok(GateDecision::Deny {
                denial: Denial::NotLinked { code: None },
                message: LINK_REQUIRED_MESSAGE.to_string(),
            });
        }

        let display = policy.display_name(&attempt.server).to_string();
        info!(
            player = %attempt.player_name,
            server = %attempt.server,
            "connection denied: insufficient role permission"
        );
        Ok(GateDecision::Deny {
            message: format!(
                "Insufficient permission\n\n\
                 You do not have access to the {display} server.\n\
                 Ask an administrator about the required Discord role."
            ),
            denial: Denial::Unauthorized { server: display },
        })
    }

    async fn is_linked(&self, policy: &Policy, player_id: Uuid) -> Result<bool, GateError> {
        let limit = policy.lookup.store_timeout;
        match timeout(limit, self.links.is_linked(player_id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GateError::StoreTimeout(limit)),
        }
    }

    /// The only place a connection attempt issues a code.
    async fn issue_code(
        &self,
        policy: &Policy,
        attempt: &ConnectionAttempt,
    ) -> Result<GateDecision, GateError> {
        let code = self.codes.issue(attempt.player_id).await?;
        info!(
            player = %attempt.player_name,
            player_id = %attempt.player_id,
            server = %attempt.server,
            "connection denied: account not linked"
        );
        Ok(GateDecision::Deny {
            message: policy.denial_text(&code),
            denial: Denial::NotLinked { code: Some(code) },
        })
    }
}
