pub mod codes;
pub mod config;
pub mod directory;
mod error;
pub mod events;
pub mod gate;
pub mod helpers;
pub mod links;
pub mod monitor;
pub mod notify;
pub mod permission;
pub mod policy;
pub mod roles;
mod routes;
pub mod sessions;
pub mod validation;

use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_extra::TypedHeader;
use headers::Authorization;
use headers::authorization::Bearer;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use codes::CodeRegistry;
use directory::MemberDirectory;
use error::AppError;
use gate::ConnectionGate;
use links::LinkStore;
use monitor::{Prober, ReachabilityMonitor};
use notify::{Notifications, Notifier};
use permission::PermissionGate;
use policy::PolicyStore;
use sessions::SessionCache;

/// External collaborators the core is wired against.
pub struct Collaborators {
    pub links: Arc<dyn LinkStore>,
    pub directory: Arc<dyn MemberDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub prober: Arc<dyn Prober>,
}

pub struct AppState {
    pub links: Arc<dyn LinkStore>,
    pub codes: CodeRegistry,
    pub permissions: Arc<PermissionGate>,
    pub gate: ConnectionGate,
    pub monitor: Arc<ReachabilityMonitor>,
    pub sessions: Arc<SessionCache>,
    pub notifications: Notifications,
    pub policy: Arc<PolicyStore>,
    /// SHA-256 of the proxy's bearer token; proxy routes are open when unset.
    proxy_key_hash: Option<String>,
}

impl AppState {
    pub fn new(
        collaborators: Collaborators,
        policy: Arc<PolicyStore>,
        proxy_api_key: Option<&str>,
    ) -> Self {
        let codes = CodeRegistry::new(policy.current().linking.verification_timeout);
        Self::with_codes(collaborators, policy, proxy_api_key, codes)
    }

    /// Like [`new`](Self::new) with a caller-supplied code registry.
    pub fn with_codes(
        collaborators: Collaborators,
        policy: Arc<PolicyStore>,
        proxy_api_key: Option<&str>,
        codes: CodeRegistry,
    ) -> Self {
        let Collaborators {
            links,
            directory,
            notifier,
            prober,
        } = collaborators;

        let sessions = Arc::new(SessionCache::new());
        let notifications = Notifications::new(notifier);

        let permissions = Arc::new(PermissionGate::new(
            Arc::clone(&links),
            directory,
            Arc::clone(&policy),
        ));
        let gate = ConnectionGate::new(
            Arc::clone(&links),
            codes.clone(),
            Arc::clone(&permissions),
            Arc::clone(&policy),
        );
        let monitor = Arc::new(ReachabilityMonitor::new(
            Arc::clone(&policy),
            Arc::clone(&sessions),
            prober,
            notifications.clone(),
        ));

        Self {
            links,
            codes,
            permissions,
            gate,
            monitor,
            sessions,
            notifications,
            policy,
            proxy_key_hash: proxy_api_key.map(helpers::hash_api_key),
        }
    }
}

/// Rejects proxy calls without the configured bearer token.
async fn require_proxy_key(
    State(state): State<Arc<AppState>>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = &state.proxy_key_hash {
        let presented = auth.map(|TypedHeader(auth)| helpers::hash_api_key(auth.token()));
        if presented.as_ref() != Some(expected) {
            return Err(AppError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

/// Create the application router over the given state
pub fn create_app(
    state: Arc<AppState>,
    request_body_limit: usize,
    request_timeout: Duration,
) -> Router {
    // Routes called by the proxy plugin
    let proxy_routes = Router::new()
        .route("/proxy/connect", post(routes::connect))
        .route("/proxy/joined", post(routes::joined))
        .route("/proxy/left", post(routes::left))
        .route("/proxy/sync", post(routes::sync))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_proxy_key,
        ));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/status", get(routes::status))
        .merge(proxy_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .with_state(state)
}
