use crate::handlers;
use sdn_audit::AuditLog;
use sdn_auth::{AuthService, SetupService};
use sdn_identity::IdentityService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Sent to the node's main loop once first-run setup completes, so startup
/// can continue with the freshly created identity.
#[derive(Debug)]
pub struct SetupOutcome {
    /// Password the identity seed was encrypted under.
    pub identity_password: String,
}

/// Shared state behind the admin surface.
pub struct ApiState {
    pub setup: Arc<SetupService>,
    pub auth: Arc<AuthService>,
    pub audit: Arc<AuditLog>,
    /// Present once the identity is unlocked; setup-phase requests that need
    /// it are answered with `setup_not_started`-class errors until then.
    pub identity: RwLock<Option<Arc<IdentityService>>>,
    pub setup_complete_tx: mpsc::Sender<SetupOutcome>,
    pub data_dir: PathBuf,
}

pub type SharedState = Arc<ApiState>;

/// Build the admin router.
pub fn router(state: SharedState) -> axum::Router {
    use axum::routing::{delete, get, post, put};

    let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);

    axum::Router::new()
        .route("/health", get(handlers::health))
        .route("/api/setup", post(handlers::setup))
        .route("/api/login", post(handlers::login))
        .route("/api/logout", post(handlers::logout))
        .route("/api/auth/challenge", post(handlers::challenge))
        .route("/api/auth/verify", post(handlers::verify))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/sessions/:token", delete(handlers::revoke_session))
        .route("/api/profile", get(handlers::get_profile))
        .route("/api/profile", put(handlers::put_profile))
        .route("/api/users", post(handlers::add_user))
        .route("/api/users/:xpub", delete(handlers::remove_user))
        .route("/api/users/:xpub/trust", put(handlers::set_user_trust))
        .route("/api/audit", get(handlers::query_audit))
        .layer(cors)
        .with_state(state)
}

/// Serve the admin surface until cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: SharedState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "admin surface listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;
    Ok(())
}
