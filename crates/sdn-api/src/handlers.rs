use crate::error::ApiError;
use crate::net::{client_ip, request_is_secure};
use crate::server::{SetupOutcome, SharedState};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sdn_audit::AuditFilter;
use sdn_auth::{AdminAccount, Session};
use sdn_core::{AuditSeverity, SdnError, Timestamp, TrustLevel};
use sdn_identity::{IdentityService, ProfileFields};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const SESSION_COOKIE: &str = "sdn_session";

fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N], ApiError> {
    let bytes = hex::decode(s)
        .map_err(|_| SdnError::InvalidRequest("malformed hex field".into()))?;
    bytes
        .try_into()
        .map_err(|_| SdnError::InvalidRequest("hex field has wrong length".into()).into())
}

// Session-scoped cookie; server-side expiry is authoritative, so no Max-Age.
fn session_cookie(token: &str, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_secure(secure);
    cookie
}

fn current_session(state: &SharedState, jar: &CookieJar) -> Result<Session, ApiError> {
    let token = jar.get(SESSION_COOKIE).ok_or(SdnError::AuthFailed)?;
    state
        .auth
        .store()
        .validate_session(token.value(), now())?
        .ok_or_else(|| SdnError::AuthFailed.into())
}

fn admin_session(state: &SharedState, jar: &CookieJar) -> Result<Session, ApiError> {
    let session = current_session(state, jar)?;
    if !state.auth.is_admin_session(&session)? {
        return Err(SdnError::PermissionDenied.into());
    }
    Ok(session)
}

// ── Health ───────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "setup_required": !state.setup.is_complete(),
    }))
}

// ── Setup ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SetupRequest {
    pub token: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct SetupResponse {
    pub status: &'static str,
    /// Shown exactly once; recovery phrase for the new identity.
    pub mnemonic: String,
    pub admin_username: String,
    /// Present only when no password was supplied.
    pub generated_password: Option<String>,
}

pub async fn setup(
    State(state): State<SharedState>,
    Json(body): Json<SetupRequest>,
) -> Result<Json<SetupResponse>, ApiError> {
    state.setup.check_token(&body.token, now())?;

    let username = body.username.unwrap_or_else(|| "admin".to_string());
    let (password, generated_password) = match body.password {
        Some(p) if !p.is_empty() => (p, None),
        _ => {
            let mut raw = [0u8; 16];
            rand::rngs::OsRng.fill_bytes(&mut raw);
            let generated = URL_SAFE_NO_PAD.encode(raw);
            (generated.clone(), Some(generated))
        }
    };

    // Identity creation runs Argon2id over the seed password; keep it off
    // the async workers.
    let data_dir = state.data_dir.clone();
    let seed_password = password.clone();
    let (identity, mnemonic) = tokio::task::spawn_blocking(move || {
        IdentityService::load_or_create(&data_dir, &seed_password, ProfileFields::default())
    })
    .await
    .map_err(|e| SdnError::Other(format!("setup task failed: {e}")))??;
    let mnemonic = mnemonic.unwrap_or_default();

    let password_hash = {
        let password = password.clone();
        tokio::task::spawn_blocking(move || sdn_auth::password::hash_password(&password))
            .await
            .map_err(|e| SdnError::Other(format!("setup task failed: {e}")))??
    };
    state.auth.store().create_admin(&AdminAccount {
        username: username.clone(),
        password_hash,
        totp_secret: None,
        created_at: now(),
    })?;

    state.setup.consume_and_complete(&body.token, now())?;
    *state.identity.write().expect("identity lock poisoned") = Some(Arc::new(identity));
    state.audit.append(
        "setup",
        AuditSeverity::Warning,
        "first-run setup completed",
        Default::default(),
        Some(&username),
    );
    let _ = state
        .setup_complete_tx
        .try_send(SetupOutcome {
            identity_password: password,
        });
    info!(admin = %username, "setup complete");

    Ok(Json(SetupResponse {
        status: "ok",
        mnemonic,
        admin_username: username,
        generated_password,
    }))
}

// ── Operator login ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub totp: Option<String>,
    #[serde(default)]
    pub remember: bool,
}

pub async fn login(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    let ip = client_ip(&peer, &headers);
    let agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let state2 = Arc::clone(&state);
    let session = tokio::task::spawn_blocking(move || {
        state2.auth.login_operator(
            &body.username,
            &body.password,
            body.totp.as_deref(),
            body.remember,
            &ip,
            &agent,
            now(),
        )
    })
    .await
    .map_err(|e| SdnError::Other(format!("login task failed: {e}")))??;

    let secure = request_is_secure(false, &peer, &headers);
    let jar = jar.add(session_cookie(&session.token, secure));
    Ok((jar, Json(json!({ "expires_at": session.expires_at }))))
}

pub async fn logout(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let _ = state.auth.store().revoke_session(cookie.value());
    }
    let jar = jar.remove(Cookie::from(SESSION_COOKIE));
    Ok((jar, Json(json!({ "status": "ok" }))))
}

// ── Challenge-response login ─────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ChallengeRequest {
    pub xpub: String,
    /// Ed25519 verifying key, hex.
    pub client_pubkey: String,
    pub ts: Timestamp,
}

pub async fn challenge(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ChallengeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = client_ip(&peer, &headers);
    let pubkey: [u8; 32] = decode_hex(&body.client_pubkey)?;
    let grant = state
        .auth
        .issue_challenge(&body.xpub, &pubkey, body.ts, &ip, now())?;
    Ok(Json(json!({
        "challenge_id": grant.challenge_id,
        "nonce": hex::encode(grant.nonce),
    })))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub challenge_id: String,
    pub xpub: String,
    pub client_pubkey: String,
    pub nonce: String,
    pub signature: String,
}

pub async fn verify(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<VerifyRequest>,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    let ip = client_ip(&peer, &headers);
    let agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let pubkey: [u8; 32] = decode_hex(&body.client_pubkey)?;
    let nonce: [u8; 32] = decode_hex(&body.nonce)?;
    let signature: [u8; 64] = decode_hex(&body.signature)?;

    let session = state.auth.verify_challenge(
        &body.challenge_id,
        &body.xpub,
        &pubkey,
        &nonce,
        &signature,
        &ip,
        agent,
        now(),
    )?;

    let secure = request_is_secure(false, &peer, &headers);
    let jar = jar.add(session_cookie(&session.token, secure));
    Ok((jar, Json(json!({ "expires_at": session.expires_at }))))
}

// ── Sessions ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionView {
    pub token_prefix: String,
    pub owner: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub client_ip: String,
    pub user_agent: String,
    pub revoked: bool,
}

pub async fn list_sessions(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    admin_session(&state, &jar)?;
    let sessions = state.auth.store().list_sessions()?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionView {
                token_prefix: s.token.chars().take(8).collect(),
                owner: s.owner,
                created_at: s.created_at,
                expires_at: s.expires_at,
                client_ip: s.client_ip,
                user_agent: s.user_agent,
                revoked: s.revoked,
            })
            .collect(),
    ))
}

pub async fn revoke_session(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = admin_session(&state, &jar)?;
    let revoked = state.auth.store().revoke_session(&token)?;
    if revoked {
        state.audit.append(
            "session_revoked",
            AuditSeverity::Info,
            "session revoked via admin surface",
            Default::default(),
            Some(&caller.owner),
        );
    }
    Ok(Json(json!({ "revoked": revoked })))
}

// ── Profile ──────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ProfileBody {
    pub display_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

fn identity_or_unavailable(state: &SharedState) -> Result<Arc<IdentityService>, ApiError> {
    state
        .identity
        .read()
        .expect("identity lock poisoned")
        .clone()
        .ok_or_else(|| SdnError::SetupNotStarted.into())
}

pub async fn get_profile(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, ApiError> {
    admin_session(&state, &jar)?;
    let identity = identity_or_unavailable(&state)?;
    let fields = identity.profile_fields();
    let snapshot = identity.epm_snapshot();
    Ok(Json(json!({
        "display_name": fields.display_name,
        "organization": fields.organization,
        "email": fields.email,
        "website": fields.website,
        "country": fields.country,
        "addresses": fields.addresses,
        "signing_key": hex::encode(snapshot.signing_key),
        "encryption_key": hex::encode(snapshot.encryption_key),
    })))
}

pub async fn put_profile(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(body): Json<ProfileBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = admin_session(&state, &jar)?;
    let identity = identity_or_unavailable(&state)?;
    identity.set_profile_fields(ProfileFields {
        display_name: body.display_name,
        organization: body.organization,
        email: body.email,
        website: body.website,
        country: body.country,
        addresses: body.addresses,
    });
    state.audit.append(
        "profile_updated",
        AuditSeverity::Info,
        "profile fields updated",
        Default::default(),
        Some(&caller.owner),
    );
    Ok(Json(json!({ "status": "ok" })))
}

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AddUserRequest {
    pub xpub: String,
    pub trust_level: String,
    #[serde(default)]
    pub display_name: String,
}

fn parse_trust(s: &str) -> Result<TrustLevel, ApiError> {
    TrustLevel::from_str_name(s)
        .ok_or_else(|| SdnError::InvalidRequest(format!("unknown trust level {s}")).into())
}

pub async fn add_user(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(body): Json<AddUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = admin_session(&state, &jar)?;
    let trust = parse_trust(&body.trust_level)?;
    state
        .auth
        .add_user(&caller, &body.xpub, trust, &body.display_name, now())?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn remove_user(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(xpub): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = admin_session(&state, &jar)?;
    let removed = state.auth.remove_user(&caller, &xpub)?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Deserialize)]
pub struct SetTrustRequest {
    pub trust_level: String,
}

pub async fn set_user_trust(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(xpub): Path<String>,
    Json(body): Json<SetTrustRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = admin_session(&state, &jar)?;
    let trust = parse_trust(&body.trust_level)?;
    state.auth.set_user_trust(&caller, &xpub, trust)?;
    Ok(Json(json!({ "status": "ok" })))
}

// ── Audit ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub severity: Option<String>,
    pub since: Option<Timestamp>,
    pub limit: Option<usize>,
}

pub async fn query_audit(
    State(state): State<SharedState>,
    jar: CookieJar,
    Query(query): Query<AuditQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    admin_session(&state, &jar)?;
    let min_severity = match query.severity.as_deref() {
        None => None,
        Some(s) => Some(
            AuditSeverity::from_str_name(s)
                .ok_or_else(|| SdnError::InvalidRequest(format!("unknown severity {s}")))?,
        ),
    };
    let entries = state.audit.query(&AuditFilter {
        event_type: query.event_type,
        min_severity,
        since: query.since,
        limit: query.limit,
    })?;
    let rows: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "timestamp": e.timestamp,
                "type": e.event_type,
                "severity": e.severity.as_str(),
                "message": e.message,
                "detail": e.detail,
                "actor": e.actor,
            })
        })
        .collect();
    Ok(Json(json!({ "entries": rows, "dropped": state.audit.dropped() })))
}
