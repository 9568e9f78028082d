use crate::password::{hash_password, verify_password};
use crate::store::{AdminAccount, AuthStore, Session, UserRecord};
use crate::totp::{self, ReplayCache};
use rand::RngCore;
use sdn_audit::AuditLog;
use sdn_core::{
    AuditSeverity, SdnError, Timestamp, TrustLevel, CHALLENGE_NONCE_BYTES, CHALLENGE_TS_SKEW_SECS,
    CHALLENGE_TTL_SECS, MAX_PENDING_CHALLENGES, SESSION_TTL_REMEMBER_SECS, SESSION_TTL_SECS,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

// Fixed-window request caps, per minute.
const CHALLENGE_PER_IP: u32 = 60;
const CHALLENGE_PER_XPUB: u32 = 30;
const VERIFY_PER_IP: u32 = 120;
const VERIFY_PER_XPUB: u32 = 60;

/// What a `challenge` call hands back. Always well-formed whether or not the
/// xpub is known, so the endpoint cannot be used to enumerate accounts.
#[derive(Clone, Debug)]
pub struct ChallengeGrant {
    pub challenge_id: String,
    pub nonce: [u8; CHALLENGE_NONCE_BYTES],
}

/// A pending challenge. Deleted on the first verify attempt that names it.
struct PendingChallenge {
    nonce: [u8; CHALLENGE_NONCE_BYTES],
    xpub: String,
    expected_key: [u8; 32],
    first_use: bool,
    expires_at: Timestamp,
}

/// Both login flows and the user directory, in front of one session store.
pub struct AuthService {
    store: Arc<AuthStore>,
    audit: Arc<AuditLog>,
    replay: ReplayCache,
    challenges: Mutex<HashMap<String, PendingChallenge>>,
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl AuthService {
    pub fn new(store: Arc<AuthStore>, audit: Arc<AuditLog>) -> Self {
        Self {
            store,
            audit,
            replay: ReplayCache::new(),
            challenges: Mutex::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<AuthStore> {
        &self.store
    }

    /// Fixed one-minute window counter. Returns false once `limit` requests
    /// have landed in the current minute.
    fn within_window(&self, key: String, limit: u32, now: Timestamp) -> bool {
        let minute = now / 60;
        let mut windows = self.windows.lock().expect("rate window lock poisoned");
        let slot = windows.entry(key).or_insert((minute, 0));
        if slot.0 != minute {
            *slot = (minute, 0);
        }
        slot.1 += 1;
        slot.1 <= limit
    }

    // ── Operator login ───────────────────────────────────────────────────────

    /// Authenticate a local operator. Every credential defect returns the
    /// same opaque failure.
    pub fn login_operator(
        &self,
        username: &str,
        password: &str,
        totp_code: Option<&str>,
        remember: bool,
        client_ip: &str,
        user_agent: &str,
        now: Timestamp,
    ) -> Result<Session, SdnError> {
        let account = match self.store.get_admin(username)? {
            Some(account) if verify_password(password, &account.password_hash) => account,
            _ => {
                self.audit_auth_failure("operator_login", username, client_ip);
                return Err(SdnError::AuthFailed);
            }
        };

        if let Some(secret) = &account.totp_secret {
            let ok = totp_code
                .map(|code| totp::verify_code(secret, username, code, now, &self.replay))
                .unwrap_or(false);
            if !ok {
                self.audit_auth_failure("operator_login", username, client_ip);
                return Err(SdnError::AuthFailed);
            }
        }

        let ttl = if remember {
            SESSION_TTL_REMEMBER_SECS
        } else {
            SESSION_TTL_SECS
        };
        let session = self
            .store
            .create_session(username, ttl, client_ip, user_agent, now)?;
        self.audit.append(
            "operator_login",
            AuditSeverity::Info,
            "operator session issued",
            Default::default(),
            Some(username),
        );
        info!(user = %username, "operator login");
        Ok(session)
    }

    /// Change an operator password; verifies the old one first and revokes
    /// every session for the account.
    pub fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), SdnError> {
        let account = self.store.get_admin(username)?.ok_or(SdnError::AuthFailed)?;
        if !verify_password(old_password, &account.password_hash) {
            self.audit_auth_failure("password_change", username, "-");
            return Err(SdnError::AuthFailed);
        }
        self.store
            .set_admin_password(username, &hash_password(new_password)?)?;
        let revoked = self.store.revoke_sessions_for(username)?;
        self.audit.append(
            "password_change",
            AuditSeverity::Warning,
            format!("password changed, {revoked} sessions revoked"),
            Default::default(),
            Some(username),
        );
        Ok(())
    }

    // ── Challenge-response login ─────────────────────────────────────────────

    /// Issue a login challenge.
    ///
    /// The response is uniform whether or not the xpub is known; only the
    /// stored state is conditional. If the user has no bound signing key yet,
    /// the presented client key becomes the trust-on-first-use candidate.
    pub fn issue_challenge(
        &self,
        xpub: &str,
        client_pubkey: &[u8; 32],
        ts: Timestamp,
        client_ip: &str,
        now: Timestamp,
    ) -> Result<ChallengeGrant, SdnError> {
        if xpub.is_empty() || xpub.len() > 256 {
            return Err(SdnError::InvalidRequest("xpub length out of range".into()));
        }
        if (ts - now).abs() > CHALLENGE_TS_SKEW_SECS {
            return Err(SdnError::InvalidRequest("timestamp skew too large".into()));
        }
        if !self.within_window(format!("ch-ip:{client_ip}"), CHALLENGE_PER_IP, now)
            || !self.within_window(format!("ch-xpub:{xpub}"), CHALLENGE_PER_XPUB, now)
        {
            return Err(SdnError::RateLimited);
        }

        let mut nonce = [0u8; CHALLENGE_NONCE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let mut id_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut id_bytes);
        let challenge_id = hex::encode(id_bytes);

        let mut challenges = self.challenges.lock().expect("challenge lock poisoned");
        challenges.retain(|_, c| c.expires_at >= now);
        // Refusing at the cap instead of evicting keeps a flood from flushing
        // someone else's valid challenge out. The check runs before the user
        // lookup so full-map refusals are uniform across known and unknown
        // xpubs.
        if challenges.len() >= MAX_PENDING_CHALLENGES {
            return Err(SdnError::RateLimited);
        }

        if let Some(user) = self.store.get_user(xpub)? {
            let (expected_key, first_use) = match user.signing_key {
                Some(bound) => (bound, false),
                None => (*client_pubkey, true),
            };
            challenges.insert(
                challenge_id.clone(),
                PendingChallenge {
                    nonce,
                    xpub: xpub.to_string(),
                    expected_key,
                    first_use,
                    expires_at: now + CHALLENGE_TTL_SECS,
                },
            );
        }

        Ok(ChallengeGrant { challenge_id, nonce })
    }

    /// Verify a challenge signature and issue a session.
    ///
    /// The pending challenge is consumed before any check, so at most one
    /// verify call can ever succeed for a given id.
    pub fn verify_challenge(
        &self,
        challenge_id: &str,
        xpub: &str,
        client_pubkey: &[u8; 32],
        nonce: &[u8; CHALLENGE_NONCE_BYTES],
        signature: &[u8; 64],
        client_ip: &str,
        user_agent: &str,
        now: Timestamp,
    ) -> Result<Session, SdnError> {
        if !self.within_window(format!("vf-ip:{client_ip}"), VERIFY_PER_IP, now)
            || !self.within_window(format!("vf-xpub:{xpub}"), VERIFY_PER_XPUB, now)
        {
            return Err(SdnError::RateLimited);
        }

        let pending = self
            .challenges
            .lock()
            .expect("challenge lock poisoned")
            .remove(challenge_id);

        let Some(pending) = pending else {
            self.audit_auth_failure("user_login", xpub, client_ip);
            return Err(SdnError::AuthFailed);
        };
        if pending.expires_at < now
            || pending.xpub != xpub
            || pending.nonce != *nonce
            || pending.expected_key != *client_pubkey
            || sdn_crypto::verify_signature(&pending.expected_key, nonce, signature).is_err()
        {
            self.audit_auth_failure("user_login", xpub, client_ip);
            return Err(SdnError::AuthFailed);
        }

        let mut user = self.store.get_user(xpub)?.ok_or(SdnError::AuthFailed)?;
        if pending.first_use && user.signing_key.is_none() {
            debug!(xpub = %xpub, "binding signing key on first use");
            user.signing_key = Some(pending.expected_key);
        }
        user.last_login = Some(now);
        self.store.upsert_user(&user)?;

        let session = self
            .store
            .create_session(xpub, SESSION_TTL_SECS, client_ip, user_agent, now)?;
        self.audit.append(
            "user_login",
            AuditSeverity::Info,
            "challenge verified, session issued",
            Default::default(),
            Some(xpub),
        );
        Ok(session)
    }

    // ── User directory (admin-gated) ─────────────────────────────────────────

    /// True when the session belongs to a live operator account.
    pub fn is_admin_session(&self, session: &Session) -> Result<bool, SdnError> {
        Ok(self.store.get_admin(&session.owner)?.is_some())
    }

    fn require_admin(&self, caller: &Session) -> Result<(), SdnError> {
        if self.is_admin_session(caller)? {
            Ok(())
        } else {
            Err(SdnError::PermissionDenied)
        }
    }

    pub fn add_user(
        &self,
        caller: &Session,
        xpub: &str,
        trust_level: TrustLevel,
        display_name: &str,
        now: Timestamp,
    ) -> Result<(), SdnError> {
        self.require_admin(caller)?;
        self.store.upsert_user(&UserRecord {
            xpub: xpub.to_string(),
            trust_level,
            display_name: display_name.to_string(),
            signing_key: None,
            last_login: None,
            created_at: now,
        })?;
        self.audit.append(
            "user_added",
            AuditSeverity::Info,
            format!("user {xpub} at trust {trust_level}"),
            Default::default(),
            Some(&caller.owner),
        );
        Ok(())
    }

    pub fn remove_user(&self, caller: &Session, xpub: &str) -> Result<bool, SdnError> {
        self.require_admin(caller)?;
        let removed = self.store.remove_user(xpub)?;
        if removed {
            self.store.revoke_sessions_for(xpub)?;
            self.audit.append(
                "user_removed",
                AuditSeverity::Warning,
                format!("user {xpub} removed"),
                Default::default(),
                Some(&caller.owner),
            );
        }
        Ok(removed)
    }

    pub fn set_user_trust(
        &self,
        caller: &Session,
        xpub: &str,
        trust_level: TrustLevel,
    ) -> Result<(), SdnError> {
        self.require_admin(caller)?;
        let mut user = self
            .store
            .get_user(xpub)?
            .ok_or_else(|| SdnError::InvalidRequest("unknown user".into()))?;
        user.trust_level = trust_level;
        self.store.upsert_user(&user)?;
        self.audit.append(
            "user_trust_changed",
            AuditSeverity::Warning,
            format!("user {xpub} now {trust_level}"),
            Default::default(),
            Some(&caller.owner),
        );
        Ok(())
    }

    fn audit_auth_failure(&self, event: &str, principal: &str, client_ip: &str) {
        let mut detail = std::collections::BTreeMap::new();
        detail.insert(
            "client_ip".to_string(),
            serde_json::Value::String(client_ip.to_string()),
        );
        self.audit.append(
            event,
            AuditSeverity::Warning,
            "authentication failed",
            detail,
            Some(principal),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totp::code_at;
    use ed25519_dalek::{Signer, SigningKey};
    use sdn_audit::AuditDb;

    struct Rig {
        _dir: tempfile::TempDir,
        service: AuthService,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(AuthStore::open(dir.path().join("auth")).unwrap());
        let audit = Arc::new(AuditLog::new(
            AuditDb::open(dir.path().join("audit")).unwrap(),
            1024,
        ));
        Rig {
            _dir: dir,
            service: AuthService::new(store, audit),
        }
    }

    fn seed_admin(rig: &Rig, username: &str, password: &str, totp_secret: Option<String>) {
        rig.service
            .store
            .create_admin(&AdminAccount {
                username: username.into(),
                password_hash: hash_password(password).unwrap(),
                totp_secret,
                created_at: 0,
            })
            .unwrap();
    }

    fn seed_user(rig: &Rig, xpub: &str, signing_key: Option<[u8; 32]>) {
        rig.service
            .store
            .upsert_user(&UserRecord {
                xpub: xpub.into(),
                trust_level: TrustLevel::Standard,
                display_name: String::new(),
                signing_key,
                last_login: None,
                created_at: 0,
            })
            .unwrap();
    }

    #[test]
    fn operator_login_and_uniform_failures() {
        let rig = rig();
        seed_admin(&rig, "admin", "hunter2hunter2", None);

        let session = rig
            .service
            .login_operator("admin", "hunter2hunter2", None, false, "127.0.0.1", "cli", 1_000)
            .unwrap();
        assert_eq!(session.expires_at - session.created_at, SESSION_TTL_SECS);

        for (user, pass) in [("admin", "wrong"), ("ghost", "hunter2hunter2")] {
            let err = rig
                .service
                .login_operator(user, pass, None, false, "ip", "ua", 1_000)
                .unwrap_err();
            assert!(matches!(err, SdnError::AuthFailed));
        }
    }

    #[test]
    fn remember_extends_ttl() {
        let rig = rig();
        seed_admin(&rig, "admin", "pw-pw-pw-pw", None);
        let session = rig
            .service
            .login_operator("admin", "pw-pw-pw-pw", None, true, "ip", "ua", 0)
            .unwrap();
        assert_eq!(session.expires_at, SESSION_TTL_REMEMBER_SECS);
    }

    #[test]
    fn totp_required_and_replay_rejected() {
        let rig = rig();
        let secret = totp::generate_secret();
        seed_admin(&rig, "admin", "pw-pw-pw-pw", Some(secret.clone()));
        let now = 1_700_000_000;
        let code = code_at(&secret, now).unwrap();

        // Missing and wrong codes fail opaquely.
        assert!(rig
            .service
            .login_operator("admin", "pw-pw-pw-pw", None, false, "ip", "ua", now)
            .is_err());
        assert!(rig
            .service
            .login_operator("admin", "pw-pw-pw-pw", Some("000000"), false, "ip", "ua", now)
            .is_err());

        assert!(rig
            .service
            .login_operator("admin", "pw-pw-pw-pw", Some(&code), false, "ip", "ua", now)
            .is_ok());
        // Same code again within the window: replay cache rejects it.
        assert!(rig
            .service
            .login_operator("admin", "pw-pw-pw-pw", Some(&code), false, "ip", "ua", now)
            .is_err());
    }

    #[test]
    fn password_change_revokes_sessions() {
        let rig = rig();
        seed_admin(&rig, "admin", "old-password", None);
        let session = rig
            .service
            .login_operator("admin", "old-password", None, false, "ip", "ua", 100)
            .unwrap();

        rig.service
            .change_password("admin", "old-password", "new-password")
            .unwrap();
        assert!(rig
            .service
            .store
            .validate_session(&session.token, 101)
            .unwrap()
            .is_none());
        assert!(rig
            .service
            .login_operator("admin", "new-password", None, false, "ip", "ua", 102)
            .is_ok());
    }

    #[test]
    fn challenge_verify_happy_path_with_tofu() {
        let rig = rig();
        let signer = SigningKey::from_bytes(&[7u8; 32]);
        let pubkey = signer.verifying_key().to_bytes();
        seed_user(&rig, "xpubAlice", None);
        let now = 1_700_000_000;

        let grant = rig
            .service
            .issue_challenge("xpubAlice", &pubkey, now, "1.2.3.4", now)
            .unwrap();
        let signature = signer.sign(&grant.nonce).to_bytes();
        let session = rig
            .service
            .verify_challenge(
                &grant.challenge_id,
                "xpubAlice",
                &pubkey,
                &grant.nonce,
                &signature,
                "1.2.3.4",
                "sdk",
                now,
            )
            .unwrap();
        assert_eq!(session.owner, "xpubAlice");

        // TOFU: the key is now bound and a different key cannot verify.
        let bound = rig.service.store.get_user("xpubAlice").unwrap().unwrap();
        assert_eq!(bound.signing_key, Some(pubkey));
        assert_eq!(bound.last_login, Some(now));
    }

    #[test]
    fn challenge_is_single_use() {
        let rig = rig();
        let signer = SigningKey::from_bytes(&[9u8; 32]);
        let pubkey = signer.verifying_key().to_bytes();
        seed_user(&rig, "xpubBob", Some(pubkey));
        let now = 1_700_000_000;

        let grant = rig
            .service
            .issue_challenge("xpubBob", &pubkey, now, "ip", now)
            .unwrap();
        let signature = signer.sign(&grant.nonce).to_bytes();

        assert!(rig
            .service
            .verify_challenge(&grant.challenge_id, "xpubBob", &pubkey, &grant.nonce, &signature, "ip", "ua", now)
            .is_ok());
        // Identical second call: the challenge was consumed.
        assert!(matches!(
            rig.service
                .verify_challenge(&grant.challenge_id, "xpubBob", &pubkey, &grant.nonce, &signature, "ip", "ua", now)
                .unwrap_err(),
            SdnError::AuthFailed
        ));
    }

    #[test]
    fn unknown_xpub_gets_uniform_grant_but_cannot_verify() {
        let rig = rig();
        let signer = SigningKey::from_bytes(&[3u8; 32]);
        let pubkey = signer.verifying_key().to_bytes();
        let now = 1_700_000_000;

        // No user seeded: the grant still looks normal.
        let grant = rig
            .service
            .issue_challenge("xpubGhost", &pubkey, now, "ip", now)
            .unwrap();
        assert_eq!(grant.challenge_id.len(), 32);

        let signature = signer.sign(&grant.nonce).to_bytes();
        assert!(matches!(
            rig.service
                .verify_challenge(&grant.challenge_id, "xpubGhost", &pubkey, &grant.nonce, &signature, "ip", "ua", now)
                .unwrap_err(),
            SdnError::AuthFailed
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let rig = rig();
        let now = 1_700_000_000;
        assert!(matches!(
            rig.service
                .issue_challenge("xpubA", &[0u8; 32], now - 121, "ip", now)
                .unwrap_err(),
            SdnError::InvalidRequest(_)
        ));
        assert!(rig
            .service
            .issue_challenge("xpubA", &[0u8; 32], now - 119, "ip", now)
            .is_ok());
    }

    #[test]
    fn challenge_rate_limits_per_ip_and_xpub() {
        let rig = rig();
        let now = 1_700_000_000;

        // Per-xpub cap of 30 trips first for a single account.
        let mut limited = false;
        for _ in 0..31 {
            match rig.service.issue_challenge("xpubHot", &[0u8; 32], now, "ip-a", now) {
                Ok(_) => {}
                Err(SdnError::RateLimited) => limited = true,
                Err(e) => panic!("unexpected {e}"),
            }
        }
        assert!(limited);

        // Per-IP cap of 60 trips across many xpubs.
        let mut limited = false;
        for i in 0..61 {
            match rig
                .service
                .issue_challenge(&format!("xpub{i}"), &[0u8; 32], now, "ip-b", now)
            {
                Ok(_) => {}
                Err(SdnError::RateLimited) => limited = true,
                Err(e) => panic!("unexpected {e}"),
            }
        }
        assert!(limited);
    }

    #[test]
    fn expired_challenge_fails() {
        let rig = rig();
        let signer = SigningKey::from_bytes(&[5u8; 32]);
        let pubkey = signer.verifying_key().to_bytes();
        seed_user(&rig, "xpubSlow", Some(pubkey));
        let now = 1_700_000_000;

        let grant = rig
            .service
            .issue_challenge("xpubSlow", &pubkey, now, "ip", now)
            .unwrap();
        let signature = signer.sign(&grant.nonce).to_bytes();
        assert!(rig
            .service
            .verify_challenge(
                &grant.challenge_id,
                "xpubSlow",
                &pubkey,
                &grant.nonce,
                &signature,
                "ip",
                "ua",
                now + CHALLENGE_TTL_SECS + 1,
            )
            .is_err());
    }

    #[test]
    fn user_mutations_require_admin() {
        let rig = rig();
        seed_admin(&rig, "admin", "pw-pw-pw-pw", None);
        seed_user(&rig, "xpubUser", None);
        let admin_session = rig
            .service
            .login_operator("admin", "pw-pw-pw-pw", None, false, "ip", "ua", 0)
            .unwrap();
        let user_session = rig
            .service
            .store
            .create_session("xpubUser", 3600, "ip", "ua", 0)
            .unwrap();

        assert!(matches!(
            rig.service
                .add_user(&user_session, "xpubNew", TrustLevel::Standard, "", 0)
                .unwrap_err(),
            SdnError::PermissionDenied
        ));
        rig.service
            .add_user(&admin_session, "xpubNew", TrustLevel::Limited, "Ops", 0)
            .unwrap();
        rig.service
            .set_user_trust(&admin_session, "xpubNew", TrustLevel::Trusted)
            .unwrap();
        assert_eq!(
            rig.service.store.get_user("xpubNew").unwrap().unwrap().trust_level,
            TrustLevel::Trusted
        );
        assert!(rig.service.remove_user(&admin_session, "xpubNew").unwrap());
    }
}
