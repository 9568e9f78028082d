use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sdn_core::{SdnError, Timestamp, TrustLevel, SESSION_TOKEN_BYTES};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// An operator account on the local admin surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminAccount {
    pub username: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    /// Base32 TOTP secret, when two-factor is enrolled.
    pub totp_secret: Option<String>,
    pub created_at: Timestamp,
}

/// An external principal keyed by its extended public key string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub xpub: String,
    pub trust_level: TrustLevel,
    #[serde(default)]
    pub display_name: String,
    /// Ed25519 verifying key bound on first successful challenge verify.
    #[serde(default)]
    pub signing_key: Option<[u8; 32]>,
    #[serde(default)]
    pub last_login: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// An issued session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// URL-safe random token; also the storage key.
    pub token: String,
    /// Admin username or user xpub.
    pub owner: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub client_ip: String,
    pub user_agent: String,
    pub revoked: bool,
}

impl Session {
    /// A token is live iff it exists, is not revoked, and has not expired.
    pub fn is_valid(&self, now: Timestamp) -> bool {
        !self.revoked && now <= self.expires_at
    }
}

/// Authentication state backed by sled.
///
/// Named trees:
///   sessions — token utf8 → bincode(Session)
///   admins   — username utf8 → bincode(AdminAccount)
///   users    — xpub utf8 → bincode(UserRecord)
pub struct AuthStore {
    _db: sled::Db,
    sessions: sled::Tree,
    admins: sled::Tree,
    users: sled::Tree,
}

fn storage_err(e: impl std::fmt::Display) -> SdnError {
    SdnError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SdnError> {
    bincode::serialize(value).map_err(|e| SdnError::Serialization(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, SdnError> {
    bincode::deserialize(bytes).map_err(|e| SdnError::Serialization(e.to_string()))
}

impl AuthStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SdnError> {
        let db = sled::open(path).map_err(storage_err)?;
        let sessions = db.open_tree("sessions").map_err(storage_err)?;
        let admins = db.open_tree("admins").map_err(storage_err)?;
        let users = db.open_tree("users").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            sessions,
            admins,
            users,
        })
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Issue a session for `owner` with the given TTL.
    pub fn create_session(
        &self,
        owner: &str,
        ttl_secs: i64,
        client_ip: &str,
        user_agent: &str,
        now: Timestamp,
    ) -> Result<Session, SdnError> {
        let mut raw = [0u8; SESSION_TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let session = Session {
            token: URL_SAFE_NO_PAD.encode(raw),
            owner: owner.to_string(),
            created_at: now,
            expires_at: now + ttl_secs,
            client_ip: client_ip.to_string(),
            user_agent: user_agent.to_string(),
            revoked: false,
        };
        self.sessions
            .insert(session.token.as_bytes(), encode(&session)?)
            .map_err(storage_err)?;
        Ok(session)
    }

    /// Look up a session and check validity at `now`.
    pub fn validate_session(&self, token: &str, now: Timestamp) -> Result<Option<Session>, SdnError> {
        let Some(bytes) = self.sessions.get(token.as_bytes()).map_err(storage_err)? else {
            return Ok(None);
        };
        let session: Session = decode(&bytes)?;
        Ok(session.is_valid(now).then_some(session))
    }

    /// Revoke one session. Returns false when the token is unknown.
    pub fn revoke_session(&self, token: &str) -> Result<bool, SdnError> {
        let Some(bytes) = self.sessions.get(token.as_bytes()).map_err(storage_err)? else {
            return Ok(false);
        };
        let mut session: Session = decode(&bytes)?;
        session.revoked = true;
        self.sessions
            .insert(token.as_bytes(), encode(&session)?)
            .map_err(storage_err)?;
        Ok(true)
    }

    /// Revoke every session owned by `owner` (password change, user removal).
    pub fn revoke_sessions_for(&self, owner: &str) -> Result<usize, SdnError> {
        let mut revoked = 0;
        for item in self.sessions.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let mut session: Session = decode(&bytes)?;
            if session.owner == owner && !session.revoked {
                session.revoked = true;
                self.sessions
                    .insert(key, encode(&session)?)
                    .map_err(storage_err)?;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, SdnError> {
        let mut out = Vec::new();
        for item in self.sessions.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Delete expired and revoked sessions. Runs on a timer; validity checks
    /// never depend on it.
    pub fn sweep_sessions(&self, now: Timestamp) -> Result<usize, SdnError> {
        let mut removed = 0;
        for item in self.sessions.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let session: Session = decode(&bytes)?;
            if !session.is_valid(now) {
                self.sessions.remove(key).map_err(storage_err)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ── Admin accounts ───────────────────────────────────────────────────────

    pub fn create_admin(&self, account: &AdminAccount) -> Result<(), SdnError> {
        self.admins
            .insert(account.username.as_bytes(), encode(account)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_admin(&self, username: &str) -> Result<Option<AdminAccount>, SdnError> {
        match self.admins.get(username.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn admin_count(&self) -> u64 {
        self.admins.len() as u64
    }

    /// Replace an admin's password hash. The caller revokes sessions.
    pub fn set_admin_password(&self, username: &str, password_hash: &str) -> Result<(), SdnError> {
        let mut account = self
            .get_admin(username)?
            .ok_or(SdnError::AuthFailed)?;
        account.password_hash = password_hash.to_string();
        self.create_admin(&account)
    }

    // ── Users ────────────────────────────────────────────────────────────────

    pub fn upsert_user(&self, user: &UserRecord) -> Result<(), SdnError> {
        if user.xpub.is_empty() || user.xpub.len() > 256 {
            return Err(SdnError::InvalidRequest("xpub length out of range".into()));
        }
        self.users
            .insert(user.xpub.as_bytes(), encode(user)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_user(&self, xpub: &str) -> Result<Option<UserRecord>, SdnError> {
        match self.users.get(xpub.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove_user(&self, xpub: &str) -> Result<bool, SdnError> {
        Ok(self.users.remove(xpub.as_bytes()).map_err(storage_err)?.is_some())
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>, SdnError> {
        let mut out = Vec::new();
        for item in self.users.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), SdnError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, AuthStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::open(dir.path().join("auth")).unwrap();
        (dir, store)
    }

    #[test]
    fn session_tokens_are_long_and_unique() {
        let (_dir, store) = open_store();
        let a = store.create_session("admin", 3600, "127.0.0.1", "cli", 0).unwrap();
        let b = store.create_session("admin", 3600, "127.0.0.1", "cli", 0).unwrap();
        // 32 random bytes base64url: 43 chars, comfortably above the
        // 22-byte entropy floor.
        assert_eq!(a.token.len(), 43);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn session_validity_window() {
        let (_dir, store) = open_store();
        let session = store.create_session("admin", 3600, "ip", "ua", 1_000).unwrap();

        assert!(store.validate_session(&session.token, 1_000).unwrap().is_some());
        assert!(store.validate_session(&session.token, 4_600).unwrap().is_some());
        assert!(store.validate_session(&session.token, 4_601).unwrap().is_none());
        assert!(store.validate_session("no-such-token", 1_000).unwrap().is_none());
    }

    #[test]
    fn revocation_is_immediate() {
        let (_dir, store) = open_store();
        let session = store.create_session("admin", 3600, "ip", "ua", 0).unwrap();
        assert!(store.revoke_session(&session.token).unwrap());
        assert!(store.validate_session(&session.token, 1).unwrap().is_none());
        assert!(!store.revoke_session("no-such-token").unwrap());
    }

    #[test]
    fn revoke_all_for_owner() {
        let (_dir, store) = open_store();
        store.create_session("alice", 3600, "ip", "ua", 0).unwrap();
        store.create_session("alice", 3600, "ip", "ua", 0).unwrap();
        let bob = store.create_session("bob", 3600, "ip", "ua", 0).unwrap();

        assert_eq!(store.revoke_sessions_for("alice").unwrap(), 2);
        assert!(store.validate_session(&bob.token, 1).unwrap().is_some());
    }

    #[test]
    fn sweep_removes_dead_sessions() {
        let (_dir, store) = open_store();
        let live = store.create_session("a", 3600, "ip", "ua", 1_000).unwrap();
        store.create_session("b", 10, "ip", "ua", 1_000).unwrap();
        let revoked = store.create_session("c", 3600, "ip", "ua", 1_000).unwrap();
        store.revoke_session(&revoked.token).unwrap();

        assert_eq!(store.sweep_sessions(2_000).unwrap(), 2);
        assert_eq!(store.list_sessions().unwrap().len(), 1);
        assert!(store.validate_session(&live.token, 2_000).unwrap().is_some());
    }

    #[test]
    fn user_xpub_bounds() {
        let (_dir, store) = open_store();
        let mut user = UserRecord {
            xpub: "x".repeat(257),
            trust_level: TrustLevel::Standard,
            display_name: String::new(),
            signing_key: None,
            last_login: None,
            created_at: 0,
        };
        assert!(store.upsert_user(&user).is_err());
        user.xpub = "xpub6CUGRUo".into();
        assert!(store.upsert_user(&user).is_ok());
        assert!(store.get_user("xpub6CUGRUo").unwrap().is_some());
    }
}
