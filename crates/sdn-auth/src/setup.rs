//! First-run setup gate.
//!
//! While the completion marker is absent the node mints a one-time setup
//! token, keeping only its SHA-256 hash on disk. Redemption is constant-time
//! compared, single use, and bounded by a ten-minute window; success writes
//! the marker and deletes the token hash. The transition is one-way.

use rand::RngCore;
use sdn_core::{SdnError, Timestamp, SETUP_TOKEN_BYTES, SETUP_TOKEN_TTL_SECS};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use tracing::info;

const MARKER_FILE: &str = "setup.complete";
const TOKEN_FILE: &str = "setup.token";

#[derive(Serialize, Deserialize)]
struct TokenRecord {
    token_sha256: String,
    created_at: Timestamp,
}

/// Token-gated first-run initialization state machine.
pub struct SetupService {
    data_dir: PathBuf,
}

fn set_owner_only(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Strip separators and uppercase, so operators can retype the token loosely.
fn normalize(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(normalize(token).as_bytes()))
}

impl SetupService {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn marker_path(&self) -> PathBuf {
        self.data_dir.join(MARKER_FILE)
    }

    fn token_path(&self) -> PathBuf {
        self.data_dir.join(TOKEN_FILE)
    }

    /// Whether first-run setup has been completed.
    pub fn is_complete(&self) -> bool {
        self.marker_path().exists()
    }

    /// Mint the setup token if setup is pending and none was minted yet.
    ///
    /// Returns the display token exactly once; only the hash is stored. On
    /// later calls (or after completion) returns `None`.
    pub fn mint_token(&self, now: Timestamp) -> Result<Option<String>, SdnError> {
        if self.is_complete() || self.token_path().exists() {
            return Ok(None);
        }
        fs::create_dir_all(&self.data_dir)?;

        let mut raw = [0u8; SETUP_TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        // 32 hex chars in dash-separated groups of four, for reading aloud.
        let display = hex::encode_upper(raw)
            .as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).expect("hex is ascii"))
            .collect::<Vec<_>>()
            .join("-");

        let record = TokenRecord {
            token_sha256: token_hash(&display),
            created_at: now,
        };
        let json =
            serde_json::to_string(&record).map_err(|e| SdnError::Serialization(e.to_string()))?;
        fs::write(self.token_path(), json)?;
        set_owner_only(&self.token_path());
        info!("setup token minted; redeem within {SETUP_TOKEN_TTL_SECS} seconds of first use");
        Ok(Some(display))
    }

    /// Validate a presented token without consuming it.
    pub fn check_token(&self, token: &str, now: Timestamp) -> Result<(), SdnError> {
        if self.is_complete() {
            return Err(SdnError::SetupAlreadyComplete);
        }
        let raw = match fs::read_to_string(self.token_path()) {
            Ok(raw) => raw,
            Err(_) => return Err(SdnError::SetupNotStarted),
        };
        let record: TokenRecord =
            serde_json::from_str(&raw).map_err(|e| SdnError::Serialization(e.to_string()))?;

        if now - record.created_at > SETUP_TOKEN_TTL_SECS {
            return Err(SdnError::AuthFailed);
        }
        let presented = token_hash(token);
        if presented.as_bytes().ct_eq(record.token_sha256.as_bytes()).into() {
            Ok(())
        } else {
            Err(SdnError::AuthFailed)
        }
    }

    /// Redeem the token: validate, write the completion marker, delete the
    /// hash file. After this returns, every further setup call fails with
    /// `SetupAlreadyComplete`.
    pub fn consume_and_complete(&self, token: &str, now: Timestamp) -> Result<(), SdnError> {
        self.check_token(token, now)?;
        fs::write(self.marker_path(), format!("{now}\n"))?;
        set_owner_only(&self.marker_path());
        fs::remove_file(self.token_path())?;
        info!("first-run setup complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, SetupService) {
        let dir = tempfile::tempdir().unwrap();
        let svc = SetupService::new(dir.path());
        (dir, svc)
    }

    #[test]
    fn token_minted_once_and_redeemed_once() {
        let (_dir, svc) = service();
        assert!(!svc.is_complete());

        let token = svc.mint_token(1_000).unwrap().unwrap();
        // Only the hash is on disk; the display form never recurs.
        assert!(svc.mint_token(1_000).unwrap().is_none());

        assert!(matches!(
            svc.check_token("AAAA-BBBB-CCCC-DDDD-AAAA-BBBB-CCCC-DDDD", 1_100),
            Err(SdnError::AuthFailed)
        ));
        svc.consume_and_complete(&token, 1_100).unwrap();

        assert!(svc.is_complete());
        assert!(!svc.data_dir.join(TOKEN_FILE).exists());
        assert!(matches!(
            svc.consume_and_complete(&token, 1_100),
            Err(SdnError::SetupAlreadyComplete)
        ));
    }

    #[test]
    fn token_expires_after_window() {
        let (_dir, svc) = service();
        let token = svc.mint_token(1_000).unwrap().unwrap();
        assert!(svc.check_token(&token, 1_000 + SETUP_TOKEN_TTL_SECS).is_ok());
        assert!(matches!(
            svc.check_token(&token, 1_001 + SETUP_TOKEN_TTL_SECS),
            Err(SdnError::AuthFailed)
        ));
    }

    #[test]
    fn token_entry_is_forgiving_about_formatting() {
        let (_dir, svc) = service();
        let token = svc.mint_token(0).unwrap().unwrap();
        let sloppy = token.replace('-', " ").to_ascii_lowercase();
        assert!(svc.check_token(&sloppy, 1).is_ok());
    }

    #[test]
    fn check_before_mint_reports_not_started() {
        let (_dir, svc) = service();
        assert!(matches!(
            svc.check_token("anything", 0),
            Err(SdnError::SetupNotStarted)
        ));
    }

    #[test]
    fn completion_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let svc = SetupService::new(dir.path());
            let token = svc.mint_token(0).unwrap().unwrap();
            svc.consume_and_complete(&token, 1).unwrap();
        }
        let svc = SetupService::new(dir.path());
        assert!(svc.is_complete());
        assert!(svc.mint_token(2).unwrap().is_none());
    }
}
