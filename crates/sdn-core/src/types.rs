use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── Cid ──────────────────────────────────────────────────────────────────────

/// 32-byte content identifier: SHA-256 of the record payload bytes.
///
/// The canonical string rendering is the lowercase hex digest; that string is
/// what travels on the wire and what keys the content store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cid(pub [u8; 32]);

impl Cid {
    /// Compute the CID of a record payload.
    pub fn from_blob(blob: &[u8]) -> Self {
        let digest = Sha256::digest(blob);
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&digest);
        Self(arr)
    }

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, crate::error::SdnError> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::error::SdnError::InvalidRequest(
                "malformed CID".into(),
            ));
        }
        let bytes = hex::decode(s)
            .map_err(|_| crate::error::SdnError::InvalidRequest("malformed CID".into()))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}…)", &self.to_hex()[..16])
    }
}

// ── TrustLevel ───────────────────────────────────────────────────────────────

/// Peer trust category. Totally ordered: `Untrusted < Limited < Standard <
/// Trusted < Admin`. Controls admission decisions and rate-limit quotas.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug, Default,
)]
pub enum TrustLevel {
    Untrusted,
    Limited,
    #[default]
    Standard,
    Trusted,
    Admin,
}

impl TrustLevel {
    /// All levels, ascending.
    pub const ALL: [TrustLevel; 5] = [
        TrustLevel::Untrusted,
        TrustLevel::Limited,
        TrustLevel::Standard,
        TrustLevel::Trusted,
        TrustLevel::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Untrusted => "untrusted",
            TrustLevel::Limited => "limited",
            TrustLevel::Standard => "standard",
            TrustLevel::Trusted => "trusted",
            TrustLevel::Admin => "admin",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "untrusted" => Some(TrustLevel::Untrusted),
            "limited" => Some(TrustLevel::Limited),
            "standard" => Some(TrustLevel::Standard),
            "trusted" => Some(TrustLevel::Trusted),
            "admin" => Some(TrustLevel::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── AuditSeverity ────────────────────────────────────────────────────────────

/// Severity of an audit event.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Error => "error",
            AuditSeverity::Critical => "critical",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AuditSeverity::Info),
            "warning" => Some(AuditSeverity::Warning),
            "error" => Some(AuditSeverity::Error),
            "critical" => Some(AuditSeverity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_matches_sha256_vector() {
        // SHA-256 of {0x01, 0x02, 0x03}.
        let cid = Cid::from_blob(&[0x01, 0x02, 0x03]);
        assert_eq!(
            cid.to_hex(),
            "039058c6f2c0cb492c533b0a4d14ef77cc0f78abccced5287d84a1a2011cfb81"
        );
    }

    #[test]
    fn cid_hex_round_trip() {
        let cid = Cid::from_blob(b"orbital elements");
        let parsed = Cid::from_hex(&cid.to_hex()).unwrap();
        assert_eq!(cid, parsed);
    }

    #[test]
    fn cid_rejects_malformed_hex() {
        assert!(Cid::from_hex("abc").is_err());
        assert!(Cid::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn trust_levels_are_totally_ordered() {
        let mut prev = None;
        for level in TrustLevel::ALL {
            if let Some(p) = prev {
                assert!(p < level);
            }
            prev = Some(level);
        }
        assert!(TrustLevel::Untrusted < TrustLevel::Admin);
    }

    #[test]
    fn trust_level_name_round_trip() {
        for level in TrustLevel::ALL {
            assert_eq!(TrustLevel::from_str_name(level.as_str()), Some(level));
        }
        assert_eq!(TrustLevel::from_str_name("root"), None);
    }
}
