use sdn_core::{SdnError, Timestamp};
use sdn_crypto::NodeKeys;
use serde::{Deserialize, Serialize};

/// Entity profile record (EPM): the node's self-description. Published as a
/// record under the `EPM` schema; immutable once snapshotted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub display_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub country: String,
    /// Overlay listen addresses other nodes may dial.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Ed25519 verifying key, 32 bytes.
    pub signing_key: [u8; 32],
    /// X25519 public key, 32 bytes.
    pub encryption_key: [u8; 32],
}

impl EntityProfile {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SdnError> {
        bincode::serialize(self).map_err(|e| SdnError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SdnError> {
        bincode::deserialize(bytes).map_err(|e| SdnError::Serialization(e.to_string()))
    }
}

/// Profile notification message (PNM): a small signed envelope announcing an
/// EPM's CID on the reserved topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileNotification {
    /// CID of the announced EPM, canonical hex string.
    pub cid: String,
    /// Schema tag of the announced record.
    pub schema_tag: String,
    pub published_at: Timestamp,
    /// Overlay address of the signer (peer id, base58).
    pub signer_address: String,
    /// Detached signature over the CID string bytes.
    pub signature: Vec<u8>,
    /// Signature scheme name.
    pub signature_type: String,
}

impl ProfileNotification {
    /// Build and sign an envelope for `cid`.
    pub fn sign(
        keys: &NodeKeys,
        cid: &str,
        schema_tag: &str,
        signer_address: &str,
        now: Timestamp,
    ) -> Self {
        let signature = keys.sign(cid.as_bytes()).to_bytes().to_vec();
        Self {
            cid: cid.to_string(),
            schema_tag: schema_tag.to_string(),
            published_at: now,
            signer_address: signer_address.to_string(),
            signature,
            signature_type: "ed25519".to_string(),
        }
    }

    /// Verify the envelope signature against a known verifying key.
    pub fn verify(&self, verifying_key: &[u8; 32]) -> Result<(), SdnError> {
        if self.signature_type != "ed25519" {
            return Err(SdnError::Crypto(format!(
                "unsupported signature type {}",
                self.signature_type
            )));
        }
        let signature: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| SdnError::Crypto("signature must be 64 bytes".into()))?;
        sdn_crypto::verify_signature(verifying_key, self.cid.as_bytes(), &signature)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SdnError> {
        bincode::serialize(self).map_err(|e| SdnError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SdnError> {
        bincode::deserialize(bytes).map_err(|e| SdnError::Serialization(e.to_string()))
    }
}
