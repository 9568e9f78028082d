use bip39::Mnemonic;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sdn_core::SdnError;
use sha2::Sha512;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// SLIP-0010 hardened path of the account-level base key. Its Ed25519 form
/// becomes the node's overlay identity, so the peer id is as deterministic
/// as the signing and encryption keys.
pub const BASE_KEY_PATH: [u32; 3] = [44, 0, 0];

/// SLIP-0010 hardened path of the node's Ed25519 signing key.
pub const SIGNING_KEY_PATH: [u32; 5] = [44, 0, 0, 0, 0];

/// SLIP-0010 hardened path of the node's X25519 encryption key.
pub const ENCRYPTION_KEY_PATH: [u32; 5] = [44, 0, 0, 1, 0];

const ED25519_CURVE_SEED: &[u8] = b"ed25519 seed";
const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Generate a fresh 24-word English mnemonic from 32 bytes of OS entropy.
pub fn generate_mnemonic() -> Result<Mnemonic, SdnError> {
    let mut entropy = Zeroizing::new([0u8; 32]);
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, entropy.as_mut());
    Mnemonic::from_entropy(entropy.as_ref()).map_err(|e| SdnError::Crypto(e.to_string()))
}

/// Derive the 64-byte BIP-39 seed from a mnemonic phrase (empty passphrase).
pub fn seed_from_mnemonic(phrase: &str) -> Result<Zeroizing<[u8; 64]>, SdnError> {
    let mnemonic = Mnemonic::parse(phrase).map_err(|e| SdnError::Crypto(e.to_string()))?;
    if mnemonic.word_count() != 24 {
        return Err(SdnError::Crypto("mnemonic must be 24 words".into()));
    }
    Ok(Zeroizing::new(mnemonic.to_seed("")))
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// SLIP-0010 hardened-only derivation for the ed25519 curve family.
///
/// Every path component is forced hardened (|= 0x80000000), matching the
/// derivation the rest of the network performs: two nodes with the same
/// mnemonic produce byte-identical public keys.
pub fn derive_hardened(seed: &[u8; 64], path: &[u32]) -> Zeroizing<[u8; 32]> {
    let mut i = Zeroizing::new(hmac_sha512(ED25519_CURVE_SEED, seed));
    for component in path {
        let index = (component | HARDENED_OFFSET).to_be_bytes();
        let mut data = Zeroizing::new([0u8; 37]);
        data[1..33].copy_from_slice(&i[..32]);
        data[33..].copy_from_slice(&index);
        i = Zeroizing::new(hmac_sha512(&i[32..], data.as_ref()));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&i[..32]);
    key
}

// ── NodeKeys ─────────────────────────────────────────────────────────────────

/// The node's derived key material, cached after unlock.
///
/// Holds the Ed25519 signing key (record and PNM signatures) and the X25519
/// static secret (payload encryption). Secret bytes are wiped on drop by the
/// underlying dalek types.
pub struct NodeKeys {
    base: Zeroizing<[u8; 32]>,
    signing: SigningKey,
    encryption: StaticSecret,
}

impl NodeKeys {
    /// Derive all keys from a 64-byte BIP-39 seed.
    pub fn from_seed(seed: &[u8; 64]) -> Self {
        let base = derive_hardened(seed, &BASE_KEY_PATH);
        let sk = derive_hardened(seed, &SIGNING_KEY_PATH);
        let ek = derive_hardened(seed, &ENCRYPTION_KEY_PATH);
        Self {
            base,
            signing: SigningKey::from_bytes(&sk),
            encryption: StaticSecret::from(*ek),
        }
    }

    /// Derive both keys from a mnemonic phrase.
    pub fn from_mnemonic(phrase: &str) -> Result<Self, SdnError> {
        let seed = seed_from_mnemonic(phrase)?;
        Ok(Self::from_seed(&seed))
    }

    /// The base secret the overlay identity keypair is built from.
    pub fn overlay_seed(&self) -> Zeroizing<[u8; 32]> {
        self.base.clone()
    }

    /// Ed25519 verifying key (32 bytes).
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// X25519 public key (32 bytes).
    pub fn encryption_public(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(&self.encryption)
    }

    /// Sign `message` with the node's signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    /// Diffie-Hellman against a remote X25519 public key.
    pub fn shared_secret(&self, remote: &x25519_dalek::PublicKey) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.encryption.diffie_hellman(remote).to_bytes())
    }
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NodeKeys {{ signing: {} }}",
            hex::encode(self.verifying_key().to_bytes())
        )
    }
}

/// Verify a detached Ed25519 signature given raw key and signature bytes.
pub fn verify_signature(
    verifying_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), SdnError> {
    let vk = VerifyingKey::from_bytes(verifying_key)
        .map_err(|_| SdnError::Crypto("invalid verifying key".into()))?;
    vk.verify(message, &Signature::from_bytes(signature))
        .map_err(|_| SdnError::Crypto("invalid signature".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "morning radio tomorrow prize wreck nurse try crazy employ \
         library slow cook beyond gorilla recycle antenna welcome inject hedgehog satisfy \
         virus cloth menu glue";

    #[test]
    fn derivation_matches_reference_vectors() {
        let keys = NodeKeys::from_mnemonic(TEST_MNEMONIC).unwrap();
        assert_eq!(
            hex::encode(keys.verifying_key().to_bytes()),
            "0d80e1fd5f9a4e34dfdf36a0e152bd99a65cfff8bcc6cab2757b484ae442fc8c"
        );
        assert_eq!(
            hex::encode(keys.encryption_public().as_bytes()),
            "08ea56d04396e66d534acd8c973eaf41d3e80edfd39a0712691645fe0b191741"
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = NodeKeys::from_mnemonic(TEST_MNEMONIC).unwrap();
        let b = NodeKeys::from_mnemonic(TEST_MNEMONIC).unwrap();
        assert_eq!(a.verifying_key(), b.verifying_key());
        assert_eq!(
            a.encryption_public().as_bytes(),
            b.encryption_public().as_bytes()
        );
    }

    #[test]
    fn signing_and_encryption_paths_differ() {
        let seed = seed_from_mnemonic(TEST_MNEMONIC).unwrap();
        let a = derive_hardened(&seed, &SIGNING_KEY_PATH);
        let b = derive_hardened(&seed, &ENCRYPTION_KEY_PATH);
        assert_ne!(a.as_ref(), b.as_ref());
    }

    #[test]
    fn sign_verify_round_trip() {
        let keys = NodeKeys::from_mnemonic(TEST_MNEMONIC).unwrap();
        let msg = b"039058c6f2c0cb492c533b0a4d14ef77cc0f78abccced5287d84a1a2011cfb81";
        let sig = keys.sign(msg);
        assert!(verify_signature(
            &keys.verifying_key().to_bytes(),
            msg,
            &sig.to_bytes()
        )
        .is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let keys = NodeKeys::from_mnemonic(TEST_MNEMONIC).unwrap();
        let sig = keys.sign(b"original");
        assert!(verify_signature(
            &keys.verifying_key().to_bytes(),
            b"tampered",
            &sig.to_bytes()
        )
        .is_err());
    }

    #[test]
    fn generated_mnemonics_are_24_words_and_unique() {
        let a = generate_mnemonic().unwrap();
        let b = generate_mnemonic().unwrap();
        assert_eq!(a.word_count(), 24);
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn rejects_short_mnemonic() {
        // 12 words is a valid BIP-39 phrase but not a valid node identity.
        let twelve = "legal winner thank year wave sausage worth useful legal winner thank yellow";
        assert!(seed_from_mnemonic(twelve).is_err());
    }
}
