//! Encrypted seed file.
//!
//! On-disk layout: `MAGIC(8) || SALT(16) || NONCE(12) || CIPHERTEXT+TAG`.
//! The content key is Argon2id(password, salt) with 64 MiB memory, 3 passes,
//! 4 lanes; the AEAD is ChaCha20-Poly1305. Files are written atomically
//! (tmp + rename) with owner-only permissions.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sdn_core::SdnError;
use std::fs;
use std::io::Write;
use std::path::Path;
use zeroize::Zeroizing;

const SEED_FILE_MAGIC: &[u8; 8] = b"SDNSEED1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

// Argon2id work factors: 64 MiB, 3 iterations, 4 lanes.
const KDF_MEMORY_KIB: u32 = 64 * 1024;
const KDF_ITERATIONS: u32 = 3;
const KDF_PARALLELISM: u32 = 4;

fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> Result<Zeroizing<[u8; 32]>, SdnError> {
    let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, KDF_PARALLELISM, Some(32))
        .map_err(|e| SdnError::Crypto(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|e| SdnError::Crypto(e.to_string()))?;
    Ok(key)
}

fn set_owner_only(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), SdnError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        let _ = f.sync_all();
    }
    set_owner_only(&tmp);
    fs::rename(&tmp, path)?;
    set_owner_only(path);
    Ok(())
}

/// Encrypt and persist the 64-byte identity seed.
pub fn save_seed(path: &Path, seed: &[u8; 64], password: &str) -> Result<(), SdnError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), seed.as_ref())
        .map_err(|_| SdnError::Crypto("seed encryption failed".into()))?;

    let mut out = Vec::with_capacity(SEED_FILE_MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(SEED_FILE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    atomic_write(path, &out)
}

/// Load and decrypt the identity seed.
///
/// A wrong password surfaces as a `Crypto` error (AEAD tag mismatch); the
/// caller maps it to the uniform auth failure where one is required.
pub fn load_seed(path: &Path, password: &str) -> Result<Zeroizing<[u8; 64]>, SdnError> {
    let bytes = fs::read(path)?;
    let header = SEED_FILE_MAGIC.len() + SALT_LEN + NONCE_LEN;
    if bytes.len() < header + 16 || &bytes[..SEED_FILE_MAGIC.len()] != SEED_FILE_MAGIC {
        return Err(SdnError::Crypto("unrecognized seed file".into()));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes[SEED_FILE_MAGIC.len()..SEED_FILE_MAGIC.len() + SALT_LEN]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes[SEED_FILE_MAGIC.len() + SALT_LEN..header]);

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let plain = cipher
        .decrypt(Nonce::from_slice(&nonce), &bytes[header..])
        .map_err(|_| SdnError::Crypto("seed decryption failed".into()))?;

    if plain.len() != 64 {
        return Err(SdnError::Crypto("seed file holds unexpected payload".into()));
    }
    let mut seed = Zeroizing::new([0u8; 64]);
    seed.copy_from_slice(&plain);
    Ok(seed)
}
