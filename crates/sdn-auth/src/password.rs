//! Operator password hashing: Argon2id, 64 MiB, 3 passes, 4 lanes, PHC
//! string at rest.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use sdn_core::SdnError;

fn hasher() -> Result<Argon2<'static>, SdnError> {
    let params = Params::new(64 * 1024, 3, 4, None).map_err(|e| SdnError::Crypto(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, SdnError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| SdnError::Crypto(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC string. Malformed hashes verify
/// false rather than erroring, keeping the failure path uniform.
pub fn verify_password(password: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
