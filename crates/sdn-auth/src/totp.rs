//! RFC 6238 TOTP: HMAC-SHA-1, 6 digits, 30-second step, ±1 step tolerance,
//! with a replay cache so a code cannot authenticate twice within its
//! tolerance window.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sdn_core::SdnError;
use sha1::Sha1;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

type HmacSha1 = Hmac<Sha1>;

const STEP_SECS: i64 = 30;
const DIGITS: u32 = 6;
const TOLERANCE_STEPS: i64 = 1;

// RFC 4648 base32, no padding — the alphabet authenticator apps expect.
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    for chunk in data.chunks(5) {
        let mut buf = [0u8; 5];
        buf[..chunk.len()].copy_from_slice(chunk);
        let bits = u64::from_be_bytes([0, 0, 0, buf[0], buf[1], buf[2], buf[3], buf[4]]);
        let symbols = (chunk.len() * 8).div_ceil(5);
        for i in 0..symbols {
            let shift = 35 - i * 5;
            out.push(BASE32_ALPHABET[((bits >> shift) & 0x1f) as usize] as char);
        }
    }
    out
}

pub fn base32_decode(s: &str) -> Result<Vec<u8>, SdnError> {
    let mut bits = 0u64;
    let mut bit_count = 0u32;
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    for c in s.bytes() {
        let value = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a',
            b'2'..=b'7' => c - b'2' + 26,
            _ => return Err(SdnError::Crypto("invalid base32 character".into())),
        };
        bits = (bits << 5) | value as u64;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
        }
    }
    Ok(out)
}

/// Mint a fresh 20-byte shared secret, base32-rendered for enrollment.
pub fn generate_secret() -> String {
    let mut secret = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    base32_encode(&secret)
}

fn hotp(secret: &[u8], counter: u64) -> String {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = (digest[19] & 0x0f) as usize;
    let code = (u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7fff_ffff)
        % 10u32.pow(DIGITS);
    format!("{code:06}")
}

/// The expected code for a secret at a Unix time. Exposed for enrollment QA
/// flows and tests.
pub fn code_at(secret_b32: &str, unix_time: i64) -> Result<String, SdnError> {
    let secret = base32_decode(secret_b32)?;
    Ok(hotp(&secret, (unix_time / STEP_SECS) as u64))
}

/// Replay cache of consumed (account, step counter) pairs.
pub struct ReplayCache {
    consumed: Mutex<HashMap<String, HashSet<u64>>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self {
            consumed: Mutex::new(HashMap::new()),
        }
    }

    fn take(&self, account: &str, counter: u64) -> bool {
        let mut map = self.consumed.lock().expect("replay cache lock poisoned");
        let set = map.entry(account.to_string()).or_default();
        // Counters older than the tolerance window can never verify again.
        set.retain(|&c| c + 2 * TOLERANCE_STEPS as u64 >= counter);
        set.insert(counter)
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify a submitted code for `account` at `unix_time`, consuming the
/// matching step so the same code is rejected on replay.
pub fn verify_code(
    secret_b32: &str,
    account: &str,
    code: &str,
    unix_time: i64,
    replay: &ReplayCache,
) -> bool {
    let Ok(secret) = base32_decode(secret_b32) else {
        return false;
    };
    let current = unix_time / STEP_SECS;
    for step in (current - TOLERANCE_STEPS)..=(current + TOLERANCE_STEPS) {
        if step < 0 {
            continue;
        }
        if hotp(&secret, step as u64) == code {
            return replay.take(account, step as u64);
        }
    }
    false
}
