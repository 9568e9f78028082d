//! sdn-crypto
//!
//! Hierarchical-deterministic node identity: a 24-word BIP-39 mnemonic yields
//! the seed; SLIP-0010 all-hardened derivation yields the Ed25519 signing key
//! and the X25519 encryption key. The seed rests on disk encrypted under a
//! password run through Argon2id.

pub mod hd;
pub mod keystore;

pub use hd::{verify_signature, NodeKeys, ENCRYPTION_KEY_PATH, SIGNING_KEY_PATH};
pub use keystore::{load_seed, save_seed};
