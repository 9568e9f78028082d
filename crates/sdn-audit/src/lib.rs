//! sdn-audit
//!
//! Append-only log of security-relevant events (logins, key operations,
//! setup). Appends go through a bounded in-memory queue so the protocol path
//! never blocks on disk; a writer task drains the queue into sled. Overflow
//! drops the oldest queued entries and counts them.

pub mod log;

pub use log::{AuditDb, AuditEntry, AuditFilter, AuditLog};
