//! sdn-peers
//!
//! Durable peer registry (trust levels, groups, block list), the connection
//! gater that enforces admission policy for the overlay, and the trust-scaled
//! token-bucket rate limiter.

pub mod gater;
pub mod persist;
pub mod rate_limit;
pub mod registry;

pub use gater::{ConnectionGater, RefusalHook};
pub use persist::{JsonFileStore, MemoryStore, PeerStore, SledStore};
pub use rate_limit::{RateLimiter, RateLimits};
pub use registry::{AdmissionMode, PeerGroup, PeerRecord, PeerRegistry, PeerStats};
