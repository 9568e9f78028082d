//! ─── SDN Protocol Constants ─────────────────────────────────────────────────
//!
//! Wire limits, timeouts, and rate-limit dimensioning for the space-data
//! exchange protocol. All are defaults; the node config may override the
//! configurable ones.

// ── Protocol identifiers ─────────────────────────────────────────────────────

/// libp2p protocol id for the framed exchange protocol.
pub const EXCHANGE_PROTOCOL_ID: &str = "/spacedatanetwork/sds-exchange/1.0.0";

/// Prefix for schema-derived gossip topics: `"sdn/<schema>"`.
pub const TOPIC_PREFIX: &str = "sdn";

/// Reserved topic for profile notification messages.
pub const PNM_TOPIC: &str = "PNM";

// ── Frame limits ─────────────────────────────────────────────────────────────

/// Maximum total message size accepted on a stream (10 MiB).
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Maximum schema name length in bytes.
pub const MAX_SCHEMA_NAME_BYTES: usize = 256;

/// Maximum opaque query payload size (4 KiB).
pub const MAX_QUERY_BYTES: usize = 4 * 1024;

/// Maximum rows returned by a wire query.
pub const MAX_QUERY_ROWS: usize = 100;

/// Maximum cumulative payload bytes returned by a wire query (2 MiB).
pub const MAX_QUERY_RESULT_BYTES: usize = 2 * 1024 * 1024;

// ── Timeouts (seconds) ───────────────────────────────────────────────────────

/// Whole-handler deadline for one exchange stream.
pub const HANDLER_TIMEOUT_SECS: u64 = 30;

/// Per-read deadline on an exchange stream.
pub const READ_TIMEOUT_SECS: u64 = 10;

/// Schema validation deadline.
pub const VALIDATION_TIMEOUT_SECS: u64 = 5;

// ── Rate limiting ────────────────────────────────────────────────────────────

/// Base messages-per-second rate at trust Standard.
pub const RATE_BASE_MSGS_PER_SEC: f64 = 10.0;

/// Base messages-per-minute rate at trust Standard.
pub const RATE_BASE_MSGS_PER_MIN: f64 = 600.0;

/// Base burst capacity at trust Standard.
pub const RATE_BASE_BURST: f64 = 20.0;

// ── Sessions and challenges ──────────────────────────────────────────────────

/// Session TTL without "remember me" (1 hour).
pub const SESSION_TTL_SECS: i64 = 3_600;

/// Session TTL with "remember me" (24 hours).
pub const SESSION_TTL_REMEMBER_SECS: i64 = 86_400;

/// Random bytes per session token (base64url rendered).
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Challenge nonce size in bytes.
pub const CHALLENGE_NONCE_BYTES: usize = 32;

/// Challenge time-to-live.
pub const CHALLENGE_TTL_SECS: i64 = 60;

/// Maximum pending challenges held in memory.
pub const MAX_PENDING_CHALLENGES: usize = 10_000;

/// Accepted clock skew on challenge request timestamps (± seconds).
pub const CHALLENGE_TS_SKEW_SECS: i64 = 120;

// ── Setup ────────────────────────────────────────────────────────────────────

/// One-time setup token entropy in bytes.
pub const SETUP_TOKEN_BYTES: usize = 16;

/// Window during which the setup token may be redeemed.
pub const SETUP_TOKEN_TTL_SECS: i64 = 600;

// ── Profile publication ──────────────────────────────────────────────────────

/// Interval between periodic EPM/PNM publications (24 hours).
pub const PROFILE_PUBLISH_INTERVAL_SECS: u64 = 86_400;

// ── Audit ────────────────────────────────────────────────────────────────────

/// Bounded audit queue depth in front of the writer task.
pub const AUDIT_QUEUE_DEPTH: usize = 1_024;

/// Default and maximum audit query row caps.
pub const AUDIT_QUERY_DEFAULT_LIMIT: usize = 100;
pub const AUDIT_QUERY_MAX_LIMIT: usize = 1_000;
