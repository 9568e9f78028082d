use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdnError {
    // ── Protocol errors ──────────────────────────────────────────────────────
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid schema name")]
    InvalidSchemaName,

    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    #[error("schema validation failed: {0}")]
    ValidationFailed(String),

    #[error("schema validation timed out")]
    ValidationTimeout,

    #[error("rate limited")]
    RateLimited,

    #[error("record not found")]
    NotFound,

    #[error("stream timed out")]
    Timeout,

    #[error("message exceeds size limit: {got} > {max} bytes")]
    MessageTooLarge { got: usize, max: usize },

    // ── Peer registry errors ─────────────────────────────────────────────────
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("peer group not found: {0}")]
    UnknownGroup(String),

    #[error("peer group already exists: {0}")]
    DuplicateGroup(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    // ── Auth errors ──────────────────────────────────────────────────────────
    // A single opaque kind for every credential failure; callers must not
    // distinguish wrong password from unknown user or stale challenge.
    #[error("authentication_failed")]
    AuthFailed,

    #[error("permission denied")]
    PermissionDenied,

    // ── Setup errors ─────────────────────────────────────────────────────────
    #[error("setup already complete")]
    SetupAlreadyComplete,

    #[error("setup not started")]
    SetupNotStarted,

    // ── Identity errors ──────────────────────────────────────────────────────
    #[error("identity error: {0}")]
    Identity(String),

    #[error("cryptography error: {0}")]
    Crypto(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for SdnError {
    fn from(e: std::io::Error) -> Self {
        SdnError::Io(e.to_string())
    }
}
