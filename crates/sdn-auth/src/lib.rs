//! sdn-auth
//!
//! Authentication for the admin surface: operator login (Argon2id password +
//! optional TOTP), challenge-response login for external users, the session
//! store both flows feed, and the one-shot first-run setup gate.
//!
//! Every credential failure surfaces as the single opaque
//! [`SdnError::AuthFailed`](sdn_core::SdnError::AuthFailed) so callers cannot
//! be used as an enumeration oracle.

pub mod password;
pub mod service;
pub mod setup;
pub mod store;
pub mod totp;

pub use service::{AuthService, ChallengeGrant};
pub use setup::SetupService;
pub use store::{AdminAccount, AuthStore, Session, UserRecord};
