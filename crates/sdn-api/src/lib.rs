//! sdn-api
//!
//! The administrative HTTP surface consumed by the (out-of-tree) admin UI:
//! health, first-run setup, both login flows, session management, profile
//! read/update, and audit queries. Session cookies are HttpOnly and
//! SameSite=Strict; `Secure` and proxy headers are honored only when the
//! immediate peer is loopback.

pub mod error;
pub mod handlers;
pub mod net;
pub mod server;

pub use error::ApiError;
pub use server::{serve, ApiState, SetupOutcome};
