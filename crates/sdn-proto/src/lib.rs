//! sdn-proto
//!
//! The framed exchange protocol: length-prefixed binary requests/responses on
//! one bidirectional stream per request, all integers big-endian. The engine
//! is stateless per stream; admission, limits, and deadlines bound every
//! handler before any work is done.

pub mod engine;
pub mod frame;

pub use engine::{EngineConfig, ExchangeEngine, ViolationHook};
pub use frame::{FrameLimits, Request, Response};
