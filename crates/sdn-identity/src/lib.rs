//! sdn-identity
//!
//! The node's own identity: HD-derived keys unlocked from the encrypted
//! seed, the entity profile record (EPM) describing this node, and the
//! signed profile notification (PNM) announcing the EPM's CID on the
//! reserved topic, republished periodically.

pub mod profile;
pub mod publisher;
pub mod service;

pub use profile::{EntityProfile, ProfileNotification};
pub use publisher::{ProfilePublisher, TopicPublisher};
pub use service::{IdentityService, ProfileFields};
