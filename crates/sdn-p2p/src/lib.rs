//! sdn-p2p
//!
//! libp2p overlay hosting for the node: GossipSub carries the topic-per-schema
//! record fabric and the reserved profile topic, Kademlia handles discovery,
//! and inbound `/spacedatanetwork/sds-exchange/1.0.0` streams are dispatched
//! to the exchange engine. Admission (gater + rate limiter) is enforced here,
//! at the edge, before any payload reaches the core.

pub mod config;
pub mod fabric;
pub mod network;

pub use config::P2pConfig;
pub use fabric::{schema_for_topic, topic_for_schema, TopicFabric};
pub use network::{P2pCommand, P2pHandle, P2pNetwork};
