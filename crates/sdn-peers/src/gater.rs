use crate::registry::PeerRegistry;
use libp2p::PeerId;
use std::sync::Arc;
use tracing::debug;

/// Observability callback invoked with `(peer_id, reason)` on refusal.
pub type RefusalHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Admission decisions for the overlay, mirroring its call ordering:
/// a pre-identity accept check (always allowed) and post-identity checks
/// that consult the registry.
pub struct ConnectionGater {
    registry: Arc<PeerRegistry>,
    on_refuse: Option<RefusalHook>,
}

impl ConnectionGater {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self {
            registry,
            on_refuse: None,
        }
    }

    pub fn with_refusal_hook(mut self, hook: RefusalHook) -> Self {
        self.on_refuse = Some(hook);
        self
    }

    /// Called before the remote identity is known. Nothing to consult yet.
    pub fn intercept_accept(&self) -> bool {
        true
    }

    /// Called when dialing a known peer id.
    pub fn intercept_peer_dial(&self, peer: &PeerId) -> bool {
        self.decide(peer)
    }

    /// Called once an inbound connection has been secured and the remote
    /// identity is established.
    pub fn intercept_secured(&self, peer: &PeerId) -> bool {
        self.decide(peer)
    }

    fn decide(&self, peer: &PeerId) -> bool {
        let id = peer.to_base58();
        match self.registry.admission_decision(&id) {
            Ok(()) => true,
            Err(reason) => {
                debug!(peer = %id, reason, "connection refused");
                if let Some(hook) = &self.on_refuse {
                    hook(&id, reason);
                }
                false
            }
        }
    }
}
