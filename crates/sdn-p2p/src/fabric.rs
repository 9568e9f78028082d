use sdn_core::{validate_schema_name, SchemaName, SdnError, PNM_TOPIC, TOPIC_PREFIX};
use sdn_identity::ProfileNotification;
use sdn_peers::{PeerRegistry, RateLimiter};
use sdn_schemas::SchemaRegistry;
use sdn_store::RecordStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Canonical topic name for a schema: `"sdn/<schema>"`.
pub fn topic_for_schema(schema: &str) -> String {
    format!("{TOPIC_PREFIX}/{schema}")
}

/// Inverse of [`topic_for_schema`]. The reserved PNM topic maps to itself.
pub fn schema_for_topic(topic: &str) -> Option<&str> {
    if topic == PNM_TOPIC {
        return Some(PNM_TOPIC);
    }
    let schema = topic.strip_prefix(TOPIC_PREFIX)?.strip_prefix('/')?;
    validate_schema_name(schema).ok()?;
    Some(schema)
}

/// The receive side of the topic-per-schema pub/sub fabric.
///
/// Never interprets payloads beyond schema validation; the one exception is
/// the reserved profile topic, whose envelopes are decoded for logging and
/// peer-profile bookkeeping.
pub struct TopicFabric {
    schemas: Arc<SchemaRegistry>,
    store: Arc<RecordStore>,
    registry: Arc<PeerRegistry>,
    limiter: Arc<RateLimiter>,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
}

impl TopicFabric {
    pub fn new(
        schemas: Arc<SchemaRegistry>,
        store: Arc<RecordStore>,
        registry: Arc<PeerRegistry>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            schemas,
            store,
            registry,
            limiter,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscription, returning the topic to join on the overlay.
    /// Idempotent: re-subscribing an active schema returns the same topic
    /// with no new handle.
    pub fn subscribe(&self, schema: &str) -> Result<String, SdnError> {
        validate_schema_name(schema)?;
        let mut subs = self.subscriptions.lock().expect("subscription lock poisoned");
        subs.entry(schema.to_string())
            .or_insert_with(CancellationToken::new);
        Ok(topic_for_schema(schema))
    }

    /// Cancel the subscription handle, deterministically stopping delivery
    /// for in-flight work, and return the topic to leave on the overlay.
    pub fn unsubscribe(&self, schema: &str) -> Option<String> {
        let mut subs = self.subscriptions.lock().expect("subscription lock poisoned");
        subs.remove(schema).map(|token| {
            token.cancel();
            topic_for_schema(schema)
        })
    }

    pub fn is_subscribed(&self, schema: &str) -> bool {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .contains_key(schema)
    }

    fn delivery_token(&self, schema: &str) -> Option<CancellationToken> {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .get(schema)
            .map(|t| t.child_token())
    }

    /// Handle one message delivered by the overlay.
    ///
    /// Rate limiting runs first with the sender's identifier; the
    /// distinguished `RateLimited` error lets the overlay feed its scoring.
    /// Then the §schema-name predicate, the validator, and the store.
    pub async fn deliver(
        &self,
        topic: &str,
        payload: &[u8],
        source_peer: &str,
    ) -> Result<(), SdnError> {
        if !self.limiter.allow(source_peer) {
            return Err(SdnError::RateLimited);
        }

        let Some(schema) = schema_for_topic(topic) else {
            return Err(SdnError::InvalidRequest(format!("unroutable topic {topic}")));
        };

        if schema == PNM_TOPIC {
            return self.handle_pnm(payload, source_peer);
        }

        let token = self
            .delivery_token(schema)
            .ok_or_else(|| SdnError::InvalidRequest(format!("not subscribed to {schema}")))?;

        self.schemas.validate(schema, payload).await?;
        if token.is_cancelled() {
            debug!(schema, "subscription cancelled mid-delivery; dropping record");
            return Ok(());
        }

        let name = SchemaName::new(schema)?;
        let now = chrono::Utc::now().timestamp();
        let cid = self.store.store(&name, payload, source_peer, now, None)?;
        self.registry
            .record_traffic(source_peer, now, 1, payload.len() as u64, 0, 0)?;
        debug!(schema, cid = %cid, peer = %source_peer, "record accepted from topic");
        Ok(())
    }

    /// Incoming profile announcements are decoded and logged; fetching the
    /// referenced EPM bytes is left to content routing.
    fn handle_pnm(&self, payload: &[u8], source_peer: &str) -> Result<(), SdnError> {
        match ProfileNotification::from_bytes(payload) {
            Ok(pnm) => {
                info!(
                    peer = %source_peer,
                    cid = %pnm.cid,
                    signer = %pnm.signer_address,
                    "profile notification received"
                );
                Ok(())
            }
            Err(e) => {
                warn!(peer = %source_peer, error = %e, "undecodable profile notification");
                Err(e)
            }
        }
    }
}
