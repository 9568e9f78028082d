use crate::profile::ProfileNotification;
use crate::service::IdentityService;
use sdn_core::{SchemaName, SdnError, PNM_TOPIC, PROFILE_PUBLISH_INTERVAL_SECS};
use sdn_store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where PNM envelopes go out. Implemented by the p2p layer's topic fabric;
/// kept as a seam so the publisher can be driven without a live swarm.
pub trait TopicPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SdnError>;
}

/// Long-lived task that stores an EPM snapshot and announces its CID on the
/// reserved topic: once at startup, then every publish interval.
pub struct ProfilePublisher {
    identity: Arc<IdentityService>,
    store: Arc<RecordStore>,
    sink: Arc<dyn TopicPublisher>,
    signer_address: String,
    interval: Duration,
}

impl ProfilePublisher {
    pub fn new(
        identity: Arc<IdentityService>,
        store: Arc<RecordStore>,
        sink: Arc<dyn TopicPublisher>,
        signer_address: String,
    ) -> Self {
        Self {
            identity,
            store,
            sink,
            signer_address,
            interval: Duration::from_secs(PROFILE_PUBLISH_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Snapshot, store, sign, announce. One tick of the publisher.
    pub fn publish_once(&self) -> Result<String, SdnError> {
        let epm = self.identity.epm_snapshot();
        let bytes = epm.to_bytes()?;
        let schema = SchemaName::new("EPM").expect("EPM is a valid schema name");
        let now = chrono::Utc::now().timestamp();
        let cid = self
            .store
            .store(&schema, &bytes, &self.signer_address, now, None)?;

        let pnm = ProfileNotification::sign(
            self.identity.keys(),
            &cid.to_hex(),
            "EPM",
            &self.signer_address,
            now,
        );
        self.sink.publish(PNM_TOPIC, pnm.to_bytes()?)?;
        info!(cid = %cid, "profile published");
        Ok(cid.to_hex())
    }

    /// Run until cancelled. A failed tick logs at debug and waits for the
    /// next one; the overlay may simply not be ready yet.
    pub async fn run(self, cancel: CancellationToken) {
        let mut timer = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.publish_once() {
                        debug!(error = %e, "profile publish failed; will retry next tick");
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("profile publisher stopped");
                    return;
                }
            }
        }
    }
}
