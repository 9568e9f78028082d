use crate::frame::{self, FrameLimits, Request, Response};
use sdn_core::{Cid, SchemaName, SdnError, HANDLER_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use sdn_peers::{PeerRegistry, RateLimiter};
use sdn_schemas::SchemaRegistry;
use sdn_store::RecordStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Observability callback for repeated violations: `(peer_id, kind)`.
pub type ViolationHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Consecutive violations by one peer before the hook fires.
const VIOLATION_REPORT_THRESHOLD: u32 = 3;

/// Engine tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub limits: FrameLimits,
    pub handler_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: FrameLimits::default(),
            handler_timeout: Duration::from_secs(HANDLER_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

/// Stateless request handler invoked once per bidirectional stream.
///
/// Admission consults the rate limiter before any byte is read; every read
/// sits under the per-read deadline and the whole handler under the handler
/// deadline. Protocol errors stay local to the one stream.
pub struct ExchangeEngine {
    schemas: Arc<SchemaRegistry>,
    store: Arc<RecordStore>,
    registry: Arc<PeerRegistry>,
    limiter: Arc<RateLimiter>,
    config: EngineConfig,
    violations: Mutex<HashMap<String, u32>>,
    violation_hook: Option<ViolationHook>,
}

impl ExchangeEngine {
    pub fn new(
        schemas: Arc<SchemaRegistry>,
        store: Arc<RecordStore>,
        registry: Arc<PeerRegistry>,
        limiter: Arc<RateLimiter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            schemas,
            store,
            registry,
            limiter,
            config,
            violations: Mutex::new(HashMap::new()),
            violation_hook: None,
        }
    }

    pub fn with_violation_hook(mut self, hook: ViolationHook) -> Self {
        self.violation_hook = Some(hook);
        self
    }

    /// Serve one exchange stream end to end.
    ///
    /// The returned error is for the caller's logging only; by the time it
    /// surfaces, the stream has been answered (or abandoned on timeout) and
    /// nothing else about the peer has changed.
    pub async fn serve_stream<S>(&self, peer_id: &str, mut io: S) -> Result<(), SdnError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        // Admission before the first read.
        if !self.limiter.allow(peer_id) {
            self.count_violation(peer_id, "rate-limit");
            frame::write_response(&mut io, &Response::RateLimited).await?;
            return Err(SdnError::RateLimited);
        }

        let served = tokio::time::timeout(
            self.config.handler_timeout,
            self.serve_inner(peer_id, &mut io),
        )
        .await;

        match served {
            Err(_) => {
                debug!(peer = %peer_id, "handler deadline elapsed");
                Err(SdnError::Timeout)
            }
            Ok(result) => result,
        }
    }

    async fn serve_inner<S>(&self, peer_id: &str, io: &mut S) -> Result<(), SdnError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let request = match tokio::time::timeout(
            self.config.read_timeout,
            frame::read_request(io, &self.config.limits),
        )
        .await
        {
            Err(_) => {
                debug!(peer = %peer_id, "read deadline elapsed");
                return Err(SdnError::Timeout);
            }
            Ok(Err(e)) => {
                // Framing, limit, or schema-name defects get an explicit
                // reject before the stream closes.
                if matches!(e, SdnError::MessageTooLarge { .. }) {
                    self.count_violation(peer_id, "size-limit");
                }
                frame::write_response(io, &Response::Reject).await?;
                return Err(e);
            }
            Ok(Ok(request)) => request,
        };

        let response = self.handle(peer_id, request).await;
        frame::write_response(io, &response).await
    }

    /// Dispatch one decoded request. Exposed separately so transports that
    /// already carry framed messages can reuse the same semantics.
    pub async fn handle(&self, peer_id: &str, request: Request) -> Response {
        match request {
            Request::RequestData { schema, cid } => self.handle_request_data(&schema, &cid),
            Request::PushData { schema, payload } => {
                self.handle_push_data(peer_id, &schema, &payload).await
            }
            Request::Query { schema, query } => self.handle_query(&schema, query.len()),
        }
    }

    fn handle_request_data(&self, schema: &str, cid: &str) -> Response {
        let Ok(schema) = SchemaName::new(schema) else {
            return Response::Reject;
        };
        let Ok(cid) = Cid::from_hex(cid) else {
            return Response::Reject;
        };
        match self.store.get(&schema, &cid) {
            Ok(Some(blob)) => Response::Blob(blob),
            // Unknown CID and storage trouble answer identically; rejections
            // never reveal which records exist.
            Ok(None) => Response::Reject,
            Err(e) => {
                warn!(schema = %schema, error = %e, "store lookup failed");
                Response::Reject
            }
        }
    }

    async fn handle_push_data(&self, peer_id: &str, schema: &str, payload: &[u8]) -> Response {
        let Ok(schema) = SchemaName::new(schema) else {
            return Response::Reject;
        };
        if let Err(e) = self.schemas.validate(schema.as_str(), payload).await {
            debug!(peer = %peer_id, schema = %schema, error = %e, "push rejected by validator");
            self.count_violation(peer_id, "validation");
            return Response::Reject;
        }

        let now = chrono::Utc::now().timestamp();
        match self
            .store
            .store(&schema, payload, peer_id, now, None)
        {
            Ok(cid) => {
                self.clear_violations(peer_id);
                if let Err(e) =
                    self.registry
                        .record_traffic(peer_id, now, 1, payload.len() as u64, 0, 0)
                {
                    warn!(peer = %peer_id, error = %e, "failed to record traffic");
                }
                Response::CidString(cid.to_hex())
            }
            Err(e) => {
                warn!(schema = %schema, error = %e, "store write failed");
                Response::Reject
            }
        }
    }

    /// Answer a query with the bounded whole-table scan. The opaque query
    /// bytes were already read and are deliberately discarded; accepting
    /// expressions from the network is an injection and amplification risk.
    fn handle_query(&self, schema: &str, query_len: usize) -> Response {
        let Ok(schema) = SchemaName::new(schema) else {
            return Response::Reject;
        };
        if query_len > 0 {
            debug!(schema = %schema, bytes = query_len, "discarding opaque query payload");
        }
        match self.store.query_all_bounded(
            &schema,
            self.config.limits.max_query_rows,
            self.config.limits.max_query_bytes,
        ) {
            Ok(rows) => Response::Rows(rows),
            Err(e) => {
                warn!(schema = %schema, error = %e, "store scan failed");
                Response::Reject
            }
        }
    }

    fn count_violation(&self, peer_id: &str, kind: &str) {
        let mut map = self.violations.lock().expect("violation lock poisoned");
        let count = map.entry(peer_id.to_string()).or_insert(0);
        *count += 1;
        if *count == VIOLATION_REPORT_THRESHOLD {
            warn!(peer = %peer_id, kind, "repeated protocol violations");
            if let Some(hook) = &self.violation_hook {
                hook(peer_id, kind);
            }
        }
    }

    fn clear_violations(&self, peer_id: &str) {
        self.violations
            .lock()
            .expect("violation lock poisoned")
            .remove(peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{
        encode_request, read_blob_response, read_cid_response, read_rows_response,
    };
    use sdn_core::TrustLevel;
    use sdn_peers::{AdmissionMode, MemoryStore, PeerRecord, RateLimits};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        _dir: tempfile::TempDir,
        engine: Arc<ExchangeEngine>,
        registry: Arc<PeerRegistry>,
    }

    fn harness(limits: RateLimits) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("store")).unwrap());
        let registry = Arc::new(
            PeerRegistry::open(Box::new(MemoryStore::new()), AdmissionMode::NonStrict).unwrap(),
        );
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&registry), limits));
        let engine = Arc::new(ExchangeEngine::new(
            Arc::new(SchemaRegistry::builtin()),
            store,
            Arc::clone(&registry),
            limiter,
            EngineConfig::default(),
        ));
        Harness {
            _dir: dir,
            engine,
            registry,
        }
    }

    /// Run one request through a duplex pipe and return the raw response side.
    async fn roundtrip(engine: Arc<ExchangeEngine>, peer: &str, request: Request) -> tokio::io::DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024 * 1024);
        let peer = peer.to_string();
        let serve = tokio::spawn(async move {
            let _ = engine.serve_stream(&peer, server).await;
        });
        let (mut read_half, mut write_half) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(&mut write_half, &encode_request(&request))
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::shutdown(&mut write_half).await.unwrap();
        serve.await.unwrap();
        read_half.unsplit(write_half)
    }

    #[tokio::test]
    async fn push_then_fetch() {
        let h = harness(RateLimits::default());
        let blob = vec![0x01, 0x02, 0x03];

        let mut io = roundtrip(
            Arc::clone(&h.engine),
            "peerA",
            Request::PushData {
                schema: "OMM".into(),
                payload: blob.clone(),
            },
        )
        .await;
        let pushed = read_cid_response(&mut io, &FrameLimits::default())
            .await
            .unwrap();
        let Response::CidString(cid) = pushed else {
            panic!("expected CID, got {pushed:?}");
        };
        assert_eq!(
            cid,
            "039058c6f2c0cb492c533b0a4d14ef77cc0f78abccced5287d84a1a2011cfb81"
        );

        let mut io = roundtrip(
            Arc::clone(&h.engine),
            "peerB",
            Request::RequestData {
                schema: "OMM".into(),
                cid,
            },
        )
        .await;
        assert_eq!(
            read_blob_response(&mut io, &FrameLimits::default())
                .await
                .unwrap(),
            Response::Blob(blob)
        );
    }

    #[tokio::test]
    async fn unknown_cid_is_rejected() {
        let h = harness(RateLimits::default());
        let mut io = roundtrip(
            h.engine,
            "peerA",
            Request::RequestData {
                schema: "OMM".into(),
                cid: "ab".repeat(32),
            },
        )
        .await;
        assert_eq!(
            read_blob_response(&mut io, &FrameLimits::default())
                .await
                .unwrap(),
            Response::Reject
        );
    }

    #[tokio::test]
    async fn unknown_schema_push_is_rejected() {
        let h = harness(RateLimits::default());
        let mut io = roundtrip(
            h.engine,
            "peerA",
            Request::PushData {
                schema: "NOPE".into(),
                payload: vec![1],
            },
        )
        .await;
        assert_eq!(
            read_cid_response(&mut io, &FrameLimits::default())
                .await
                .unwrap(),
            Response::Reject
        );
    }

    #[tokio::test]
    async fn limited_peer_hits_rate_limit_on_21st_frame() {
        let limits = RateLimits {
            base_msgs_per_sec: 100.0,
            base_msgs_per_min: 6_000.0,
            base_burst: 100.0,
        };
        let h = harness(limits);
        h.registry
            .add_peer(PeerRecord::new("P", TrustLevel::Limited, 0))
            .unwrap();

        let mut accepted = 0;
        let mut limited = 0;
        for i in 0u32..21 {
            let mut io = roundtrip(
                Arc::clone(&h.engine),
                "P",
                Request::PushData {
                    schema: "OMM".into(),
                    payload: i.to_be_bytes().to_vec(),
                },
            )
            .await;
            match read_cid_response(&mut io, &FrameLimits::default())
                .await
                .unwrap()
            {
                Response::CidString(_) => accepted += 1,
                Response::RateLimited => limited += 1,
                other => panic!("unexpected response {other:?}"),
            }
        }
        assert_eq!(accepted, 20);
        assert_eq!(limited, 1);
    }

    #[tokio::test]
    async fn query_discards_filter_and_caps_results() {
        let h = harness(RateLimits::default());
        let cdm = SchemaName::new("CDM").unwrap();
        // 120 records of 30 KiB: the row cap alone would admit 100 but the
        // 2 MiB byte cap stops at 68.
        for i in 0u8..120 {
            let blob = vec![i; 30 * 1024];
            h.engine.store.store(&cdm, &blob, "seed", 0, None).unwrap();
        }

        let mut io = roundtrip(
            Arc::clone(&h.engine),
            "peerA",
            Request::Query {
                schema: "CDM".into(),
                query: b"SELECT * FROM CDM; DROP TABLE CDM".to_vec(),
            },
        )
        .await;
        let Response::Rows(rows) = read_rows_response(&mut io, &FrameLimits::default())
            .await
            .unwrap()
        else {
            panic!("expected rows");
        };
        assert!(rows.len() <= 100);
        let total: usize = rows.iter().map(|r| r.len()).sum();
        assert!(total <= 2 * 1024 * 1024);
        assert_eq!(rows.len(), 68);
    }

    #[tokio::test]
    async fn violation_hook_fires_after_three_failures() {
        let fired = Arc::new(AtomicU32::new(0));
        let h = harness(RateLimits::default());
        let count = Arc::clone(&fired);
        let engine = Arc::new(
            ExchangeEngine::new(
                Arc::new(SchemaRegistry::builtin()),
                Arc::clone(&h.engine.store),
                Arc::clone(&h.registry),
                Arc::new(RateLimiter::new(
                    Arc::clone(&h.registry),
                    RateLimits::default(),
                )),
                EngineConfig::default(),
            )
            .with_violation_hook(Arc::new(move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            })),
        );

        for _ in 0..3 {
            let mut io = roundtrip(
                Arc::clone(&engine),
                "P",
                Request::PushData {
                    schema: "OMM".into(),
                    payload: vec![], // empty payload fails structural validation
                },
            )
            .await;
            let _ = read_cid_response(&mut io, &FrameLimits::default()).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Violations never touch the registry; promotion and demotion stay
        // administrative actions.
        assert!(h.registry.get_peer("P").is_none());
    }

    #[tokio::test]
    async fn malformed_stream_gets_reject_and_close() {
        let h = harness(RateLimits::default());
        let (client, server) = tokio::io::duplex(4096);
        let engine = Arc::clone(&h.engine);
        let serve = tokio::spawn(async move { engine.serve_stream("P", server).await });

        let (mut read_half, mut write_half) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(&mut write_half, &[0xff, 0x00, 0x01])
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::shutdown(&mut write_half).await.unwrap();

        assert!(serve.await.unwrap().is_err());
        let mut byte = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut read_half, &mut byte)
            .await
            .unwrap();
        assert_eq!(byte[0], frame::RESP_REJECT);
    }
}
