use sdn_core::{
    AuditSeverity, SdnError, Timestamp, AUDIT_QUERY_DEFAULT_LIMIT, AUDIT_QUERY_MAX_LIMIT,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One audit row. Ids ascend monotonically; entries outlive the sessions and
/// users they mention.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    pub timestamp: Timestamp,
    pub event_type: String,
    pub severity: AuditSeverity,
    pub message: String,
    #[serde(default)]
    pub detail: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Query shape for the bounded audit read.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub event_type: Option<String>,
    pub min_severity: Option<AuditSeverity>,
    pub since: Option<Timestamp>,
    pub limit: Option<usize>,
}

// ── Persistent side ──────────────────────────────────────────────────────────

/// Audit storage backed by sled.
///
/// Named trees:
///   audit — id_be8 → bincode(AuditEntry)
///   meta  — "next_id" → u64 be
pub struct AuditDb {
    _db: sled::Db,
    entries: sled::Tree,
    meta: sled::Tree,
}

fn storage_err(e: impl std::fmt::Display) -> SdnError {
    SdnError::Storage(e.to_string())
}

impl AuditDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SdnError> {
        let db = sled::open(path).map_err(storage_err)?;
        let entries = db.open_tree("audit").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            entries,
            meta,
        })
    }

    fn next_id(&self) -> Result<u64, SdnError> {
        let key = "next_id";
        let current = self
            .meta
            .get(key)
            .map_err(storage_err)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(1);
        self.meta
            .insert(key, (current + 1).to_be_bytes().as_ref())
            .map_err(storage_err)?;
        Ok(current)
    }

    fn write(&self, pending: PendingEntry) -> Result<u64, SdnError> {
        let id = self.next_id()?;
        let entry = AuditEntry {
            id,
            timestamp: pending.timestamp,
            event_type: pending.event_type,
            severity: pending.severity,
            message: pending.message,
            detail: pending.detail,
            actor: pending.actor,
        };
        let bytes =
            bincode::serialize(&entry).map_err(|e| SdnError::Serialization(e.to_string()))?;
        self.entries
            .insert(id.to_be_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Newest-first bounded read.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, SdnError> {
        let limit = filter
            .limit
            .unwrap_or(AUDIT_QUERY_DEFAULT_LIMIT)
            .min(AUDIT_QUERY_MAX_LIMIT);
        let mut out = Vec::new();
        for item in self.entries.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = item.map_err(storage_err)?;
            let entry: AuditEntry =
                bincode::deserialize(&bytes).map_err(|e| SdnError::Serialization(e.to_string()))?;
            if let Some(t) = &filter.event_type {
                if entry.event_type != *t {
                    continue;
                }
            }
            if let Some(min) = filter.min_severity {
                if entry.severity < min {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if entry.timestamp < since {
                    // Ids ascend with time, so everything earlier is older.
                    break;
                }
            }
            out.push(entry);
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), SdnError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

// ── Queued side ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct PendingEntry {
    timestamp: Timestamp,
    event_type: String,
    severity: AuditSeverity,
    message: String,
    detail: BTreeMap<String, serde_json::Value>,
    actor: Option<String>,
}

/// Non-blocking append handle in front of [`AuditDb`].
pub struct AuditLog {
    db: AuditDb,
    queue: Mutex<VecDeque<PendingEntry>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl AuditLog {
    pub fn new(db: AuditDb, capacity: usize) -> Self {
        Self {
            db,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an entry. Never blocks; on overflow the oldest queued entry is
    /// dropped and counted.
    pub fn append(
        &self,
        event_type: &str,
        severity: AuditSeverity,
        message: impl Into<String>,
        detail: BTreeMap<String, serde_json::Value>,
        actor: Option<&str>,
    ) {
        let entry = PendingEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: event_type.to_string(),
            severity,
            message: message.into(),
            detail,
            actor: actor.map(str::to_string),
        };
        let mut queue = self.queue.lock().expect("audit queue lock poisoned");
        if queue.len() >= self.capacity {
            queue.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_total = total, "audit queue overflow, dropping oldest");
        }
        queue.push_back(entry);
        drop(queue);
        self.notify.notify_one();
    }

    /// Entries dropped due to queue overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Synchronously write everything queued. Called by the writer task and
    /// by shutdown.
    pub fn drain(&self) -> Result<usize, SdnError> {
        let batch: Vec<PendingEntry> = {
            let mut queue = self.queue.lock().expect("audit queue lock poisoned");
            queue.drain(..).collect()
        };
        let count = batch.len();
        for pending in batch {
            self.db.write(pending)?;
        }
        Ok(count)
    }

    /// Writer task: drain on wakeup until cancelled, then flush the tail.
    pub async fn run_writer(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    if let Err(e) = self.drain() {
                        warn!(error = %e, "audit writer failed");
                    }
                }
                _ = cancel.cancelled() => {
                    if let Err(e) = self.drain() {
                        warn!(error = %e, "audit writer failed during shutdown");
                    }
                    let _ = self.db.flush();
                    debug!("audit writer stopped");
                    return;
                }
            }
        }
    }

    /// Bounded newest-first query over the persisted entries.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, SdnError> {
        self.db.query(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_log(capacity: usize) -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let db = AuditDb::open(dir.path().join("audit")).unwrap();
        (dir, AuditLog::new(db, capacity))
    }

    #[test]
    fn append_drain_query() {
        let (_dir, log) = open_log(16);
        log.append("login", AuditSeverity::Info, "operator login", BTreeMap::new(), Some("admin"));
        log.append("setup", AuditSeverity::Warning, "setup token minted", BTreeMap::new(), None);
        assert_eq!(log.drain().unwrap(), 2);

        let all = log.query(&AuditFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].event_type, "setup");
        assert_eq!(all[1].event_type, "login");
        assert_eq!(all[1].actor.as_deref(), Some("admin"));
        assert!(all[0].id > all[1].id);
    }

    #[test]
    fn filters_by_type_and_severity() {
        let (_dir, log) = open_log(16);
        log.append("login", AuditSeverity::Info, "a", BTreeMap::new(), None);
        log.append("login", AuditSeverity::Error, "b", BTreeMap::new(), None);
        log.append("key_export", AuditSeverity::Critical, "c", BTreeMap::new(), None);
        log.drain().unwrap();

        let logins = log
            .query(&AuditFilter {
                event_type: Some("login".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(logins.len(), 2);

        let severe = log
            .query(&AuditFilter {
                min_severity: Some(AuditSeverity::Error),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(severe.len(), 2);
        assert_eq!(severe[0].event_type, "key_export");
    }

    #[test]
    fn limit_is_capped() {
        let (_dir, log) = open_log(4096);
        for i in 0..1_200 {
            log.append("tick", AuditSeverity::Info, format!("{i}"), BTreeMap::new(), None);
        }
        log.drain().unwrap();

        let default_page = log.query(&AuditFilter::default()).unwrap();
        assert_eq!(default_page.len(), AUDIT_QUERY_DEFAULT_LIMIT);

        let big_page = log
            .query(&AuditFilter {
                limit: Some(10_000),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(big_page.len(), AUDIT_QUERY_MAX_LIMIT);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let (_dir, log) = open_log(3);
        for i in 0..5 {
            log.append("tick", AuditSeverity::Info, format!("{i}"), BTreeMap::new(), None);
        }
        assert_eq!(log.dropped(), 2);
        log.drain().unwrap();

        let kept = log.query(&AuditFilter::default()).unwrap();
        let messages: Vec<_> = kept.iter().map(|e| e.message.as_str()).collect();
        // Oldest two were dropped; newest first.
        assert_eq!(messages, vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn writer_drains_until_cancelled() {
        let (_dir, log) = open_log(16);
        let log = std::sync::Arc::new(log);
        let cancel = CancellationToken::new();
        let writer = {
            let log = std::sync::Arc::clone(&log);
            let cancel = cancel.clone();
            tokio::spawn(async move { log.run_writer(cancel).await })
        };

        log.append("login", AuditSeverity::Info, "x", BTreeMap::new(), None);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(log.query(&AuditFilter::default()).unwrap().len(), 1);

        // Entries queued at shutdown still land.
        log.append("logout", AuditSeverity::Info, "y", BTreeMap::new(), None);
        cancel.cancel();
        writer.await.unwrap();
        assert_eq!(log.query(&AuditFilter::default()).unwrap().len(), 2);
    }
}
