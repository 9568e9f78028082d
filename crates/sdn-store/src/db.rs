use sdn_core::{Cid, SchemaName, SdnError, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// A validated record at rest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRecord {
    pub schema: String,
    pub cid: Cid,
    pub blob: Vec<u8>,
    /// Overlay identifier of the peer the record was first seen from.
    pub source_peer: String,
    pub first_seen: Timestamp,
    /// Optional detached signature carried alongside the payload.
    pub aux_signature: Option<Vec<u8>>,
}

/// Content-addressed record store backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   records   — schema \0 seq_be8      → bincode(StoredRecord)
///   cid_index — schema \0 cid_bytes32  → seq_be8
///   meta      — utf8 key bytes         → raw bytes
///
/// Schema names cannot contain NUL (safe character class), so the `\0`
/// separator keeps per-schema key ranges prefix-free. The sequence number
/// ascends per store, giving scans a stable insertion order.
pub struct RecordStore {
    _db: sled::Db,
    records: sled::Tree,
    cid_index: sled::Tree,
    meta: sled::Tree,
    // Linearizes the lookup-then-insert pair so two concurrent identical
    // blobs observe at most one row and both return the same CID.
    write_lock: Mutex<()>,
}

fn storage_err(e: impl std::fmt::Display) -> SdnError {
    SdnError::Storage(e.to_string())
}

fn record_key(schema: &SchemaName, seq: u64) -> Vec<u8> {
    let mut key = schema.as_str().as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn cid_key(schema: &SchemaName, cid: &Cid) -> Vec<u8> {
    let mut key = schema.as_str().as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(cid.as_bytes());
    key
}

fn schema_prefix(schema: &SchemaName) -> Vec<u8> {
    let mut prefix = schema.as_str().as_bytes().to_vec();
    prefix.push(0);
    prefix
}

impl RecordStore {
    /// Open or create the record store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SdnError> {
        let db = sled::open(path).map_err(storage_err)?;
        let records = db.open_tree("records").map_err(storage_err)?;
        let cid_index = db.open_tree("cid_index").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            records,
            cid_index,
            meta,
            write_lock: Mutex::new(()),
        })
    }

    /// Store a validated record, returning its CID.
    ///
    /// Duplicate (schema, CID) pairs are idempotent: the original row and its
    /// first-seen metadata are kept, and the same CID is returned.
    pub fn store(
        &self,
        schema: &SchemaName,
        blob: &[u8],
        source_peer: &str,
        now: Timestamp,
        aux_signature: Option<&[u8]>,
    ) -> Result<Cid, SdnError> {
        let cid = Cid::from_blob(blob);
        let index_key = cid_key(schema, &cid);

        let _guard = self.write_lock.lock().map_err(|_| {
            SdnError::Storage("record store write lock poisoned".into())
        })?;

        if self.cid_index.contains_key(&index_key).map_err(storage_err)? {
            debug!(schema = %schema, cid = %cid, "duplicate record, keeping original");
            return Ok(cid);
        }

        let seq = self.next_seq()?;
        let record = StoredRecord {
            schema: schema.as_str().to_string(),
            cid: cid.clone(),
            blob: blob.to_vec(),
            source_peer: source_peer.to_string(),
            first_seen: now,
            aux_signature: aux_signature.map(|s| s.to_vec()),
        };
        let bytes = bincode::serialize(&record).map_err(|e| SdnError::Serialization(e.to_string()))?;

        self.records
            .insert(record_key(schema, seq), bytes)
            .map_err(storage_err)?;
        self.cid_index
            .insert(index_key, seq.to_be_bytes().as_ref())
            .map_err(storage_err)?;

        Ok(cid)
    }

    /// Fetch a record payload by (schema, CID).
    pub fn get(&self, schema: &SchemaName, cid: &Cid) -> Result<Option<Vec<u8>>, SdnError> {
        let Some(seq_bytes) = self.cid_index.get(cid_key(schema, cid)).map_err(storage_err)?
        else {
            return Ok(None);
        };
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&seq_bytes);
        let Some(bytes) = self
            .records
            .get(record_key(schema, u64::from_be_bytes(seq)))
            .map_err(storage_err)?
        else {
            return Ok(None);
        };
        let record: StoredRecord =
            bincode::deserialize(&bytes).map_err(|e| SdnError::Serialization(e.to_string()))?;
        Ok(Some(record.blob))
    }

    /// Return up to `max_rows` payloads of `schema`, stopping before the
    /// cumulative payload size would exceed `max_bytes`.
    ///
    /// Order is ascending insertion sequence, stable across identical calls.
    pub fn query_all_bounded(
        &self,
        schema: &SchemaName,
        max_rows: usize,
        max_bytes: usize,
    ) -> Result<Vec<Vec<u8>>, SdnError> {
        let mut out = Vec::new();
        let mut total = 0usize;
        for item in self.records.scan_prefix(schema_prefix(schema)) {
            if out.len() >= max_rows {
                break;
            }
            let (_, bytes) = item.map_err(storage_err)?;
            let record: StoredRecord =
                bincode::deserialize(&bytes).map_err(|e| SdnError::Serialization(e.to_string()))?;
            if total + record.blob.len() > max_bytes {
                break;
            }
            total += record.blob.len();
            out.push(record.blob);
        }
        Ok(out)
    }

    /// Count records stored under one schema.
    pub fn count(&self, schema: &SchemaName) -> u64 {
        self.records.scan_prefix(schema_prefix(schema)).count() as u64
    }

    /// Count records across all schemas.
    pub fn count_all(&self) -> u64 {
        self.records.len() as u64
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), SdnError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    fn next_seq(&self) -> Result<u64, SdnError> {
        let key = "next_seq";
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
}
