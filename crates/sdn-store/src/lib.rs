//! sdn-store
//!
//! Content-addressed record store backed by sled. Records are keyed by
//! (schema, CID); writes are idempotent and linearized, scans are bounded by
//! both row count and cumulative payload size.

pub mod db;

pub use db::{RecordStore, StoredRecord};
