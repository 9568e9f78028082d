use crate::registry::{PeerGroup, PeerRecord};
use sdn_core::SdnError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The whole registry state as persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub peers: BTreeMap<String, PeerRecord>,
    pub groups: BTreeMap<String, PeerGroup>,
    pub blocked: BTreeSet<String>,
}

/// Pluggable registry persistence. `save` must be durable before it returns;
/// the registry calls it under the write lock on every mutation.
pub trait PeerStore: Send + Sync {
    fn load(&self) -> Result<Option<RegistrySnapshot>, SdnError>;
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), SdnError>;
}

// ── MemoryStore ──────────────────────────────────────────────────────────────

/// Volatile store for tests and ephemeral nodes.
pub struct MemoryStore {
    snapshot: Mutex<Option<RegistrySnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerStore for MemoryStore {
    fn load(&self) -> Result<Option<RegistrySnapshot>, SdnError> {
        Ok(self.snapshot.lock().expect("memory store lock").clone())
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), SdnError> {
        *self.snapshot.lock().expect("memory store lock") = Some(snapshot.clone());
        Ok(())
    }
}

// ── JsonFileStore ────────────────────────────────────────────────────────────

/// Human-diffable JSON file store, written atomically (tmp + rename) with
/// owner-only permissions.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn set_owner_only(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

impl PeerStore for JsonFileStore {
    fn load(&self) -> Result<Option<RegistrySnapshot>, SdnError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let snapshot =
            serde_json::from_str(&raw).map_err(|e| SdnError::Serialization(e.to_string()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), SdnError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| SdnError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp)?;
            f.write_all(json.as_bytes())?;
            let _ = f.sync_all();
        }
        set_owner_only(&tmp);
        fs::rename(&tmp, &self.path)?;
        set_owner_only(&self.path);
        Ok(())
    }
}

// ── SledStore ────────────────────────────────────────────────────────────────

/// Embedded-DB store for large registries.
pub struct SledStore {
    _db: sled::Db,
    tree: sled::Tree,
}

const SNAPSHOT_KEY: &str = "registry_snapshot";

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SdnError> {
        let db = sled::open(path).map_err(|e| SdnError::Storage(e.to_string()))?;
        let tree = db
            .open_tree("peer_registry")
            .map_err(|e| SdnError::Storage(e.to_string()))?;
        Ok(Self { _db: db, tree })
    }
}

impl PeerStore for SledStore {
    fn load(&self) -> Result<Option<RegistrySnapshot>, SdnError> {
        match self
            .tree
            .get(SNAPSHOT_KEY)
            .map_err(|e| SdnError::Storage(e.to_string()))?
        {
            Some(bytes) => {
                let snapshot = bincode::deserialize(&bytes)
                    .map_err(|e| SdnError::Serialization(e.to_string()))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), SdnError> {
        let bytes =
            bincode::serialize(snapshot).map_err(|e| SdnError::Serialization(e.to_string()))?;
        self.tree
            .insert(SNAPSHOT_KEY, bytes)
            .map_err(|e| SdnError::Storage(e.to_string()))?;
        self.tree
            .flush()
            .map_err(|e| SdnError::Storage(e.to_string()))?;
        Ok(())
    }
}
