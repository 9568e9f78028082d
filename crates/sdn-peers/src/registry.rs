use crate::persist::{PeerStore, RegistrySnapshot};
use sdn_core::{SdnError, Timestamp, TrustLevel};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{info, warn};

/// Traffic counters kept per peer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeerStats {
    pub connections: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// One registry row per peer identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerRecord {
    /// libp2p peer id, base58.
    pub peer_id: String,
    pub trust_level: TrustLevel,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub stats: PeerStats,
    pub first_added: Timestamp,
    pub last_seen: Timestamp,
    /// Attached profile record (EPM bytes), if the peer has published one.
    #[serde(default)]
    pub profile: Option<Vec<u8>>,
}

impl PeerRecord {
    pub fn new(peer_id: impl Into<String>, trust_level: TrustLevel, now: Timestamp) -> Self {
        Self {
            peer_id: peer_id.into(),
            trust_level,
            display_name: String::new(),
            organization: String::new(),
            addresses: Vec::new(),
            groups: Vec::new(),
            notes: String::new(),
            stats: PeerStats::default(),
            first_added: now,
            last_seen: now,
            profile: None,
        }
    }
}

/// A named peer group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerGroup {
    pub name: String,
    pub description: String,
    pub default_trust: TrustLevel,
    pub members: Vec<String>,
    pub created_at: Timestamp,
}

/// Admission policy for peers not present in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AdmissionMode {
    /// Unknown peers admitted at default trust; block list still applies.
    #[default]
    NonStrict,
    /// Only registered peers above Untrusted are admitted.
    Strict,
}

/// Why an admission decision refused a peer. The strings are stable; they
/// feed the gater's observability hook.
pub const REFUSAL_BLOCKED: &str = "blocked";
pub const REFUSAL_NOT_REGISTERED: &str = "not in registry (strict mode)";
pub const REFUSAL_UNTRUSTED: &str = "trust level untrusted";

/// Durable peer registry.
///
/// Single logical writer under the exclusive lock; every mutation is
/// persisted through the backing [`PeerStore`] before the call returns, so a
/// persistence failure surfaces to the caller instead of desynchronizing
/// memory and disk.
pub struct PeerRegistry {
    inner: RwLock<RegistrySnapshot>,
    store: Box<dyn PeerStore>,
    mode: AdmissionMode,
    default_trust: TrustLevel,
}

impl PeerRegistry {
    /// Load the registry from `store` (empty snapshot if none was persisted).
    pub fn open(store: Box<dyn PeerStore>, mode: AdmissionMode) -> Result<Self, SdnError> {
        let snapshot = store.load()?.unwrap_or_default();
        info!(
            peers = snapshot.peers.len(),
            groups = snapshot.groups.len(),
            blocked = snapshot.blocked.len(),
            ?mode,
            "peer registry loaded"
        );
        Ok(Self {
            inner: RwLock::new(snapshot),
            store,
            mode,
            default_trust: TrustLevel::Standard,
        })
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistrySnapshot> {
        self.inner.read().expect("peer registry lock poisoned")
    }

    /// Run `mutate` under the write lock and persist the result before
    /// returning.
    fn with_write<T>(
        &self,
        mutate: impl FnOnce(&mut RegistrySnapshot) -> Result<T, SdnError>,
    ) -> Result<T, SdnError> {
        let mut guard = self.inner.write().expect("peer registry lock poisoned");
        let out = mutate(&mut guard)?;
        self.store.save(&guard)?;
        Ok(out)
    }

    // ── Peers ────────────────────────────────────────────────────────────────

    /// Insert or replace a peer record. Every group it references must exist.
    pub fn add_peer(&self, record: PeerRecord) -> Result<(), SdnError> {
        self.with_write(|snap| {
            for group in &record.groups {
                if !snap.groups.contains_key(group) {
                    return Err(SdnError::UnknownGroup(group.clone()));
                }
            }
            for group in &record.groups {
                let members = &mut snap.groups.get_mut(group).expect("checked above").members;
                if !members.contains(&record.peer_id) {
                    members.push(record.peer_id.clone());
                }
            }
            snap.peers.insert(record.peer_id.clone(), record);
            Ok(())
        })
    }

    pub fn get_peer(&self, peer_id: &str) -> Option<PeerRecord> {
        self.read().peers.get(peer_id).cloned()
    }

    pub fn remove_peer(&self, peer_id: &str) -> Result<bool, SdnError> {
        self.with_write(|snap| {
            let removed = snap.peers.remove(peer_id).is_some();
            for group in snap.groups.values_mut() {
                group.members.retain(|m| m != peer_id);
            }
            Ok(removed)
        })
    }

    pub fn set_trust_level(&self, peer_id: &str, level: TrustLevel) -> Result<(), SdnError> {
        self.with_write(|snap| {
            let record = snap
                .peers
                .get_mut(peer_id)
                .ok_or_else(|| SdnError::UnknownPeer(peer_id.to_string()))?;
            record.trust_level = level;
            Ok(())
        })
    }

    /// Trust level recorded for `peer_id`, if registered.
    pub fn trust_level_of(&self, peer_id: &str) -> Option<TrustLevel> {
        self.read().peers.get(peer_id).map(|p| p.trust_level)
    }

    /// Trust level used for quota decisions: the registered level, or the
    /// mode-dependent default for unknown peers (Standard in non-strict,
    /// Untrusted in strict).
    pub fn effective_trust(&self, peer_id: &str) -> TrustLevel {
        match self.trust_level_of(peer_id) {
            Some(level) => level,
            None => match self.mode {
                AdmissionMode::NonStrict => self.default_trust,
                AdmissionMode::Strict => TrustLevel::Untrusted,
            },
        }
    }

    pub fn list_peers(&self) -> Vec<PeerRecord> {
        self.read().peers.values().cloned().collect()
    }

    /// Record observed traffic for a peer; counters are created lazily for
    /// unknown peers in non-strict mode.
    pub fn record_traffic(
        &self,
        peer_id: &str,
        now: Timestamp,
        messages_in: u64,
        bytes_in: u64,
        messages_out: u64,
        bytes_out: u64,
    ) -> Result<(), SdnError> {
        self.with_write(|snap| {
            let record = snap
                .peers
                .entry(peer_id.to_string())
                .or_insert_with(|| PeerRecord::new(peer_id, TrustLevel::Standard, now));
            record.last_seen = now;
            record.stats.messages_in += messages_in;
            record.stats.bytes_in += bytes_in;
            record.stats.messages_out += messages_out;
            record.stats.bytes_out += bytes_out;
            Ok(())
        })
    }

    pub fn record_connection(&self, peer_id: &str, now: Timestamp) -> Result<(), SdnError> {
        self.with_write(|snap| {
            let record = snap
                .peers
                .entry(peer_id.to_string())
                .or_insert_with(|| PeerRecord::new(peer_id, TrustLevel::Standard, now));
            record.last_seen = now;
            record.stats.connections += 1;
            Ok(())
        })
    }

    /// Attach a published profile blob to a peer record.
    pub fn set_peer_profile(&self, peer_id: &str, profile: Vec<u8>) -> Result<(), SdnError> {
        self.with_write(|snap| {
            let record = snap
                .peers
                .get_mut(peer_id)
                .ok_or_else(|| SdnError::UnknownPeer(peer_id.to_string()))?;
            record.profile = Some(profile);
            Ok(())
        })
    }

    // ── Block list ───────────────────────────────────────────────────────────

    pub fn block_peer(&self, peer_id: &str) -> Result<(), SdnError> {
        self.with_write(|snap| {
            snap.blocked.insert(peer_id.to_string());
            Ok(())
        })
    }

    pub fn unblock_peer(&self, peer_id: &str) -> Result<bool, SdnError> {
        self.with_write(|snap| Ok(snap.blocked.remove(peer_id)))
    }

    pub fn is_blocked(&self, peer_id: &str) -> bool {
        self.read().blocked.contains(peer_id)
    }

    pub fn list_blocked(&self) -> Vec<String> {
        self.read().blocked.iter().cloned().collect()
    }

    // ── Groups ───────────────────────────────────────────────────────────────

    pub fn create_group(
        &self,
        name: &str,
        description: &str,
        default_trust: TrustLevel,
        now: Timestamp,
    ) -> Result<(), SdnError> {
        self.with_write(|snap| {
            if snap.groups.contains_key(name) {
                return Err(SdnError::DuplicateGroup(name.to_string()));
            }
            snap.groups.insert(
                name.to_string(),
                PeerGroup {
                    name: name.to_string(),
                    description: description.to_string(),
                    default_trust,
                    members: Vec::new(),
                    created_at: now,
                },
            );
            Ok(())
        })
    }

    pub fn get_group(&self, name: &str) -> Option<PeerGroup> {
        self.read().groups.get(name).cloned()
    }

    pub fn list_groups(&self) -> Vec<PeerGroup> {
        self.read().groups.values().cloned().collect()
    }

    /// Delete a group, stripping the name from every member peer so no peer
    /// references a group that no longer exists.
    pub fn delete_group(&self, name: &str) -> Result<bool, SdnError> {
        self.with_write(|snap| {
            let removed = snap.groups.remove(name).is_some();
            if removed {
                for peer in snap.peers.values_mut() {
                    peer.groups.retain(|g| g != name);
                }
            }
            Ok(removed)
        })
    }

    pub fn add_peer_to_group(&self, peer_id: &str, group: &str) -> Result<(), SdnError> {
        self.with_write(|snap| {
            if !snap.peers.contains_key(peer_id) {
                return Err(SdnError::UnknownPeer(peer_id.to_string()));
            }
            let g = snap
                .groups
                .get_mut(group)
                .ok_or_else(|| SdnError::UnknownGroup(group.to_string()))?;
            if !g.members.contains(&peer_id.to_string()) {
                g.members.push(peer_id.to_string());
            }
            let p = snap.peers.get_mut(peer_id).expect("checked above");
            if !p.groups.contains(&group.to_string()) {
                p.groups.push(group.to_string());
            }
            Ok(())
        })
    }

    pub fn remove_peer_from_group(&self, peer_id: &str, group: &str) -> Result<(), SdnError> {
        self.with_write(|snap| {
            if let Some(g) = snap.groups.get_mut(group) {
                g.members.retain(|m| m != peer_id);
            }
            if let Some(p) = snap.peers.get_mut(peer_id) {
                p.groups.retain(|g| g != group);
            }
            Ok(())
        })
    }

    // ── Admission ────────────────────────────────────────────────────────────

    /// Decide whether a peer whose identity is known may be admitted.
    ///
    /// Block list first, then mode policy, then trust level. Returns the
    /// stable refusal reason on the error path.
    pub fn admission_decision(&self, peer_id: &str) -> Result<(), &'static str> {
        let snap = self.read();
        if snap.blocked.contains(peer_id) {
            return Err(REFUSAL_BLOCKED);
        }
        match snap.peers.get(peer_id) {
            Some(record) => {
                if record.trust_level == TrustLevel::Untrusted {
                    return Err(REFUSAL_UNTRUSTED);
                }
                Ok(())
            }
            None => match self.mode {
                AdmissionMode::NonStrict => Ok(()),
                AdmissionMode::Strict => {
                    warn!(peer = %peer_id, "refusing unregistered peer in strict mode");
                    Err(REFUSAL_NOT_REGISTERED)
                }
            },
        }
    }
}
