use crate::profile::EntityProfile;
use sdn_core::SdnError;
use sdn_crypto::{keystore, NodeKeys};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

const SEED_FILE: &str = "identity.seed";

/// Editable (non-key) profile fields, supplied by config or the admin API.
#[derive(Clone, Debug, Default)]
pub struct ProfileFields {
    pub display_name: String,
    pub organization: String,
    pub email: String,
    pub website: String,
    pub country: String,
    pub addresses: Vec<String>,
}

/// The unlocked node identity: cached derived keys plus the mutable profile
/// fields that feed EPM snapshots.
pub struct IdentityService {
    keys: NodeKeys,
    fields: RwLock<ProfileFields>,
}

impl IdentityService {
    /// Unlock an existing identity or create a fresh one.
    ///
    /// On first run a 24-word mnemonic is generated and the seed persisted
    /// encrypted under `password`; the mnemonic is returned exactly once so
    /// the operator can record it.
    pub fn load_or_create(
        data_dir: &Path,
        password: &str,
        fields: ProfileFields,
    ) -> Result<(Self, Option<String>), SdnError> {
        let seed_path = data_dir.join(SEED_FILE);
        let (keys, fresh_mnemonic) = if seed_path.exists() {
            let seed = keystore::load_seed(&seed_path, password)?;
            info!("identity seed unlocked");
            (NodeKeys::from_seed(&seed), None)
        } else {
            let mnemonic = sdn_crypto::hd::generate_mnemonic()?;
            let phrase = mnemonic.to_string();
            let seed = sdn_crypto::hd::seed_from_mnemonic(&phrase)?;
            keystore::save_seed(&seed_path, &seed, password)?;
            warn!("new identity created; record the recovery mnemonic now, it will not be shown again");
            (NodeKeys::from_seed(&seed), Some(phrase))
        };

        Ok((
            Self {
                keys,
                fields: RwLock::new(fields),
            },
            fresh_mnemonic,
        ))
    }

    pub fn keys(&self) -> &NodeKeys {
        &self.keys
    }

    /// Path of the encrypted seed inside a data dir.
    pub fn seed_path(data_dir: &Path) -> PathBuf {
        data_dir.join(SEED_FILE)
    }

    /// Current profile fields (admin API read).
    pub fn profile_fields(&self) -> ProfileFields {
        self.fields.read().expect("profile lock poisoned").clone()
    }

    /// Replace the editable profile fields (admin API write). Takes effect
    /// on the next EPM snapshot.
    pub fn set_profile_fields(&self, fields: ProfileFields) {
        *self.fields.write().expect("profile lock poisoned") = fields;
    }

    /// Build an immutable EPM snapshot of the current profile and keys.
    pub fn epm_snapshot(&self) -> EntityProfile {
        let fields = self.fields.read().expect("profile lock poisoned");
        EntityProfile {
            display_name: fields.display_name.clone(),
            organization: fields.organization.clone(),
            email: fields.email.clone(),
            website: fields.website.clone(),
            country: fields.country.clone(),
            addresses: fields.addresses.clone(),
            signing_key: self.keys.verifying_key().to_bytes(),
            encryption_key: *self.keys.encryption_public().as_bytes(),
        }
    }
}
