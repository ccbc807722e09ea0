//! KeyManager: unlock session over a key store file
//!
//! The manager owns the password and the unlocked container for the lifetime
//! of a session. Every mutation is applied to a copy, saved, and only then
//! committed, so a failed save leaves both disk and memory unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sealbox_core::config::KeystoreConfig;
use sealbox_crypto::provider::{
    base64_url_decode, base64_url_encode, generate_key_pair, is_strong_crypto_supported,
    utf8_decode, utf8_encode,
};
use sealbox_crypto::{EncryptedChunk, KdfParams, SecretKeyPair};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::store::{is_valid_alias, KeyStore};
use crate::{CryptoError, CryptoResult};

#[derive(Default)]
struct Session {
    password: Option<SecretString>,
    store: Option<KeyStore>,
}

/// Lifecycle façade over one key store file.
pub struct KeyManager {
    path: PathBuf,
    kdf: KdfParams,
    session: Mutex<Session>,
}

impl KeyManager {
    pub fn new(path: impl Into<PathBuf>, kdf: KdfParams) -> Self {
        Self {
            path: path.into(),
            kdf,
            session: Mutex::new(Session::default()),
        }
    }

    /// Uses `config.path` as given; callers expand `~` beforehand.
    pub fn from_config(config: &KeystoreConfig) -> Self {
        Self::new(config.path.clone(), KdfParams::from(config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_store_exists(&self) -> bool {
        self.path.exists()
    }

    /// Create a new key store holding only the database-security pair, then unlock it.
    ///
    /// Refuses an empty password and an already existing file.
    pub fn create_key_store(&self, password: &SecretString) -> bool {
        if password.expose_secret().is_empty() {
            warn!("refusing to create key store with empty password");
            return false;
        }
        if self.key_store_exists() {
            warn!(path = %self.path.display(), "key store already exists");
            return false;
        }
        if !is_strong_crypto_supported() {
            warn!("strong cryptography unavailable, not generating keys");
            return false;
        }

        let mut store = KeyStore::create();
        match generate_key_pair() {
            Ok(keys) => store.add_database_security_keys(keys),
            Err(e) => {
                warn!(error = %e, "generating database-security keys failed");
                return false;
            }
        }
        if let Err(e) = store.save(&self.path, password, &self.kdf) {
            warn!(path = %self.path.display(), error = %e, "saving new key store failed");
            return false;
        }

        let mut session = self.lock_session();
        session.password = Some(copy_password(password));
        session.store = Some(store);
        info!(path = %self.path.display(), "created key store");
        true
    }

    /// Load the key store under `password`. Any failure leaves the session locked.
    pub fn unlock_key_store(&self, password: &SecretString) -> bool {
        let mut session = self.lock_session();
        match KeyStore::load(&self.path, password) {
            Ok(store) => {
                session.password = Some(copy_password(password));
                session.store = Some(store);
                debug!(path = %self.path.display(), "unlocked key store");
                true
            }
            Err(e) => {
                *session = Session::default();
                warn!(path = %self.path.display(), error = %e, "unlocking key store failed");
                false
            }
        }
    }

    /// Forget the password and the unlocked container.
    pub fn lock_key_store(&self) {
        *self.lock_session() = Session::default();
        debug!("locked key store");
    }

    pub fn is_unlocked(&self) -> bool {
        self.lock_session().store.is_some()
    }

    /// Generate a 256-bit pair under a new alias and persist it.
    pub fn generate_keys(&self, alias: &str) -> bool {
        if !is_valid_alias(alias) {
            warn!(alias = %alias, "invalid alias");
            return false;
        }
        if !is_strong_crypto_supported() {
            warn!("strong cryptography unavailable, not generating keys");
            return false;
        }
        let keys = match generate_key_pair() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "key generation failed");
                return false;
            }
        };
        self.mutate("generate", |store| store.add_keys(alias, keys))
    }

    pub fn delete_keys(&self, alias: &str) -> bool {
        if !is_valid_alias(alias) {
            warn!(alias = %alias, "invalid alias");
            return false;
        }
        self.mutate("delete", |store| store.delete_keys(alias))
    }

    pub fn rename_keys(&self, old: &str, new: &str) -> bool {
        if !is_valid_alias(old) || !is_valid_alias(new) {
            warn!(old = %old, new = %new, "invalid alias");
            return false;
        }
        self.mutate("rename", |store| store.rename_keys(old, new))
    }

    /// Sorted aliases; empty while locked.
    pub fn list_aliases(&self) -> Vec<String> {
        self.lock_session()
            .store
            .as_ref()
            .map(KeyStore::list_aliases)
            .unwrap_or_default()
    }

    /// Copy of the pair stored under `alias`, for handing to the stream codec.
    pub fn get_keys(&self, alias: &str) -> Option<SecretKeyPair> {
        self.lock_session().store.as_ref()?.get_keys(alias).cloned()
    }

    /// Copy pairs from `source` under new aliases (`source alias → destination alias`).
    ///
    /// All-or-nothing: every source must exist and every destination must be
    /// valid, distinct and free, otherwise nothing is imported.
    pub fn import_keys(&self, source: &KeyStore, mapping: &BTreeMap<String, String>) -> bool {
        if mapping.is_empty() {
            warn!("nothing to import");
            return false;
        }
        let mut destinations = BTreeSet::new();
        for (src, dst) in mapping {
            if source.get_keys(src).is_none() {
                warn!(alias = %src, "import source missing");
                return false;
            }
            if !is_valid_alias(dst) || !destinations.insert(dst.as_str()) {
                warn!(alias = %dst, "invalid or repeated import destination");
                return false;
            }
        }

        self.mutate("import", |store| {
            if let Some(taken) = mapping.values().find(|dst| store.contains(dst)) {
                warn!(alias = %taken, "import destination already exists");
                return false;
            }
            mapping.iter().all(|(src, dst)| {
                source
                    .get_keys(src)
                    .is_some_and(|keys| store.add_keys(dst, keys.clone()))
            })
        })
    }

    /// Build an independent container holding copies of the mapped pairs.
    ///
    /// The live key store is not touched.
    pub fn export_keys(&self, mapping: &BTreeMap<String, String>) -> CryptoResult<KeyStore> {
        let session = self.lock_session();
        let store = session.store.as_ref().ok_or(CryptoError::Locked)?;

        let mut exported = KeyStore::create();
        for (src, dst) in mapping {
            let keys = store
                .get_keys(src)
                .ok_or_else(|| CryptoError::UnknownAlias(src.clone()))?;
            if !exported.add_keys(dst, keys.clone()) {
                return Err(CryptoError::InvalidAlias(dst.clone()));
            }
        }
        debug!(keys = exported.len(), "exported keys");
        Ok(exported)
    }

    /// Seal a short string with the database-security pair as URL-safe Base64.
    ///
    /// `Ok(None)` while locked or when the store has no database-security pair.
    pub fn encrypt_with_database_security_key(&self, clear: &str) -> CryptoResult<Option<String>> {
        let Some(keys) = self.database_security_keys() else {
            return Ok(None);
        };
        let chunk = EncryptedChunk::seal(&keys, &utf8_encode(clear))?;
        let bytes = chunk
            .serialize()
            .ok_or_else(|| CryptoError::Malformed("sealed chunk is incomplete".into()))?;
        Ok(Some(base64_url_encode(&bytes)))
    }

    /// Reverse [`encrypt_with_database_security_key`](Self::encrypt_with_database_security_key).
    pub fn decrypt_with_database_security_key(&self, sealed: &str) -> CryptoResult<Option<String>> {
        let Some(keys) = self.database_security_keys() else {
            return Ok(None);
        };
        let chunk = EncryptedChunk::parse(&base64_url_decode(sealed)?)?;
        let plaintext = chunk.open(&keys)?;
        utf8_decode(plaintext).map(Some)
    }

    /// Re-seal the key store file under `new_password`.
    ///
    /// The file is reloaded with the session password first, so a store that
    /// changed on disk or a stale session fails instead of being overwritten.
    pub fn change_password(&self, new_password: &SecretString) -> CryptoResult<()> {
        if new_password.expose_secret().is_empty() {
            return Err(CryptoError::InvalidKey("empty password".into()));
        }

        let mut session = self.lock_session();
        let old_password = session.password.as_ref().ok_or(CryptoError::Locked)?;

        let on_disk = KeyStore::load(&self.path, old_password)?;
        on_disk.save(&self.path, new_password, &self.kdf)?;

        session.password = Some(copy_password(new_password));
        session.store = Some(on_disk);
        info!(path = %self.path.display(), "changed key store password");
        Ok(())
    }

    fn database_security_keys(&self) -> Option<SecretKeyPair> {
        self.lock_session()
            .store
            .as_ref()?
            .get_database_security_keys()
            .cloned()
    }

    /// Apply `op` to a copy of the unlocked store, save it, then commit.
    fn mutate<F>(&self, action: &str, op: F) -> bool
    where
        F: FnOnce(&mut KeyStore) -> bool,
    {
        let mut session = self.lock_session();
        let Session {
            password: Some(password),
            store: Some(store),
        } = &mut *session
        else {
            warn!(action, "key store is locked");
            return false;
        };

        let mut updated = store.clone();
        if !op(&mut updated) {
            warn!(action, "key store operation rejected");
            return false;
        }
        if let Err(e) = updated.save(&self.path, password, &self.kdf) {
            warn!(action, error = %e, "saving key store failed");
            return false;
        }

        *store = updated;
        debug!(action, "key store updated");
        true
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("path", &self.path)
            .field("kdf", &self.kdf)
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

fn copy_password(password: &SecretString) -> SecretString {
    SecretString::from(password.expose_secret().to_string())
}
