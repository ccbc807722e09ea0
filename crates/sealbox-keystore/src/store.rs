//! Key store container: alias → key pair, sealed to a file under a password
//!
//! File layout (JSON):
//! ```text
//! {
//!   "format": "sealbox-keystore",
//!   "version": 1,
//!   "kdf": { "mem_cost_kib": .., "time_cost": .., "parallelism": .., "salt": "<base64>" },
//!   "payload": "<base64 of [24-byte nonce][XChaCha20-Poly1305 ciphertext + tag]>"
//! }
//! ```
//! The payload plaintext is JSON holding every pair's key material in Base64.
//! A fresh salt and nonce are drawn on every save.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use rand::RngCore;
use sealbox_crypto::kdf::SALT_SIZE;
use sealbox_crypto::provider::{base64_decode, base64_encode};
use sealbox_crypto::{
    derive_master_key, open_with_master_key, seal_with_master_key, EncryptionKey, KdfParams,
    SecretKeyPair, SignatureKey,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{CryptoError, CryptoResult};

/// Reserved alias of the pair protecting short database strings
pub const DATABASE_SECURITY_ALIAS: &str = "database-security";

/// Separates source and destination aliases in import/export mappings
pub const ALIAS_SEPARATOR: char = ':';

const FILE_FORMAT: &str = "sealbox-keystore";
const FILE_VERSION: u32 = 1;

/// Non-empty, free of [`ALIAS_SEPARATOR`] and not the reserved alias.
pub fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty() && !alias.contains(ALIAS_SEPARATOR) && alias != DATABASE_SECURITY_ALIAS
}

/// In-memory set of named key pairs plus the reserved database-security pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStore {
    entries: BTreeMap<String, SecretKeyPair>,
    database_security: Option<SecretKeyPair>,
}

impl KeyStore {
    /// Empty container.
    pub fn create() -> Self {
        Self::default()
    }

    /// Read and unseal a key store file.
    pub fn load(path: &Path, password: &SecretString) -> CryptoResult<Self> {
        if !path.exists() {
            return Err(CryptoError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let file: StoreFile = serde_json::from_str(&content)
            .map_err(|e| CryptoError::Malformed(format!("key store file: {e}")))?;

        if file.format != FILE_FORMAT {
            return Err(CryptoError::Malformed(format!(
                "not a key store file: format '{}'",
                file.format
            )));
        }
        if file.version != FILE_VERSION {
            return Err(CryptoError::Malformed(format!(
                "unsupported key store version {}",
                file.version
            )));
        }

        let salt: [u8; SALT_SIZE] = base64_decode(&file.kdf.salt)?
            .try_into()
            .map_err(|_| CryptoError::Malformed("key store salt has wrong size".into()))?;
        let params = KdfParams {
            mem_cost_kib: file.kdf.mem_cost_kib,
            time_cost: file.kdf.time_cost,
            parallelism: file.kdf.parallelism,
        };
        if params.check().is_err() {
            return Err(CryptoError::Malformed(format!(
                "key store KDF parameters out of range: {params:?}"
            )));
        }
        let master = derive_master_key(password, &salt, &params)?;

        let sealed = base64_decode(&file.payload)?;
        let plaintext = Zeroizing::new(open_with_master_key(&master, &sealed).map_err(
            |e| match e {
                CryptoError::Tampered(_) => CryptoError::WrongPassword,
                other => other,
            },
        )?);

        let payload: Payload = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Malformed(format!("key store payload: {e}")))?;
        let store = payload.to_store()?;

        debug!(path = %path.display(), keys = store.len(), "loaded key store");
        Ok(store)
    }

    /// Seal under `password` and atomically replace the file at `path`.
    pub fn save(&self, path: &Path, password: &SecretString, params: &KdfParams) -> CryptoResult<()> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let master = derive_master_key(password, &salt, params)?;

        let plaintext = Zeroizing::new(
            serde_json::to_vec(&Payload::from_store(self))
                .map_err(|e| CryptoError::Serialization(e.to_string()))?,
        );
        let sealed = seal_with_master_key(&master, &plaintext)?;

        let file = StoreFile {
            format: FILE_FORMAT.to_string(),
            version: FILE_VERSION,
            kdf: StoredKdf {
                mem_cost_kib: params.mem_cost_kib,
                time_cost: params.time_cost,
                parallelism: params.parallelism,
                salt: base64_encode(&salt),
            },
            payload: base64_encode(&sealed),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;

        write_atomic(path, json.as_bytes())?;
        debug!(path = %path.display(), keys = self.len(), "saved key store");
        Ok(())
    }

    /// Insert a pair under a new alias. Never replaces an existing pair.
    pub fn add_keys(&mut self, alias: &str, keys: SecretKeyPair) -> bool {
        if !is_valid_alias(alias) || self.entries.contains_key(alias) {
            return false;
        }
        self.entries.insert(alias.to_string(), keys);
        true
    }

    pub fn get_keys(&self, alias: &str) -> Option<&SecretKeyPair> {
        self.entries.get(alias)
    }

    pub fn delete_keys(&mut self, alias: &str) -> bool {
        self.entries.remove(alias).is_some()
    }

    /// Move a pair to a new alias; false if `old` is missing or `new` is taken or invalid.
    pub fn rename_keys(&mut self, old: &str, new: &str) -> bool {
        if !is_valid_alias(new) || self.entries.contains_key(new) {
            return false;
        }
        match self.entries.remove(old) {
            Some(keys) => {
                self.entries.insert(new.to_string(), keys);
                true
            }
            None => false,
        }
    }

    /// Sorted aliases; the reserved pair is never listed.
    pub fn list_aliases(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_database_security_keys(&mut self, keys: SecretKeyPair) {
        self.database_security = Some(keys);
    }

    pub fn get_database_security_keys(&self) -> Option<&SecretKeyPair> {
        self.database_security.as_ref()
    }
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    format: String,
    version: u32,
    kdf: StoredKdf,
    payload: String,
}

#[derive(Serialize, Deserialize)]
struct StoredKdf {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
    salt: String,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    entries: BTreeMap<String, StoredPair>,
    #[serde(default)]
    database_security: Option<StoredPair>,
}

impl Payload {
    fn from_store(store: &KeyStore) -> Self {
        Self {
            entries: store
                .entries
                .iter()
                .map(|(alias, keys)| (alias.clone(), StoredPair::from(keys)))
                .collect(),
            database_security: store.database_security.as_ref().map(StoredPair::from),
        }
    }

    fn to_store(&self) -> CryptoResult<KeyStore> {
        let mut store = KeyStore::create();
        for (alias, stored) in &self.entries {
            if !store.add_keys(alias, stored.to_pair()?) {
                return Err(CryptoError::Malformed(format!(
                    "key store holds invalid alias '{alias}'"
                )));
            }
        }
        if let Some(stored) = &self.database_security {
            store.add_database_security_keys(stored.to_pair()?);
        }
        Ok(store)
    }
}

/// Base64 key material, wiped when dropped.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredPair {
    encryption_key: String,
    signature_key: String,
}

impl From<&SecretKeyPair> for StoredPair {
    fn from(keys: &SecretKeyPair) -> Self {
        Self {
            encryption_key: base64_encode(keys.encryption_key().as_bytes()),
            signature_key: base64_encode(keys.signature_key().as_bytes()),
        }
    }
}

impl StoredPair {
    fn to_pair(&self) -> CryptoResult<SecretKeyPair> {
        let encryption = EncryptionKey::from_bytes(base64_decode(&self.encryption_key)?)
            .map_err(|e| CryptoError::Malformed(format!("stored encryption key: {e}")))?;
        let signature = SignatureKey::from_bytes(base64_decode(&self.signature_key)?)
            .map_err(|e| CryptoError::Malformed(format!("stored signature key: {e}")))?;
        Ok(SecretKeyPair::new(encryption, signature))
    }
}

/// Write to a sibling temp file readable only by the owner, then rename over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> CryptoResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
