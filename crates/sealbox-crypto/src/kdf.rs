//! Password-based derivation of the key that seals the key store
//!
//! Argon2id (v0x13) with parameters recorded in the store file. Parameters
//! read back from disk are untrusted and must pass [`KdfParams::check`]
//! before any memory is committed to them.

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use sealbox_core::config::KeystoreConfig;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{CryptoError, CryptoResult, KEY_SIZE};

/// Size of the random Argon2id salt stored next to the sealed key store
pub const SALT_SIZE: usize = 16;

/// Largest accepted memory cost, 4 GiB
pub const MAX_MEM_COST_KIB: u32 = 4 * 1024 * 1024;
pub const MAX_TIME_COST: u32 = 64;
pub const MAX_PARALLELISM: u32 = 64;

/// Key store sealing key; wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Argon2id cost settings, persisted in the key store header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub mem_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// 64 MiB, 3 passes, 4 lanes
    pub const RECOMMENDED: KdfParams = KdfParams {
        mem_cost_kib: 64 * 1024,
        time_cost: 3,
        parallelism: 4,
    };

    /// Reject costs above the local ceilings.
    ///
    /// Lower bounds are left to Argon2 itself, which reports them as
    /// [`CryptoError::Unsupported`] from [`derive_master_key`].
    pub fn check(&self) -> CryptoResult<()> {
        let limits = [
            ("memory cost", self.mem_cost_kib, MAX_MEM_COST_KIB),
            ("time cost", self.time_cost, MAX_TIME_COST),
            ("parallelism", self.parallelism, MAX_PARALLELISM),
        ];
        for (name, value, max) in limits {
            if value > max {
                return Err(CryptoError::Unsupported(format!(
                    "Argon2id {name} {value} exceeds {max}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::RECOMMENDED
    }
}

impl From<&KeystoreConfig> for KdfParams {
    fn from(config: &KeystoreConfig) -> Self {
        Self {
            mem_cost_kib: config.argon2_mem_cost_kib,
            time_cost: config.argon2_time_cost,
            parallelism: config.argon2_parallelism,
        }
    }
}

/// Stretch `password` into a [`MasterKey`].
///
/// The salt is random per save and stored in clear next to the sealed payload.
pub fn derive_master_key(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> CryptoResult<MasterKey> {
    params.check()?;
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Unsupported(format!("invalid Argon2id params: {e}")))?;

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params)
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(|e| CryptoError::Cipher(format!("Argon2id KDF failed: {e}")))?;

    Ok(MasterKey::from_bytes(*key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("test-password-123");
        let salt = [1u8; SALT_SIZE];

        let key1 = derive_master_key(&password, &salt, &fast_params()).unwrap();
        let key2 = derive_master_key(&password, &salt, &fast_params()).unwrap();

        assert_eq!(
            key1.as_bytes(),
            key2.as_bytes(),
            "KDF must be deterministic"
        );
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; SALT_SIZE];

        let key1 =
            derive_master_key(&SecretString::from("password-a"), &salt, &fast_params()).unwrap();
        let key2 =
            derive_master_key(&SecretString::from("password-b"), &salt, &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");

        let key1 = derive_master_key(&password, &[1u8; SALT_SIZE], &fast_params()).unwrap();
        let key2 = derive_master_key(&password, &[2u8; SALT_SIZE], &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_rejects_invalid_params() {
        let params = KdfParams {
            mem_cost_kib: 1024,
            time_cost: 0,
            parallelism: 1,
        };
        let result = derive_master_key(&SecretString::from("pw"), &[0u8; SALT_SIZE], &params);
        assert!(matches!(result, Err(CryptoError::Unsupported(_))));
    }

    #[test]
    fn test_kdf_rejects_oversized_params() {
        let oversized = [
            KdfParams {
                mem_cost_kib: u32::MAX,
                ..fast_params()
            },
            KdfParams {
                time_cost: MAX_TIME_COST + 1,
                ..fast_params()
            },
            KdfParams {
                parallelism: MAX_PARALLELISM + 1,
                ..fast_params()
            },
        ];
        for params in oversized {
            let result = derive_master_key(&SecretString::from("pw"), &[0u8; SALT_SIZE], &params);
            assert!(
                matches!(result, Err(CryptoError::Unsupported(_))),
                "{params:?} accepted"
            );
        }
        assert!(KdfParams::RECOMMENDED.check().is_ok());
    }

    #[test]
    fn test_params_from_config() {
        let config = KeystoreConfig::default();
        assert_eq!(KdfParams::from(&config), KdfParams::default());
    }
}
