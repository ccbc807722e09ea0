//! Incremental HMAC-SHA256 signer

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::keys::SignatureKey;
use crate::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// Keyed tag over bytes fed in any number of `update` calls.
///
/// `finish` consumes the signer; a new one must be built from the key to sign again.
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(key: &SignatureKey) -> CryptoResult<Self> {
        let mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(format!("HMAC-SHA256 key: {e}")))?;
        Ok(Self { mac })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    pub fn finish(self) -> Vec<u8> {
        self.mac.finalize().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}
