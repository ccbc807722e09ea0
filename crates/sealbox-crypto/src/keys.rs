//! Key material: encryption key, signature key, the pair, and master-key sealing

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdf::MasterKey;
use crate::{CryptoError, CryptoResult, NONCE_SIZE, TAG_SIZE};

/// AES key (128, 192 or 256 bits). Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: Vec<u8>,
}

impl EncryptionKey {
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self { bytes }),
            n => Err(CryptoError::InvalidKey(format!(
                "AES key must be 16, 24 or 32 bytes, got {n}"
            ))),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bit_length(&self) -> usize {
        self.bytes.len() * 8
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.as_slice().ct_eq(other.bytes.as_slice()).into()
    }
}

impl Eq for EncryptionKey {}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bits", &self.bit_length())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// HMAC-SHA256 key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SignatureKey {
    bytes: Vec<u8>,
}

impl SignatureKey {
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.is_empty() {
            return Err(CryptoError::InvalidKey("signature key is empty".into()));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bit_length(&self) -> usize {
        self.bytes.len() * 8
    }
}

impl PartialEq for SignatureKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.as_slice().ct_eq(other.bytes.as_slice()).into()
    }
}

impl Eq for SignatureKey {}

impl std::fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureKey")
            .field("bits", &self.bit_length())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// One encryption key and one signature key, always used together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretKeyPair {
    encryption: EncryptionKey,
    signature: SignatureKey,
}

impl SecretKeyPair {
    pub fn new(encryption: EncryptionKey, signature: SignatureKey) -> Self {
        Self {
            encryption,
            signature,
        }
    }

    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption
    }

    pub fn signature_key(&self) -> &SignatureKey {
        &self.signature
    }

    /// Short BLAKE3 digest identifying the pair, safe to display.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"sealbox-fingerprint-v1");
        hasher.update(self.encryption.as_bytes());
        hasher.update(self.signature.as_bytes());
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }
}

/// Seal arbitrary bytes under the master key.
///
/// Uses XChaCha20-Poly1305 with a random nonce.
/// Output: `[24-byte nonce][ciphertext + 16-byte tag]`
pub fn seal_with_master_key(master: &MasterKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(master.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Cipher(format!("sealing failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Open bytes sealed by [`seal_with_master_key`].
pub fn open_with_master_key(master: &MasterKey, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Malformed(format!(
            "sealed data too short: {} bytes (minimum {})",
            sealed.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(master.as_bytes().into());

    cipher.decrypt(nonce, ciphertext).map_err(|_| {
        CryptoError::Tampered("sealed data failed authentication: wrong master key or corrupted data".into())
    })
}
