//! Crypto primitives: key generation, AES-CBC, signatures, encodings, random tokens
//!
//! All randomness comes from `rand::thread_rng()`, a ChaCha-based CSPRNG
//! seeded from the operating system.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::keys::{EncryptionKey, SecretKeyPair, SignatureKey};
use crate::mac::Signer;
use crate::{CryptoError, CryptoResult, IV_SIZE, KEY_SIZE};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Output of a single-buffer encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Whether full-strength (256-bit) keys are available.
///
/// AES-256 is compiled in, so this holds on every platform; key generation
/// still checks it and refuses rather than downgrading.
pub fn is_strong_crypto_supported() -> bool {
    true
}

/// Fill a fresh buffer from the CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate an AES key of `bits` (128, 192 or 256).
pub fn generate_encryption_key(bits: usize) -> CryptoResult<EncryptionKey> {
    if !matches!(bits, 128 | 192 | 256) {
        return Err(CryptoError::Unsupported(format!(
            "AES key length of {bits} bits"
        )));
    }
    EncryptionKey::from_bytes(random_bytes(bits / 8))
}

/// Generate an HMAC key of `bits` (positive multiple of 8).
pub fn generate_signature_key(bits: usize) -> CryptoResult<SignatureKey> {
    if bits == 0 || bits % 8 != 0 {
        return Err(CryptoError::Unsupported(format!(
            "signature key length of {bits} bits"
        )));
    }
    SignatureKey::from_bytes(random_bytes(bits / 8))
}

/// Generate a full-strength pair: 256-bit AES key + 256-bit HMAC key.
pub fn generate_key_pair() -> CryptoResult<SecretKeyPair> {
    if !is_strong_crypto_supported() {
        return Err(CryptoError::Unsupported(
            "256-bit keys are not available in this runtime".into(),
        ));
    }
    Ok(SecretKeyPair::new(
        generate_encryption_key(KEY_SIZE * 8)?,
        generate_signature_key(KEY_SIZE * 8)?,
    ))
}

/// Encrypt one buffer with AES-CBC/PKCS#7 under a fresh random IV.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> CryptoResult<Encrypted> {
    let iv = random_bytes(IV_SIZE);
    let k = key.as_bytes();

    let ciphertext = match k.len() {
        16 => Aes128CbcEnc::new_from_slices(k, &iv)
            .map_err(|_| invalid_key_len(k.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => Aes192CbcEnc::new_from_slices(k, &iv)
            .map_err(|_| invalid_key_len(k.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => Aes256CbcEnc::new_from_slices(k, &iv)
            .map_err(|_| invalid_key_len(k.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        n => return Err(invalid_key_len(n)),
    };

    Ok(Encrypted { iv, ciphertext })
}

/// Decrypt one buffer produced by [`encrypt`].
pub fn decrypt(key: &EncryptionKey, iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::Malformed(format!(
            "IV must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CryptoError::Malformed(format!(
            "ciphertext length {} is not a positive multiple of the AES block size",
            ciphertext.len()
        )));
    }

    let k = key.as_bytes();
    let result = match k.len() {
        16 => Aes128CbcDec::new_from_slices(k, iv)
            .map_err(|_| invalid_key_len(k.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => Aes192CbcDec::new_from_slices(k, iv)
            .map_err(|_| invalid_key_len(k.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => Aes256CbcDec::new_from_slices(k, iv)
            .map_err(|_| invalid_key_len(k.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        n => return Err(invalid_key_len(n)),
    };

    result.map_err(|_| CryptoError::Cipher("AES-CBC decryption failed: wrong key or corrupted data".into()))
}

fn invalid_key_len(len: usize) -> CryptoError {
    CryptoError::InvalidKey(format!("AES key must be 16, 24 or 32 bytes, got {len}"))
}

/// HMAC-SHA256 over `data`.
pub fn compute_signature(key: &SignatureKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut signer = Signer::new(key)?;
    signer.update(data);
    Ok(signer.finish())
}

/// Constant-time comparison of two signatures.
pub fn signatures_match(computed: &[u8], reference: &[u8]) -> bool {
    computed.ct_eq(reference).into()
}

/// Recompute the signature of `data` and compare it to `reference`.
pub fn verify_signature(key: &SignatureKey, data: &[u8], reference: &[u8]) -> bool {
    compute_signature(key, data)
        .map(|computed| signatures_match(&computed, reference))
        .unwrap_or(false)
}

pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn base64_decode(s: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| CryptoError::Malformed(format!("base64 decode: {e}")))
}

pub fn base64_url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn base64_url_decode(s: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| CryptoError::Malformed(format!("base64url decode: {e}")))
}

pub fn utf8_encode(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

pub fn utf8_decode(bytes: Vec<u8>) -> CryptoResult<String> {
    String::from_utf8(bytes).map_err(|e| CryptoError::Malformed(format!("invalid UTF-8: {e}")))
}

/// `size` random bytes as standard Base64.
pub fn generate_token(size: usize) -> String {
    base64_encode(&random_bytes(size))
}

/// `size` random bytes as URL-safe Base64, usable as a generated password.
pub fn generate_random_password(size: usize) -> String {
    base64_url_encode(&random_bytes(size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip_all_key_sizes() {
        for bits in [128, 192, 256] {
            let key = generate_encryption_key(bits).unwrap();
            let enc = encrypt(&key, b"hello, encrypted world!").unwrap();
            let dec = decrypt(&key, &enc.iv, &enc.ciphertext).unwrap();
            assert_eq!(dec, b"hello, encrypted world!", "{bits}-bit key");
        }
    }

    #[test]
    fn test_encrypt_empty() {
        let key = generate_encryption_key(256).unwrap();
        let enc = encrypt(&key, b"").unwrap();

        // PKCS#7 always adds at least one padding byte
        assert_eq!(enc.ciphertext.len(), 16);
        assert_eq!(decrypt(&key, &enc.iv, &enc.ciphertext).unwrap(), b"");
    }

    #[test]
    fn test_ciphertext_size() {
        let key = generate_encryption_key(256).unwrap();
        assert_eq!(encrypt(&key, &[0u8; 15]).unwrap().ciphertext.len(), 16);
        assert_eq!(encrypt(&key, &[0u8; 16]).unwrap().ciphertext.len(), 32);
        assert_eq!(encrypt(&key, &[0u8; 1000]).unwrap().ciphertext.len(), 1008);
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let key = generate_encryption_key(256).unwrap();
        let a = encrypt(&key, b"same plaintext").unwrap();
        let b = encrypt(&key, b"same plaintext").unwrap();

        assert_eq!(a.iv.len(), IV_SIZE);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_decrypt_rejects_bad_shapes() {
        let key = generate_encryption_key(256).unwrap();
        assert!(matches!(
            decrypt(&key, &[0u8; 8], &[0u8; 16]),
            Err(CryptoError::Malformed(_))
        ));
        assert!(matches!(
            decrypt(&key, &[0u8; IV_SIZE], &[0u8; 17]),
            Err(CryptoError::Malformed(_))
        ));
        assert!(matches!(
            decrypt(&key, &[0u8; IV_SIZE], &[]),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_unsupported_key_lengths() {
        assert!(generate_encryption_key(64).is_err());
        assert!(generate_encryption_key(512).is_err());
        assert!(generate_signature_key(0).is_err());
        assert!(generate_signature_key(12).is_err());
        assert_eq!(generate_signature_key(512).unwrap().bit_length(), 512);
    }

    #[test]
    fn test_generated_pairs_differ() {
        let a = generate_key_pair().unwrap();
        let b = generate_key_pair().unwrap();
        assert_eq!(a.encryption_key().bit_length(), 256);
        assert_eq!(a.signature_key().bit_length(), 256);
        assert_ne!(a, b, "random keys must differ");
    }

    #[test]
    fn test_signature_verify() {
        let key = generate_signature_key(256).unwrap();
        let sig = compute_signature(&key, b"payload").unwrap();

        assert!(verify_signature(&key, b"payload", &sig));
        assert!(!verify_signature(&key, b"payloae", &sig));
        assert!(!verify_signature(&key, b"payload", &sig[..31]));

        let other = generate_signature_key(256).unwrap();
        assert!(!verify_signature(&other, b"payload", &sig));
    }

    #[test]
    fn test_signatures_match_is_exact() {
        assert!(signatures_match(b"abc", b"abc"));
        assert!(!signatures_match(b"abc", b"abd"));
        assert!(!signatures_match(b"abc", b"abcd"));
        assert!(signatures_match(b"", b""));
    }

    #[test]
    fn test_encodings() {
        let data = [0xFBu8, 0xFF, 0x00, 0x10];
        assert_eq!(base64_decode(&base64_encode(&data)).unwrap(), data);
        let url = base64_url_encode(&data);
        assert!(!url.contains('+') && !url.contains('/') && !url.contains('='));
        assert_eq!(base64_url_decode(&url).unwrap(), data);

        assert!(base64_decode("not base64!").is_err());
        assert_eq!(utf8_decode(utf8_encode("grüße")).unwrap(), "grüße");
        assert!(utf8_decode(vec![0xC3, 0x28]).is_err());
    }

    #[test]
    fn test_tokens_and_passwords() {
        let token = generate_token(32);
        assert_eq!(base64_decode(&token).unwrap().len(), 32);

        let password = generate_random_password(24);
        assert_eq!(base64_url_decode(&password).unwrap().len(), 24);
        assert_ne!(password, generate_random_password(24));
    }
}
