//! sealbox-crypto: client-side envelope encryption for cloud-synced files
//!
//! Architecture: Encrypt-then-MAC per chunk, MAC-of-MACs per stream
//!
//! ```text
//! SecretKeyPair
//!   ├── encryption key: AES-CBC/PKCS#7, fresh random 128-bit IV per chunk
//!   └── signature key:  HMAC-SHA256
//!         ├── chunk signature  = HMAC(len(iv) || iv || len(ct) || ct)
//!         └── global signature = HMAC(sig_0 || sig_1 || ... || sig_n)
//!
//! Stream: [SBXS][version] ( [1][chunk] )* [0][len][global signature]
//! Chunk:  [SBXC][version][len][sig][len][iv][len][ciphertext]
//! ```
//!
//! The key store that holds the pairs is sealed separately with
//! XChaCha20-Poly1305 under an Argon2id-derived master key (see [`kdf`]).

pub mod chunk;
pub mod kdf;
pub mod keys;
pub mod mac;
pub mod progress;
pub mod provider;
pub mod stream;

pub use chunk::EncryptedChunk;
pub use kdf::{derive_master_key, KdfParams, MasterKey};
pub use keys::{open_with_master_key, seal_with_master_key, EncryptionKey, SecretKeyPair, SignatureKey};
pub use mac::Signer;
pub use progress::{NoProgress, ProgressListener, StreamControl};
pub use stream::{
    decrypt_bytes, decrypt_stream, encrypt_bytes, encrypt_stream, estimated_decrypted_size,
    estimated_encrypted_size, StreamOptions, StreamStatus,
};

pub use sealbox_core::{CryptoError, CryptoResult};

/// Size of a generated key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-CBC initialization vector
pub const IV_SIZE: usize = 16;

/// Size of an HMAC-SHA256 tag
pub const SIGNATURE_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
