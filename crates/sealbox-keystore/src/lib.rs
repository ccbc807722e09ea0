//! sealbox-keystore: password-protected storage of named key pairs
//!
//! [`KeyStore`] is the in-memory container and its sealed file format;
//! [`KeyManager`] owns the unlock session and persists every change.

pub mod manager;
pub mod store;

pub use manager::KeyManager;
pub use store::{is_valid_alias, KeyStore, ALIAS_SEPARATOR, DATABASE_SECURITY_ALIAS};

pub use sealbox_core::{CryptoError, CryptoResult};
