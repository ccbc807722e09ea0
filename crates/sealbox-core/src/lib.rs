pub mod config;
pub mod error;

pub use error::{CryptoError, CryptoResult, ErrorCategory};
