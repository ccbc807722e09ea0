use std::path::PathBuf;

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Every failure of the envelope codec and the key store.
///
/// I/O failures at the byte-stream boundary are wrapped into [`CryptoError::Io`]
/// so callers handle a single error type for crypto operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("wrong password or corrupted key store")]
    WrongPassword,

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("tampering or corruption detected: {0}")]
    Tampered(String),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error("key store is locked")]
    Locked,

    #[error("no keys stored under alias '{0}'")]
    UnknownAlias(String),

    #[error("invalid or duplicate alias '{0}'")]
    InvalidAlias(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The distinctions a user-facing caller needs to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    WrongPassword,
    FileNotFound,
    Corrupted,
    Failed,
}

impl CryptoError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CryptoError::WrongPassword => ErrorCategory::WrongPassword,
            CryptoError::NotFound(_) => ErrorCategory::FileNotFound,
            CryptoError::Tampered(_) | CryptoError::Malformed(_) => ErrorCategory::Corrupted,
            _ => ErrorCategory::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(CryptoError::WrongPassword.category(), ErrorCategory::WrongPassword);
        assert_eq!(
            CryptoError::NotFound(PathBuf::from("/nope")).category(),
            ErrorCategory::FileNotFound
        );
        assert_eq!(
            CryptoError::Tampered("bad mac".into()).category(),
            ErrorCategory::Corrupted
        );
        assert_eq!(
            CryptoError::Malformed("short".into()).category(),
            ErrorCategory::Corrupted
        );
        assert_eq!(CryptoError::Locked.category(), ErrorCategory::Failed);
    }

    #[test]
    fn test_io_is_wrapped() {
        let err: CryptoError =
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, CryptoError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
        assert_eq!(err.category(), ErrorCategory::Failed);
        assert!(err.to_string().starts_with("I/O error"));
    }

    #[test]
    fn test_not_found_message_has_path() {
        let err = CryptoError::NotFound(PathBuf::from("/tmp/keystore.json"));
        assert_eq!(err.to_string(), "file not found: /tmp/keystore.json");
    }
}
