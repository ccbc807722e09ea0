use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration (loaded from sealbox.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealboxConfig {
    pub logging: LoggingConfig,
    pub keystore: KeystoreConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Password-protected key store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Key store file (default: ~/.config/sealbox/keystore.json)
    pub path: PathBuf,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

/// Encrypted stream chunking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum plaintext bytes per chunk (default: 4 MiB)
    pub max_chunk_size: usize,
    /// Block size for buffered chunk I/O (default: 64 KiB)
    pub io_buffer_size: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.config/sealbox/keystore.json"),
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 4 * 1024 * 1024,
            io_buffer_size: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[logging]
level = "debug"
format = "json"

[keystore]
path = "/var/lib/sealbox/keys.json"
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[stream]
max_chunk_size = 1048576
io_buffer_size = 8192
"#;
        let config: SealboxConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(
            config.keystore.path,
            PathBuf::from("/var/lib/sealbox/keys.json")
        );
        assert_eq!(config.keystore.argon2_mem_cost_kib, 131072);
        assert_eq!(config.keystore.argon2_parallelism, 8);
        assert_eq!(config.stream.max_chunk_size, 1048576);
        assert_eq!(config.stream.io_buffer_size, 8192);
    }

    #[test]
    fn test_parse_defaults() {
        let config: SealboxConfig = toml::from_str("").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
        assert_eq!(
            config.keystore.path,
            PathBuf::from("~/.config/sealbox/keystore.json")
        );
        assert_eq!(config.keystore.argon2_mem_cost_kib, 65536);
        assert_eq!(config.stream.max_chunk_size, 4 * 1024 * 1024);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[stream]
max_chunk_size = 65536
"#;
        let config: SealboxConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.stream.max_chunk_size, 65536);
        // Defaults
        assert_eq!(config.stream.io_buffer_size, 64 * 1024);
        assert_eq!(config.keystore.argon2_time_cost, 3);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SealboxConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SealboxConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.keystore.path, parsed.keystore.path);
        assert_eq!(config.stream.max_chunk_size, parsed.stream.max_chunk_size);
        assert_eq!(config.logging.format, parsed.logging.format);
    }
}
