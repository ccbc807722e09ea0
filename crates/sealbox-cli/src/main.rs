//! sealbox: client-side encryption for files bound for cloud storage
//!
//! Commands:
//!   init                          - create a password-protected key store
//!   passwd                        - change the key store password
//!   keys list|generate|delete|rename|export|import
//!   encrypt <alias> <in> <out>    - encrypt a file with a stored key pair
//!   decrypt <alias> <in> <out>    - verify and decrypt a file
//!   seal <text> / unseal <token>  - protect short strings with the database-security pair
//!   config show                   - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use sealbox_core::config::SealboxConfig;
use sealbox_crypto::{
    decrypt_stream, encrypt_stream, estimated_decrypted_size, KdfParams, SecretKeyPair,
    StreamControl, StreamOptions, StreamStatus,
};
use sealbox_keystore::{KeyManager, KeyStore, ALIAS_SEPARATOR};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealbox",
    version,
    about = "Client-side file encryption",
    long_about = "sealbox: encrypt files before they reach cloud storage, and manage the keys that protect them"
)]
struct Cli {
    /// Path to sealbox configuration file
    #[arg(
        long,
        short = 'c',
        env = "SEALBOX_CONFIG",
        default_value = "~/.config/sealbox/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "SEALBOX_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "SEALBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new key store
    Init,

    /// Change the key store password
    Passwd,

    /// Key pair management
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Encrypt a file with the key pair stored under ALIAS
    Encrypt {
        alias: String,
        input: PathBuf,
        output: PathBuf,
    },

    /// Verify and decrypt a file with the key pair stored under ALIAS
    ///
    /// Any tampering aborts the command and removes the partial output.
    Decrypt {
        alias: String,
        input: PathBuf,
        output: PathBuf,
    },

    /// Encrypt a short string with the database-security key pair
    Seal { text: String },

    /// Decrypt a token produced by `seal`
    Unseal { token: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// List aliases with key fingerprints
    List,
    /// Generate a new 256-bit key pair
    Generate { alias: String },
    /// Delete a key pair
    Delete { alias: String },
    /// Rename a key pair
    Rename { old: String, new: String },
    /// Export key pairs into a separate key store file
    ///
    /// Mappings are `source:destination`, or a bare alias to keep its name.
    Export {
        /// Destination key store file (must not exist)
        #[arg(long, short = 'o')]
        out: PathBuf,
        #[arg(required = true)]
        mappings: Vec<String>,
    },
    /// Import key pairs from another key store file
    Import {
        /// Source key store file
        #[arg(long, short = 'f')]
        from: PathBuf,
        #[arg(required = true)]
        mappings: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Encrypt,
    Decrypt,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let (config, found) = load_config(&config_path).await?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, &format);

    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        );
    }
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "sealbox starting"
    );

    let manager = KeyManager::new(
        expand_tilde(&config.keystore.path),
        KdfParams::from(&config.keystore),
    );

    match cli.command {
        Commands::Init => cmd_init(&manager),
        Commands::Passwd => cmd_passwd(&manager),
        Commands::Keys { action } => cmd_keys(&manager, &config, action),
        Commands::Encrypt {
            alias,
            input,
            output,
        } => cmd_stream(&manager, &config, Direction::Encrypt, &alias, &input, &output).await,
        Commands::Decrypt {
            alias,
            input,
            output,
        } => cmd_stream(&manager, &config, Direction::Decrypt, &alias, &input, &output).await,
        Commands::Seal { text } => cmd_seal(&manager, &text),
        Commands::Unseal { token } => cmd_unseal(&manager, &token),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path, found),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Parsed config and whether the file existed.
async fn load_config(path: &Path) -> Result<(SealboxConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((SealboxConfig::default(), false))
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

// ── Passwords ─────────────────────────────────────────────────────────────────

/// Read a password from `env_var` if set, otherwise prompt on the terminal.
fn read_password(prompt: &str, env_var: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(value))
}

/// Prompt twice for a new password unless it comes from `env_var`.
fn read_new_password(prompt: &str, env_var: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(SecretString::from(value));
    }
    let first = rpassword::prompt_password(prompt).context("reading password")?;
    let second = rpassword::prompt_password("Repeat password: ").context("reading password")?;
    if first != second {
        anyhow::bail!("passwords do not match");
    }
    Ok(SecretString::from(first))
}

fn unlock(manager: &KeyManager) -> Result<()> {
    if !manager.key_store_exists() {
        anyhow::bail!(
            "no key store at {} (run `sealbox init` first)",
            manager.path().display()
        );
    }
    let password = read_password("Key store password: ", "SEALBOX_PASSWORD")?;
    if !manager.unlock_key_store(&password) {
        anyhow::bail!("wrong password or corrupted key store");
    }
    Ok(())
}

// ── Key store commands ────────────────────────────────────────────────────────

fn cmd_init(manager: &KeyManager) -> Result<()> {
    if manager.key_store_exists() {
        anyhow::bail!("key store already exists: {}", manager.path().display());
    }
    let password = read_new_password("New key store password: ", "SEALBOX_PASSWORD")?;
    if password.expose_secret().is_empty() {
        anyhow::bail!("password must not be empty");
    }
    if !manager.create_key_store(&password) {
        anyhow::bail!("creating key store failed: {}", manager.path().display());
    }
    println!("Created key store: {}", manager.path().display());
    Ok(())
}

fn cmd_passwd(manager: &KeyManager) -> Result<()> {
    unlock(manager)?;
    let new_password = read_new_password("New key store password: ", "SEALBOX_NEW_PASSWORD")?;
    manager
        .change_password(&new_password)
        .context("changing key store password")?;
    println!("Password changed.");
    Ok(())
}

fn cmd_keys(manager: &KeyManager, config: &SealboxConfig, action: KeysAction) -> Result<()> {
    unlock(manager)?;

    match action {
        KeysAction::List => {
            let aliases = manager.list_aliases();
            if aliases.is_empty() {
                println!("No keys. Create one with `sealbox keys generate <alias>`.");
            }
            for alias in aliases {
                let fingerprint = manager
                    .get_keys(&alias)
                    .map(|keys| keys.fingerprint())
                    .unwrap_or_default();
                println!("{alias:<32} {fingerprint}");
            }
        }
        KeysAction::Generate { alias } => {
            if !manager.generate_keys(&alias) {
                anyhow::bail!("cannot generate keys for '{alias}' (invalid or existing alias)");
            }
            println!("Generated keys: {alias}");
        }
        KeysAction::Delete { alias } => {
            if !manager.delete_keys(&alias) {
                anyhow::bail!("cannot delete '{alias}' (no such alias)");
            }
            println!("Deleted keys: {alias}");
        }
        KeysAction::Rename { old, new } => {
            if !manager.rename_keys(&old, &new) {
                anyhow::bail!("cannot rename '{old}' to '{new}'");
            }
            println!("Renamed keys: {old} → {new}");
        }
        KeysAction::Export { out, mappings } => {
            if out.exists() {
                anyhow::bail!("refusing to overwrite {}", out.display());
            }
            let mapping = parse_mappings(&mappings)?;
            let exported = manager.export_keys(&mapping).context("exporting keys")?;
            let password = read_new_password("Export file password: ", "SEALBOX_EXPORT_PASSWORD")?;
            exported
                .save(&out, &password, &KdfParams::from(&config.keystore))
                .with_context(|| format!("writing export: {}", out.display()))?;
            info!(keys = exported.len(), out = %out.display(), "exported keys");
            println!("Exported {} key pair(s) to {}", exported.len(), out.display());
        }
        KeysAction::Import { from, mappings } => {
            let mapping = parse_mappings(&mappings)?;
            let password = read_password("Import file password: ", "SEALBOX_IMPORT_PASSWORD")?;
            let source = KeyStore::load(&from, &password)
                .with_context(|| format!("opening import: {}", from.display()))?;
            if !manager.import_keys(&source, &mapping) {
                anyhow::bail!("import rejected: every source must exist and every destination must be new");
            }
            println!("Imported {} key pair(s) from {}", mapping.len(), from.display());
        }
    }
    Ok(())
}

/// Parse `source:destination` mappings; a bare alias maps onto itself.
fn parse_mappings(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut mapping = BTreeMap::new();
    for entry in raw {
        let (src, dst) = entry
            .split_once(ALIAS_SEPARATOR)
            .unwrap_or((entry.as_str(), entry.as_str()));
        if src.is_empty() || dst.is_empty() {
            anyhow::bail!("invalid mapping '{entry}'");
        }
        if mapping.insert(src.to_string(), dst.to_string()).is_some() {
            anyhow::bail!("alias '{src}' mapped twice");
        }
    }
    Ok(mapping)
}

// ── `sealbox encrypt` / `sealbox decrypt` ─────────────────────────────────────

/// Clear bytes the progress bar counts up to for an input of `input_len` bytes.
fn clear_total(direction: Direction, input_len: u64, options: &StreamOptions) -> u64 {
    match direction {
        Direction::Encrypt => input_len,
        Direction::Decrypt => estimated_decrypted_size(input_len, options),
    }
}

async fn cmd_stream(
    manager: &KeyManager,
    config: &SealboxConfig,
    direction: Direction,
    alias: &str,
    input: &Path,
    output: &Path,
) -> Result<()> {
    unlock(manager)?;
    let keys = manager
        .get_keys(alias)
        .with_context(|| format!("no keys stored under alias '{alias}'"))?;
    manager.lock_key_store();

    let options = StreamOptions::try_from(&config.stream).context("invalid [stream] config")?;
    let input_len = tokio::fs::metadata(input)
        .await
        .with_context(|| format!("stat: {}", input.display()))?
        .len();
    let total = clear_total(direction, input_len, &options);

    let label = match direction {
        Direction::Encrypt => "encrypt",
        Direction::Decrypt => "decrypt",
    };
    let pb = make_progress_bar(total, label);
    pb.set_message(input.display().to_string());

    let pb_clone = pb.clone();
    let control = Arc::new(StreamControl::with_callback(move |done| {
        pb_clone.set_position(done)
    }));

    let mut worker = {
        let control = Arc::clone(&control);
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || {
            run_stream(direction, &input, &output, &keys, &options, &control)
        })
    };

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = tokio::signal::ctrl_c() => {
            pb.set_message("canceling...");
            control.cancel();
            worker.await
        }
    };
    let result = joined.context("stream worker failed")?;

    match result {
        Ok(StreamStatus::Completed { bytes, chunks }) => {
            pb.set_length(bytes);
            pb.finish_with_message("done".to_string());
            println!("  chunks:  {chunks}");
            println!("  bytes:   {}", fmt_bytes(bytes));
            println!("  output:  {}", output.display());
            Ok(())
        }
        Ok(StreamStatus::Canceled { bytes, .. }) => {
            pb.abandon_with_message("canceled".to_string());
            remove_partial(output);
            anyhow::bail!("{label} canceled after {}", fmt_bytes(bytes))
        }
        Err(e) => {
            pb.abandon_with_message("failed".to_string());
            remove_partial(output);
            Err(e).with_context(|| format!("{label} {}", input.display()))
        }
    }
}

fn run_stream(
    direction: Direction,
    input: &Path,
    output: &Path,
    keys: &SecretKeyPair,
    options: &StreamOptions,
    control: &StreamControl,
) -> sealbox_crypto::CryptoResult<StreamStatus> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);
    match direction {
        Direction::Encrypt => encrypt_stream(&mut reader, &mut writer, keys, options, control),
        Direction::Decrypt => decrypt_stream(&mut reader, &mut writer, keys, options, control),
    }
}

/// Canceled or rejected output is never left behind.
fn remove_partial(output: &Path) {
    if let Err(e) = std::fs::remove_file(output) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %output.display(), error = %e, "removing partial output failed");
        }
    }
}

// ── `sealbox seal` / `sealbox unseal` ─────────────────────────────────────────

fn cmd_seal(manager: &KeyManager, text: &str) -> Result<()> {
    unlock(manager)?;
    let token = manager
        .encrypt_with_database_security_key(text)
        .context("sealing text")?
        .context("key store has no database-security keys")?;
    println!("{token}");
    Ok(())
}

fn cmd_unseal(manager: &KeyManager, token: &str) -> Result<()> {
    unlock(manager)?;
    let text = manager
        .decrypt_with_database_security_key(token)
        .context("unsealing token")?
        .context("key store has no database-security keys")?;
    println!("{text}");
    Ok(())
}

// ── `sealbox config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &SealboxConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Output helpers ────────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
