//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` command-line flag
//! 2. `$LISTRELAY_CONFIG` (environment variable)
//! 3. `~/.config/listrelay/config.toml` (Linux/macOS)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Site identity: list domain, links, administrators.
    pub site: SiteConfig,
    /// Inbound queue directory.
    pub queue: QueueConfig,
    /// Archive of delivered messages.
    pub archive: ArchiveConfig,
    /// List data sources.
    pub store: StoreConfig,
    /// Outbound relay settings.
    pub delivery: DeliveryConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for the log file.
    pub log_dir: Option<PathBuf>,
}

/// Site identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Domain the list addresses live in (`<list>@<domain>`).
    pub domain: String,
    /// Base URL of the portal; unsubscribe links hang off it.
    pub base_url: String,
    /// Sender address of administrator forwards.
    pub from_address: String,
    /// Name of the role whose holders receive administrator forwards.
    pub admin_role: String,
    /// Addresses that receive a blind copy of every list message.
    pub wiretap: Vec<String>,
}

/// Inbound queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding `<id>` and `<id>.data` pairs.
    pub dir: PathBuf,
    /// Entries that are no longer pending are removed after this many days.
    pub stale_after_days: u64,
}

/// Archive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Root directory; each list gets its own subdirectory.
    pub dir: PathBuf,
}

/// List data sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database of the portal, opened read-only.
    pub db_path: PathBuf,
    /// Optional JSON side table describing additional lists.
    pub side_table: Option<PathBuf>,
}

/// Outbound relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// SMTP relay host name.
    pub relay_host: String,
    /// SMTP relay port.
    pub relay_port: u16,
    /// Upgrade the connection with STARTTLS.
    pub starttls: bool,
    /// SMTP username, if the relay requires authentication.
    pub username: Option<String>,
    /// SMTP password.
    pub password: Option<String>,
    /// Per-command network timeout in seconds.
    pub timeout_secs: u64,
    /// Minimum delay between two sends in milliseconds.
    pub send_interval_ms: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            domain: "lists.example.org".to_string(),
            base_url: "https://example.org".to_string(),
            from_address: "admin@lists.example.org".to_string(),
            admin_role: "Webmaster".to_string(),
            wiretap: Vec::new(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/spool/listrelay/queue"),
            stale_after_days: 30,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/spool/listrelay/archive"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/listrelay/portal.db"),
            side_table: None,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            relay_host: "localhost".to_string(),
            relay_port: 25,
            starttls: false,
            username: None,
            password: None,
            timeout_secs: 30,
            send_interval_ms: 100,
        }
    }
}

impl SiteConfig {
    /// Full address of a list: `<name>@<domain>`.
    pub fn list_address(&self, list: &str) -> String {
        format!("{list}@{}", self.domain)
    }

    /// Unsubscribe page for a recipient token on a list.
    pub fn unsubscribe_url(&self, token: &str, list: &str) -> String {
        format!(
            "{}/unsubscribe/{token}/{list}",
            self.base_url.trim_end_matches('/')
        )
    }
}

impl DeliveryConfig {
    /// Minimum delay between two sends.
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

impl QueueConfig {
    /// Age after which a non-pending entry is reclaimed.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_days * 24 * 60 * 60)
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration.
///
/// An explicitly given path must exist and parse. Otherwise the standard
/// locations are searched and the defaults are used when nothing is found.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        return read_config(path);
    }
    if let Some(path) = config_file_path() {
        if path.exists() {
            return read_config(&path);
        }
    }
    tracing::debug!("No config file found, using defaults");
    Ok(Config::default())
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config '{}': {e}", path.display()))?;
    let cfg = toml::from_str::<Config>(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {e}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("LISTRELAY_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("listrelay").join("config.toml"))
}

/// Return the directory for the log file.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("listrelay")
}
