use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use parley_core::{Priority, SyncConfig};
use serde::{Deserialize, Serialize};
use url::Url;

/// `config.json` is expected to be tiny; anything bigger is treated as corrupt.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;

const MAX_SERVER_URL_LEN: usize = 2048;
const MAX_INSTANCE_LEN: usize = 64;
const MAX_PAGE_SIZE: u32 = 100;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/rpc";
pub const DEFAULT_INSTANCE: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    /// Discriminator mixed into the single-instance channel name.
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_first_page_size")]
    pub first_page_size: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default)]
    pub preload_all: bool,
}

fn default_instance() -> String {
    DEFAULT_INSTANCE.to_owned()
}

fn default_first_page_size() -> u32 {
    parley_core::sync::DEFAULT_FIRST_PAGE_SIZE
}

fn default_page_size() -> u32 {
    parley_core::sync::DEFAULT_PAGE_SIZE
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_max_pending() -> usize {
    parley_core::rpc::DEFAULT_MAX_PENDING
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            instance: default_instance(),
            first_page_size: default_first_page_size(),
            page_size: default_page_size(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_pending: default_max_pending(),
            preload_all: false,
        }
    }
}

impl ClientConfig {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            first_page_size: self.first_page_size,
            page_size: self.page_size,
            preload_all: self.preload_all,
            priority: Priority::INTERACTIVE,
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug)]
pub enum ConfigLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            ConfigLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            ConfigLoadError::Read(e) => write!(f, "read failed: {e}"),
            ConfigLoadError::Parse(e) => write!(f, "parse failed: {e}"),
            ConfigLoadError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigLoadError::Metadata(e) => Some(e),
            ConfigLoadError::Read(e) => Some(e),
            ConfigLoadError::Parse(e) => Some(e),
            ConfigLoadError::TooLarge { .. } | ConfigLoadError::Invalid(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigSaveError {
    Invalid(String),
    Serialize(serde_json::Error),
    WriteTmp(io::Error),
    Rename(io::Error),
}

impl std::fmt::Display for ConfigSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSaveError::Invalid(msg) => write!(f, "invalid config: {msg}"),
            ConfigSaveError::Serialize(e) => write!(f, "serialize failed: {e}"),
            ConfigSaveError::WriteTmp(e) => write!(f, "tmp write failed: {e}"),
            ConfigSaveError::Rename(e) => write!(f, "rename failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigSaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigSaveError::Serialize(e) => Some(e),
            ConfigSaveError::WriteTmp(e) => Some(e),
            ConfigSaveError::Rename(e) => Some(e),
            ConfigSaveError::Invalid(_) => None,
        }
    }
}

/// Check every field and report all problems at once.
pub fn validate_config(cfg: &ClientConfig) -> Result<(), String> {
    let mut errors: Vec<String> = Vec::new();

    let server_url = cfg.server_url.trim();
    if server_url.is_empty() {
        errors.push("Server URL is required.".to_string());
    } else if server_url.len() > MAX_SERVER_URL_LEN {
        errors.push(format!(
            "Server URL is too long ({} > {} chars).",
            server_url.len(),
            MAX_SERVER_URL_LEN
        ));
    } else {
        match Url::parse(server_url) {
            Ok(url) => {
                let scheme = url.scheme();
                if scheme != "ws" && scheme != "wss" {
                    errors.push(
                        "Server URL must start with ws:// or wss:// (WebSocket).".to_string(),
                    );
                }
            }
            Err(err) => {
                errors.push(format!("Server URL is invalid: {err}"));
            }
        }
    }

    let instance = cfg.instance.trim();
    if instance.is_empty() {
        errors.push("Instance name is required.".to_string());
    } else if instance.len() > MAX_INSTANCE_LEN {
        errors.push(format!(
            "Instance name is too long ({} > {} chars).",
            instance.len(),
            MAX_INSTANCE_LEN
        ));
    } else if !instance
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        errors.push("Instance name may only contain letters, digits, '-' and '_'.".to_string());
    }

    for (label, size) in [
        ("First page size", cfg.first_page_size),
        ("Page size", cfg.page_size),
    ] {
        if size == 0 || size > MAX_PAGE_SIZE {
            errors.push(format!("{label} must be between 1 and {MAX_PAGE_SIZE}."));
        }
    }

    if cfg.ack_timeout_ms == 0 {
        errors.push("Acknowledgment timeout must be positive.".to_string());
    }
    if cfg.max_pending == 0 {
        errors.push("Max pending requests must be positive.".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Please fix the following:\n\n- {}",
            errors.join("\n- ")
        ))
    }
}

/// Base directory for logs, storage and the default config file.
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PARLEY_DATA_DIR") {
        let dir = PathBuf::from(override_dir);
        let _ = fs::create_dir_all(&dir);
        return dir;
    }

    let dir = if let Some(base) = std::env::var_os("XDG_DATA_HOME") {
        PathBuf::from(base).join("parley")
    } else if let Some(base) = std::env::var_os("LOCALAPPDATA") {
        PathBuf::from(base).join("Parley")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local").join("share").join("parley")
    } else {
        PathBuf::from(".")
    };
    let _ = fs::create_dir_all(&dir);
    dir
}

pub fn config_path() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PARLEY_CONFIG_DIR") {
        let dir = PathBuf::from(override_dir);
        let _ = fs::create_dir_all(&dir);
        return dir.join("config.json");
    }
    data_dir().join("config.json")
}

pub fn parse_config_json(data: &str) -> Result<ClientConfig, serde_json::Error> {
    serde_json::from_str::<ClientConfig>(data)
}

pub fn load_config_from_path(path: &Path) -> Result<ClientConfig, ConfigLoadError> {
    let meta = fs::metadata(path).map_err(ConfigLoadError::Metadata)?;
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONFIG_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
    let cfg = parse_config_json(&data).map_err(ConfigLoadError::Parse)?;
    validate_config(&cfg).map_err(ConfigLoadError::Invalid)?;
    Ok(cfg)
}

/// `Ok(None)` when no config file exists yet.
pub fn load_config(path: &Path) -> Result<Option<ClientConfig>, ConfigLoadError> {
    if !path.exists() {
        return Ok(None);
    }
    load_config_from_path(path).map(Some)
}

pub fn save_config_to_path(path: &Path, cfg: &ClientConfig) -> Result<(), ConfigSaveError> {
    validate_config(cfg).map_err(ConfigSaveError::Invalid)?;

    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(cfg).map_err(ConfigSaveError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(ConfigSaveError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(ConfigSaveError::Rename)?;
    Ok(())
}

pub fn save_config_with_retry(path: &Path, cfg: &ClientConfig) -> Result<(), ConfigSaveError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt: u32 = 1;
    loop {
        match save_config_to_path(path, cfg) {
            Ok(()) => return Ok(()),
            Err(err @ ConfigSaveError::Invalid(_)) => return Err(err),
            Err(err) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(err);
                }
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}
