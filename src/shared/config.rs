//! Application configuration. API credentials, proxy, paths, crawl and download tuning.
//!
//! Sources, lowest priority first: `config.{toml,ini,json}` in the working
//! directory (optional), the file named by `TG_CRAWLER_CONFIG`, then
//! `TG_CRAWLER_*` environment variables (`.env` is loaded by `main`).

use crate::domain::{DomainError, ExclusionList, ScanDirection};
use crate::usecases::crawl_controller::DEFAULT_OUTPUT_BASE;
use crate::usecases::download_executor::DownloadPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_PREFIX: &str = "TG_CRAWLER";
pub const CONFIG_PATH_ENV: &str = "TG_CRAWLER_CONFIG";

pub const DEFAULT_SESSION_PATH: &str = "./session.db";
pub const DEFAULT_WATERMARK_PATH: &str = ".last_run";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_WATCHER_CYCLE_SECS: u64 = 600;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    pub session_path: Option<String>,

    /// HTTP, SOCKS4 or SOCKS5. The proxy is used only when every proxy field is set.
    #[serde(default)]
    pub proxy_type: Option<String>,
    #[serde(default)]
    pub proxy_addr: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<String>,
    #[serde(default)]
    pub proxy_username: Option<String>,
    #[serde(default)]
    pub proxy_password: Option<String>,

    /// Comma-separated channel-name substrings to skip. Read from TG_CRAWLER_EXCLUDE_CHANNELS.
    #[serde(default)]
    pub exclude_channels: Option<String>,

    /// Artifact base name; each run prefixes it with its JST start time.
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub watermark_path: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,

    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Per-attempt download deadline in seconds.
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub watcher_cycle_secs: Option<u64>,
    /// `newest_first` (default) or `oldest_first`.
    #[serde(default)]
    pub scan_direction: Option<String>,
}

/// Proxy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks4,
    Socks5,
}

impl FromStr for ProxyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HTTP" => Ok(ProxyKind::Http),
            "SOCKS4" => Ok(ProxyKind::Socks4),
            "SOCKS5" => Ok(ProxyKind::Socks5),
            other => Err(format!("unknown proxy type '{}'", other)),
        }
    }
}

/// A complete proxy definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub addr: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl AppConfig {
    pub fn load() -> Result<Self, DomainError> {
        let mut c = config::Config::builder()
            .add_source(config::File::with_name("config").required(false));
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            c = c.add_source(config::File::with_name(&path));
        }
        c = c.add_source(config::Environment::with_prefix(ENV_PREFIX));
        let cfg: Self = c
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| DomainError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would fail only after connecting.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.api_id()?;
        self.api_hash()?;
        self.scan_direction()?;
        if self.max_retries == Some(0) {
            return Err(DomainError::Config("max_retries must be at least 1".into()));
        }
        if self.download_timeout_secs == Some(0) {
            return Err(DomainError::Config("download_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn api_id(&self) -> Result<i32, DomainError> {
        self.api_id
            .filter(|id| *id > 0)
            .ok_or_else(|| DomainError::Config("set TG_CRAWLER_API_ID (https://my.telegram.org)".into()))
    }

    pub fn api_hash(&self) -> Result<String, DomainError> {
        non_empty(&self.api_hash)
            .map(String::from)
            .ok_or_else(|| DomainError::Config("set TG_CRAWLER_API_HASH (https://my.telegram.org)".into()))
    }

    /// Complete proxy settings, or `None`. Partial settings are ignored with a warning.
    pub fn proxy(&self) -> Option<ProxyConfig> {
        let fields = [
            &self.proxy_type,
            &self.proxy_addr,
            &self.proxy_port,
            &self.proxy_username,
            &self.proxy_password,
        ];
        let set = fields.iter().filter(|f| non_empty(f).is_some()).count();
        if set == 0 {
            return None;
        }

        let kind = non_empty(&self.proxy_type).and_then(|t| t.parse::<ProxyKind>().ok());
        let port = non_empty(&self.proxy_port).and_then(|p| p.parse::<u16>().ok());
        match (
            kind,
            non_empty(&self.proxy_addr),
            port,
            non_empty(&self.proxy_username),
            non_empty(&self.proxy_password),
        ) {
            (Some(kind), Some(addr), Some(port), Some(username), Some(password)) => Some(ProxyConfig {
                kind,
                addr: addr.to_string(),
                port,
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => {
                warn!(fields_set = set, "incomplete or invalid proxy settings, connecting directly");
                None
            }
        }
    }

    pub fn exclusions(&self) -> ExclusionList {
        ExclusionList::parse(self.exclude_channels.as_deref().unwrap_or(""))
    }

    pub fn session_path(&self) -> PathBuf {
        PathBuf::from(non_empty(&self.session_path).unwrap_or(DEFAULT_SESSION_PATH))
    }

    pub fn output_base(&self) -> PathBuf {
        PathBuf::from(non_empty(&self.output_file).unwrap_or(DEFAULT_OUTPUT_BASE))
    }

    pub fn watermark_path(&self) -> PathBuf {
        PathBuf::from(non_empty(&self.watermark_path).unwrap_or(DEFAULT_WATERMARK_PATH))
    }

    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(non_empty(&self.download_dir).unwrap_or(DEFAULT_DOWNLOAD_DIR))
    }

    pub fn download_policy(&self) -> DownloadPolicy {
        DownloadPolicy {
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            deadline: Duration::from_secs(
                self.download_timeout_secs
                    .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            ),
        }
    }

    /// Returns watcher cycle sleep. Defaults to 600 s.
    pub fn watcher_cycle(&self) -> Duration {
        Duration::from_secs(self.watcher_cycle_secs.unwrap_or(DEFAULT_WATCHER_CYCLE_SECS))
    }

    pub fn scan_direction(&self) -> Result<ScanDirection, DomainError> {
        match non_empty(&self.scan_direction) {
            None => Ok(ScanDirection::default()),
            Some(s) => s.parse().map_err(DomainError::Config),
        }
    }
}
