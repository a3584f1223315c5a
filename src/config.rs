use std::{
    collections::BTreeSet,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use url::Url;

use crate::error::RedirectError;

/// Every type name accepted in `enable` / `disable`.
pub const KNOWN_TYPES: [&str; 5] = ["host", "path", "gometa", "dockerv2", "www"];

const DEFAULT_DNS_PORT: u16 = 53;
const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 5000;

/// Runtime configuration parsed from `txtredirect.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub redirect: RedirectSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedirectSection {
    #[serde(default)]
    pub enable: Vec<String>,
    #[serde(default)]
    pub disable: Vec<String>,
    #[serde(default)]
    pub resolver: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_server_header")]
    pub server_header: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT_MS
}

fn default_blacklist() -> Vec<String> {
    vec!["/favicon.ico".into()]
}

fn default_listen() -> String {
    "127.0.0.1:8080".into()
}

fn default_server_header() -> String {
    "txtredirect".into()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9183".into()
}

fn default_metrics_path() -> String {
    "/metrics".into()
}

impl Default for RedirectSection {
    fn default() -> Self {
        Self {
            enable: Vec::new(),
            disable: Vec::new(),
            resolver: None,
            redirect: None,
            lookup_timeout_ms: default_lookup_timeout_ms(),
            blacklist: default_blacklist(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            server_header: default_server_header(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enable: false,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

impl MetricsSection {
    /// Path the exporter answers on, always with a leading slash.
    pub fn normalised_path(&self) -> String {
        if self.path.is_empty() {
            default_metrics_path()
        } else if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

impl RuntimeConfig {
    pub fn load_config_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read txtredirect config at {}", path.display()))?;
        let cfg: Self = toml::from_str(&raw)
            .with_context(|| format!("Malformed txtredirect config at {}", path.display()))?;
        Ok(cfg)
    }

    /// Load the config when present, otherwise fall back to built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_config_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn redirect_config(&self) -> Result<RedirectConfig> {
        RedirectConfig::from_section(&self.redirect, self.metrics.enable)
            .context("Invalid [redirect] section")
    }
}

/// Engine-facing view of the configuration, validated once at startup.
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    pub enabled: BTreeSet<String>,
    pub resolver: Option<SocketAddr>,
    pub fallback_url: Option<String>,
    pub metrics_enabled: bool,
    /// DNS budget shared by every lookup made for one request.
    pub lookup_timeout: Duration,
    pub blacklist: Vec<String>,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            enabled: KNOWN_TYPES.iter().map(|name| name.to_string()).collect(),
            resolver: None,
            fallback_url: None,
            metrics_enabled: false,
            lookup_timeout: Duration::from_millis(DEFAULT_LOOKUP_TIMEOUT_MS),
            blacklist: default_blacklist(),
        }
    }
}

impl RedirectConfig {
    pub fn from_section(
        section: &RedirectSection,
        metrics_enabled: bool,
    ) -> Result<Self, RedirectError> {
        for name in section.enable.iter().chain(section.disable.iter()) {
            if !KNOWN_TYPES.contains(&name.as_str()) {
                return Err(RedirectError::Config(format!("unknown type '{name}'")));
            }
        }

        let enabled: BTreeSet<String> = if section.enable.is_empty() {
            KNOWN_TYPES
                .iter()
                .filter(|name| !section.disable.iter().any(|d| d == *name))
                .map(|name| name.to_string())
                .collect()
        } else {
            section.enable.iter().cloned().collect()
        };

        let resolver = section
            .resolver
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(parse_resolver_address)
            .transpose()?;

        let fallback_url = match section.redirect.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Url::parse(raw).map_err(|err| {
                    RedirectError::Config(format!("invalid redirect URL '{raw}': {err}"))
                })?;
                Some(raw.to_string())
            }
            _ => None,
        };

        Ok(Self {
            enabled,
            resolver,
            fallback_url,
            metrics_enabled,
            lookup_timeout: Duration::from_millis(section.lookup_timeout_ms.max(1)),
            blacklist: section.blacklist.clone(),
        })
    }

    /// Restrict the enabled set to exactly `names`.
    pub fn with_enabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    pub fn is_blacklisted(&self, path: &str) -> bool {
        self.blacklist.iter().any(|entry| entry == path)
    }
}

/// Accepts `ip`, `ip:port` and `[v6]:port`; a bare address gets port 53.
pub fn parse_resolver_address(raw: &str) -> Result<SocketAddr, RedirectError> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let bare = raw.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|_| RedirectError::Config(format!("invalid resolver address '{raw}'")))
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "txtredirect", "txtredirect")
        .context("Unable to resolve platform config directory")?;
    Ok(dirs.config_dir().join("txtredirect.toml"))
}
