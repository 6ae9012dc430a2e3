use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Config file read when `LABSTATUS_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "labstatus.toml";

/// Complete labstatus configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabStatusConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Home Assistant connection
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_entity_id")]
    pub entity_id: String,
    /// Long-lived access token, normally supplied via HOMEASSISTANT_TOKEN
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://10.20.30.97".to_string()
}

fn default_entity_id() -> String {
    "input_boolean.lab_is_on".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            entity_id: default_entity_id(),
            token: String::new(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3333".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl LabStatusConfig {
    /// Apply environment overrides. Unparseable numbers are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("HOMEASSISTANT_URL") {
            self.upstream.base_url = v;
        }
        if let Ok(v) = std::env::var("HOMEASSISTANT_ENTITY_ID") {
            self.upstream.entity_id = v;
        }
        if let Ok(v) = std::env::var("HOMEASSISTANT_TOKEN") {
            self.upstream.token = v;
        }
        if let Ok(v) = std::env::var("LABSTATUS_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("LABSTATUS_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.upstream.request_timeout_seconds = n;
            }
        }
    }

    /// Reject configurations that cannot produce a successful fetch.
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();

        if self.upstream.token.trim().is_empty() {
            issues.push("upstream token is empty (set HOMEASSISTANT_TOKEN)");
        }
        if self.upstream.base_url.trim().is_empty() {
            issues.push("upstream base_url is empty");
        }
        if self.upstream.entity_id.trim().is_empty() {
            issues.push("upstream entity_id is empty");
        }
        if self.upstream.request_timeout_seconds == 0 {
            issues.push("upstream request_timeout_seconds must be > 0");
        }

        if !issues.is_empty() {
            bail!("Invalid config:\n - {}", issues.join("\n - "));
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<LabStatusConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: LabStatusConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

/// Defaults, then the config file (if any), then environment overrides.
///
/// An explicit `LABSTATUS_CONFIG` path must exist; the default path is optional.
pub fn load() -> Result<LabStatusConfig> {
    let mut config = match std::env::var("LABSTATUS_CONFIG") {
        Ok(path) => load_config(Path::new(&path))?,
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            load_config(Path::new(DEFAULT_CONFIG_PATH))?
        }
        Err(_) => LabStatusConfig::default(),
    };

    config.apply_env();
    config.validate()?;
    Ok(config)
}
