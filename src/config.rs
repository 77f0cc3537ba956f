use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "XRAY_HELPER_CONFIG";

/// Application configuration persisted as YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Engine, subscription and probing settings
    pub xray_config: XrayConfig,
    /// Control server settings
    pub server_config: ServerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct XrayConfig {
    /// Listen address of the local inbounds (default: 127.0.0.1)
    pub address: String,
    /// Port of the API dokodemo-door inbound (default: 10900)
    pub api_port: u16,
    /// Port of the HTTP inbound (default: 10901)
    pub http_port: u16,
    /// Port of the SOCKS inbound (default: 10902)
    pub socks_port: u16,
    /// Port of the inbound reserved for latency probes (default: 10903)
    pub test_port: u16,
    /// Directory holding the `xray` executable; empty means PATH lookup
    pub xray_exe_dir: String,
    /// Directory the generated fragments are written to (default: .)
    pub xray_config_dir: String,
    /// Asset directory exported as XRAY_LOCATION_ASSET (default: config dir)
    pub xray_asset_dir: String,
    /// Directory for the engine's access/error logs (default: /tmp/log/Xray)
    pub log_dir: String,
    /// Domains always routed direct
    pub domain_whitelist: Vec<String>,
    /// Domains always routed through the balancer
    pub domain_blacklist: Vec<String>,
    /// Subscription URL; empty disables fetching
    pub subscribe_url: String,
    /// Fetch attempts per subscribe (default: 3)
    pub subscribe_retry_num: u16,
    /// Fetch the subscription through the engine's HTTP inbound
    pub subscribe_via_proxy: bool,
    /// URL requested by every latency probe
    pub probe_url: String,
    /// Overall deadline of one probe round in seconds (default: 20)
    pub probe_deadline_secs: u64,
    /// Number of endpoints kept as live outbounds (default: 5)
    pub select_max: usize,
    /// How long a freshly spawned engine must survive, in ms (default: 2000)
    pub start_grace_millis: u64,
    /// Interval of the periodic re-test in seconds (default: 7200)
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Control server port (default: 20909)
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load the configuration from the path in `XRAY_HELPER_CONFIG`, falling
    /// back to `$HOME/.config/xray/helper.yaml`
    pub fn load_default() -> Result<Self> {
        Self::load(&default_config_path())
    }

    /// Load the configuration file, creating an empty one when absent
    pub fn load(path: &Path) -> Result<Self> {
        info!("config path is '{}'", path.display());

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        if !path.exists() {
            fs::write(path, "")?;
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_defaults();
        Ok(config)
    }

    /// Parse YAML text without applying defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Fill every empty or zero field with its documented default
    pub fn apply_defaults(&mut self) {
        self.xray_config.apply_defaults();
        self.server_config.apply_defaults();
    }

    /// Get the control server address
    pub fn server_addr(&self) -> String {
        format!("0.0.0.0:{}", self.server_config.port)
    }
}

impl XrayConfig {
    pub fn apply_defaults(&mut self) {
        if self.address.trim().is_empty() {
            self.address = "127.0.0.1".to_string();
        }
        if self.subscribe_retry_num == 0 {
            self.subscribe_retry_num = 3;
        }
        if self.xray_config_dir.trim().is_empty() {
            self.xray_config_dir = ".".to_string();
        }
        if self.xray_asset_dir.trim().is_empty() {
            self.xray_asset_dir = self.xray_config_dir.clone();
        }
        if self.log_dir.trim().is_empty() {
            self.log_dir = "/tmp/log/Xray".to_string();
        }
        if self.api_port == 0 {
            self.api_port = 10900;
        }
        if self.http_port == 0 {
            self.http_port = 10901;
        }
        if self.socks_port == 0 {
            self.socks_port = 10902;
        }
        if self.test_port == 0 {
            self.test_port = 10903;
        }
        if self.probe_url.trim().is_empty() {
            self.probe_url = "http://www.google.com/ncr".to_string();
        }
        if self.probe_deadline_secs == 0 {
            self.probe_deadline_secs = 20;
        }
        if self.select_max == 0 {
            self.select_max = 5;
        }
        if self.start_grace_millis == 0 {
            self.start_grace_millis = 2000;
        }
        if self.refresh_interval_secs == 0 {
            self.refresh_interval_secs = 2 * 60 * 60;
        }
    }

    /// Path of the engine executable
    pub fn engine_executable(&self) -> PathBuf {
        if self.xray_exe_dir.trim().is_empty() {
            PathBuf::from("xray")
        } else {
            Path::new(&self.xray_exe_dir).join("xray")
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(&self.xray_config_dir)
    }

    /// Forward proxy URL of the probe inbound
    pub fn test_proxy_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.test_port)
    }

    /// Forward proxy URL used for subscription fetches, if enabled
    pub fn subscribe_proxy_url(&self) -> Option<String> {
        self.subscribe_via_proxy
            .then(|| format!("http://127.0.0.1:{}", self.http_port))
    }

    pub fn probe_deadline(&self) -> Duration {
        Duration::from_secs(self.probe_deadline_secs)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_millis)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl ServerConfig {
    pub fn apply_defaults(&mut self) {
        if self.port == 0 {
            self.port = 20909;
        }
    }
}

impl LogConfig {
    /// Load logging options from environment variables
    pub fn from_env() -> Self {
        Self {
            format: get_env_or("LOG_FORMAT", "pretty"),
        }
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Resolve the configuration file location
pub fn default_config_path() -> PathBuf {
    match env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => {
            let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
            Path::new(&home).join(".config").join("xray").join("helper.yaml")
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
