use crate::error::{CoreError, Result};
use crate::paths;
use oba_network::{ClientOptions, Url};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RegionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    /// OneBusAway REST API server, e.g. `https://api.pugetsound.onebusaway.org`.
    pub rest_base_url: String,
    /// Obaco server; regions without one only get REST alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obaco_base_url: Option<String>,
    #[serde(default = "default_region_id")]
    pub region_id: String,
}

fn default_region_id() -> String {
    "1".to_string()
}

// ---------------------------------------------------------------------------
// NetworkConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub region: RegionConfig,
    #[serde(default)]
    pub api_key: String,
    /// Per-install identifier sent as `app_uid`; generated at init.
    #[serde(default)]
    pub app_uid: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default)]
    pub network: NetworkConfig,
}

fn default_version() -> u32 {
    1
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Config {
    pub fn new(region_name: impl Into<String>, rest_base_url: impl Into<String>) -> Self {
        Self {
            version: 1,
            region: RegionConfig {
                name: region_name.into(),
                rest_base_url: rest_base_url.into(),
                obaco_base_url: None,
                region_id: default_region_id(),
            },
            api_key: String::new(),
            app_uid: uuid::Uuid::new_v4().to_string(),
            app_version: default_app_version(),
            network: NetworkConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(CoreError::NotInitialized(path));
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Options for every [`oba_network::ApiClient`] built from this config.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_key: self.api_key.clone(),
            app_uid: self.app_uid.clone(),
            app_version: self.app_version.clone(),
            timeout: Duration::from_secs(self.network.timeout_seconds),
            max_concurrent_requests: self.network.max_concurrent_requests,
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // 1. Base URLs must parse as http(s)
        let mut urls = vec![("rest_base_url", self.region.rest_base_url.as_str())];
        if let Some(obaco) = &self.region.obaco_base_url {
            urls.push(("obaco_base_url", obaco.as_str()));
        }
        for (field, raw) in urls {
            match check_base_url(raw) {
                Ok(()) => {}
                Err(reason) => warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("region.{field} '{raw}' is not usable: {reason}"),
                }),
            }
        }

        // 2. Missing API key: most servers reject anonymous requests
        if self.api_key.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "api_key is empty; most OneBusAway servers will reject requests"
                    .to_string(),
            });
        }

        // 3. Obaco without a region id
        if self.region.obaco_base_url.is_some() && self.region.region_id.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "region.region_id is required when obaco_base_url is set".to_string(),
            });
        }

        // 4. Network bounds
        if self.network.timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "network.timeout_seconds must be greater than 0".to_string(),
            });
        }
        if self.network.max_concurrent_requests == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "network.max_concurrent_requests must be greater than 0".to_string(),
            });
        } else if self.network.max_concurrent_requests > 16 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "network.max_concurrent_requests={} (>16 is unusual for a mobile client)",
                    self.network.max_concurrent_requests
                ),
            });
        }

        warnings
    }
}

/// `raw` must be an absolute http(s) URL that can carry a path.
fn check_base_url(raw: &str) -> std::result::Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid() -> Config {
        let mut cfg = Config::new("Puget Sound", "https://api.pugetsound.onebusaway.org");
        cfg.api_key = "TEST".into();
        cfg
    }

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("Puget Sound", "https://api.example.test");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.region.name, "Puget Sound");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.app_uid, cfg.app_uid);
    }

    #[test]
    fn new_generates_app_uid() {
        let a = Config::new("r", "https://a.test");
        let b = Config::new("r", "https://a.test");
        assert!(!a.app_uid.is_empty());
        assert_ne!(a.app_uid, b.app_uid);
    }

    #[test]
    fn minimal_yaml_gets_defaults() {
        let yaml = "region:\n  name: Tampa\n  rest_base_url: https://api.tampa.onebusaway.org\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.region.region_id, "1");
        assert!(cfg.region.obaco_base_url.is_none());
        assert_eq!(cfg.network.timeout_seconds, 30);
        assert_eq!(cfg.network.max_concurrent_requests, 4);

        // And re-serializing must NOT emit an 'obaco_base_url:' key
        let out = serde_yaml::to_string(&cfg).unwrap();
        assert!(!out.contains("obaco_base_url"));
    }

    #[test]
    fn load_without_file_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::NotInitialized(_)));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = valid();
        cfg.region.obaco_base_url = Some("https://onebusaway.co".into());
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(
            loaded.region.obaco_base_url.as_deref(),
            Some("https://onebusaway.co")
        );
        assert_eq!(loaded.api_key, "TEST");
    }

    #[test]
    fn client_options_carry_network_settings() {
        let mut cfg = valid();
        cfg.network.timeout_seconds = 5;
        cfg.network.max_concurrent_requests = 2;
        let opts = cfg.client_options();
        assert_eq!(opts.timeout, Duration::from_secs(5));
        assert_eq!(opts.max_concurrent_requests, 2);
        assert_eq!(opts.api_key, "TEST");
        assert_eq!(opts.app_uid, cfg.app_uid);
    }

    #[test]
    fn valid_config_has_no_warnings() {
        assert!(valid().validate().is_empty());
    }

    #[test]
    fn validate_flags_bad_urls_and_limits() {
        let mut cfg = valid();
        cfg.region.rest_base_url = "ftp://nope".into();
        cfg.region.obaco_base_url = Some("onebusaway.co".into());
        cfg.network.max_concurrent_requests = 0;
        let warnings = cfg.validate();
        let errors: Vec<_> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|w| w.message.contains("unsupported scheme")));
        assert!(errors.iter().any(|w| w.message.contains("relative URL without a base")));
    }

    #[test]
    fn validate_warns_on_empty_api_key() {
        let mut cfg = valid();
        cfg.api_key.clear();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
    }
}
