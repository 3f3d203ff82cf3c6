use anyhow::{anyhow, Context, Result};
use renderctl_resolver::ResolverOptions;
use renderctl_upnp::{SoapClient, SsdpConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file, every section optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub probe: ProbeConfig,
    pub enrich: EnrichConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// NOTIFY listen window
    pub listen_secs: u64,
    /// M-SEARCH collection window per search target
    pub search_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub budget_secs: u64,
    pub attempt_timeout_ms: u64,
    pub deep_search: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub identity_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: Option<PathBuf>,
    pub enabled: bool,
    pub auto_accept: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_secs: 3,
            search_window_secs: 3,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            budget_secs: 8,
            attempt_timeout_ms: 2000,
            deep_search: false,
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            identity_timeout_secs: 3,
            fetch_timeout_secs: 5,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            enabled: true,
            auto_accept: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// An explicit path must exist; the default location is optional
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache.path {
            Some(path) => Ok(path.clone()),
            None => default_cache_path(),
        }
    }

    pub fn ssdp(&self) -> SsdpConfig {
        SsdpConfig {
            listen_window: Duration::from_secs(self.discovery.listen_secs),
            search_window: Duration::from_secs(self.discovery.search_window_secs),
            ..SsdpConfig::default()
        }
    }

    pub fn soap_client(&self) -> Result<SoapClient> {
        SoapClient::new(
            Duration::from_millis(self.probe.attempt_timeout_ms),
            Duration::from_secs(self.enrich.fetch_timeout_secs),
        )
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            ssdp: self.discovery.enabled,
            use_cache: self.cache.enabled,
            probe_budget: Duration::from_secs(self.probe.budget_secs),
            deep_search: self.probe.deep_search,
            identity_timeout: Duration::from_secs(self.enrich.identity_timeout_secs),
        }
    }
}

/// `<config_dir>/renderctl/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("renderctl").join("config.toml"))
}

/// `<data_dir>/renderctl/devices.json`
pub fn default_cache_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| anyhow!("Could not determine data directory"))?;
    Ok(data_dir.join("renderctl").join("devices.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.discovery.enabled);
        assert_eq!(config.probe.budget_secs, 8);
        assert_eq!(config.probe.attempt_timeout_ms, 2000);
        assert!(config.cache.enabled);
        assert!(!config.cache.auto_accept);

        let options = config.resolver_options();
        assert!(options.ssdp && options.use_cache && !options.deep_search);
        assert_eq!(options.probe_budget, Duration::from_secs(8));
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [probe]
            deep_search = true

            [cache]
            path = "/tmp/devices.json"
            auto_accept = true
            "#,
        )
        .unwrap();

        assert!(config.probe.deep_search);
        assert_eq!(config.probe.budget_secs, 8);
        assert!(config.cache.auto_accept);
        assert!(config.cache.enabled);
        assert_eq!(config.cache_path().unwrap(), PathBuf::from("/tmp/devices.json"));
    }

    #[test]
    fn test_ssdp_windows() {
        let config: Config = toml::from_str("[discovery]\nlisten_secs = 1\nsearch_window_secs = 2").unwrap();
        let ssdp = config.ssdp();
        assert_eq!(ssdp.listen_window, Duration::from_secs(1));
        assert_eq!(ssdp.search_window, Duration::from_secs(2));
        assert_eq!(ssdp.resend_delay, Duration::from_millis(150));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discovery]\nenabled = false").unwrap();

        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert!(!config.discovery.enabled);
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_or_default(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_bad_toml_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[probe]\nbudget_secs = \"soon\"").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
