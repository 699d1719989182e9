//! Scanner configuration
//!
//! Loaded from TOML, then overridden by CLI flags. Every field has a default,
//! so an empty file is a valid configuration.

use crate::error::ConfigError;
use crate::mode::ExecutionMode;
use a11y_core::{WcagLevel, WcagVersion};
use a11y_sandbox::{InjectorSettings, WebDriverConfig, DEFAULT_ENGINE_SCRIPT_URL};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default CMS REST base
pub const DEFAULT_CMS_BASE_URL: &str = "http://localhost:8080/.rest/easya11y";

/// Default WebDriver endpoint
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

/// Batch scheduling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Pages per window
    pub concurrency: usize,
    /// Pause between windows
    pub window_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            window_delay_ms: 500,
        }
    }
}

impl BatchSettings {
    #[inline]
    #[must_use]
    pub fn window_delay(&self) -> Duration {
        Duration::from_millis(self.window_delay_ms)
    }
}

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub cms_base_url: String,
    pub webdriver_url: String,
    pub engine_script_url: String,
    /// Conformance level override; `None` defers to the CMS configuration
    pub default_level: Option<WcagLevel>,
    /// Rule-set version override; `None` defers to the CMS configuration
    pub wcag_version: Option<WcagVersion>,
    /// Fixed execution mode; `None` defers to the CMS configuration
    pub mode: Option<ExecutionMode>,
    /// How long CMS configuration stays cached
    pub config_ttl_secs: u64,
    pub load_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub ready_poll_interval_ms: u64,
    /// CMS request timeout
    pub request_timeout_secs: u64,
    pub batch: BatchSettings,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            cms_base_url: DEFAULT_CMS_BASE_URL.to_string(),
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            engine_script_url: DEFAULT_ENGINE_SCRIPT_URL.to_string(),
            default_level: None,
            wcag_version: None,
            mode: None,
            config_ttl_secs: 60,
            load_timeout_ms: 30_000,
            settle_delay_ms: 1_000,
            ready_poll_interval_ms: 100,
            request_timeout_secs: 60,
            batch: BatchSettings::default(),
        }
    }
}

impl ScannerConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text and validate
    ///
    /// # Errors
    /// `ConfigError::Parse` on bad TOML, `ConfigError::Invalid` on bad values.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and validate
    ///
    /// # Errors
    /// `ConfigError::Read` if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text, path)?;
        tracing::debug!(path = %path.display(), "loaded scanner config");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.concurrency == 0 {
            return Err(ConfigError::invalid("batch.concurrency", "must be at least 1"));
        }
        for (field, value) in [
            ("cms_base_url", &self.cms_base_url),
            ("webdriver_url", &self.webdriver_url),
            ("engine_script_url", &self.engine_script_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        if self.load_timeout_ms == 0 {
            return Err(ConfigError::invalid("load_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_cms_base_url(mut self, url: impl Into<String>) -> Self {
        self.cms_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_webdriver_url(mut self, url: impl Into<String>) -> Self {
        self.webdriver_url = url.into();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_default_level(mut self, level: WcagLevel) -> Self {
        self.default_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_wcag_version(mut self, version: WcagVersion) -> Self {
        self.wcag_version = Some(version);
        self
    }

    /// With batch window size; zero is rejected by [`Self::validate`]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.batch.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_window_delay(mut self, delay: Duration) -> Self {
        self.batch.window_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn config_ttl(&self) -> Duration {
        Duration::from_secs(self.config_ttl_secs)
    }

    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Injector settings derived from this config
    #[must_use]
    pub fn injector_settings(&self) -> InjectorSettings {
        InjectorSettings::default()
            .with_engine_script_url(self.engine_script_url.clone())
            .with_load_timeout(Duration::from_millis(self.load_timeout_ms))
            .with_settle_delay(Duration::from_millis(self.settle_delay_ms))
            .with_ready_poll_interval(Duration::from_millis(self.ready_poll_interval_ms))
    }

    /// WebDriver settings derived from this config
    #[must_use]
    pub fn webdriver_config(&self) -> WebDriverConfig {
        WebDriverConfig::default()
            .with_endpoint(self.webdriver_url.clone())
            .with_page_load_timeout(Duration::from_millis(self.load_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_is_default() {
        let config = ScannerConfig::from_toml_str("", Path::new("scanner.toml")).unwrap();
        assert_eq!(config, ScannerConfig::default());
        assert_eq!(config.batch.concurrency, 3);
        assert_eq!(config.config_ttl(), Duration::from_secs(60));
        assert_eq!(config.default_level, None);
        assert_eq!(config.wcag_version, None);
    }

    #[test]
    fn partial_file_overrides_fields() {
        let text = r#"
            cms_base_url = "https://cms.example/.rest/easya11y"
            default_level = "AAA"
            wcag_version = "2.2"
            mode = "serverDelegated"

            [batch]
            concurrency = 5
        "#;
        let config = ScannerConfig::from_toml_str(text, Path::new("scanner.toml")).unwrap();
        assert_eq!(config.cms_base_url, "https://cms.example/.rest/easya11y");
        assert_eq!(config.default_level, Some(WcagLevel::AAA));
        assert_eq!(config.wcag_version, Some(WcagVersion::V2_2));
        assert_eq!(config.mode, Some(ExecutionMode::ServerDelegated));
        assert_eq!(config.batch.concurrency, 5);
        assert_eq!(config.batch.window_delay_ms, 500);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = ScannerConfig::default().with_concurrency(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "batch.concurrency", .. }));
    }

    #[test]
    fn empty_url_is_rejected() {
        let err = ScannerConfig::default()
            .with_cms_base_url(" ")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cms_base_url", .. }));
    }

    #[test]
    fn bad_toml_reports_path() {
        let err = ScannerConfig::from_toml_str("batch = 3", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner.toml");
        std::fs::write(&path, "load_timeout_ms = 5000\n").unwrap();
        let config = ScannerConfig::load(&path).unwrap();
        assert_eq!(
            config.injector_settings().load_timeout,
            Duration::from_millis(5000)
        );
        assert!(ScannerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
