use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use domain::services::ViewSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub polling: PollingConfig,
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Backend base URL including the API prefix, e.g. `http://host:8000/api`.
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// File holding the persisted auth record.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Clock skew tolerance when checking the access token's `exp` claim.
    #[serde(default = "default_leeway")]
    pub leeway_secs: i64,

    /// Credentials for unattended login when no valid session is stored.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Position feed interval while a device is focused.
    #[serde(default = "default_focused_interval")]
    pub focused_interval_secs: u64,

    /// Position feed interval in overview.
    #[serde(default = "default_overview_interval")]
    pub overview_interval_secs: u64,

    #[serde(default = "default_alerts_interval")]
    pub alerts_interval_secs: u64,

    /// Geofence listing refresh, also the retry period after a failed listing.
    #[serde(default = "default_geofences_interval")]
    pub geofences_interval_secs: u64,

    /// Consecutive failed polls before connectivity is reported degraded.
    #[serde(default = "default_degraded_after")]
    pub degraded_after_failures: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// A listed device silent for this long gets a device-inactive alert.
    #[serde(default = "default_inactivity_threshold")]
    pub inactivity_threshold_secs: u64,

    #[serde(default = "default_true")]
    pub inactivity_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_focus_zoom")]
    pub focus_zoom: u8,

    #[serde(default = "default_center_lat")]
    pub default_center_lat: f64,

    #[serde(default = "default_center_lng")]
    pub default_center_lng: f64,

    #[serde(default = "default_zoom")]
    pub default_zoom: u8,

    #[serde(default = "default_deep_link_cycles")]
    pub deep_link_max_cycles: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            focus_zoom: default_focus_zoom(),
            default_center_lat: default_center_lat(),
            default_center_lng: default_center_lng(),
            default_zoom: default_zoom(),
            deep_link_max_cycles: default_deep_link_cycles(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_request_timeout() -> u64 {
    15
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_storage_path() -> PathBuf {
    PathBuf::from(".farmtrack/auth-storage.json")
}
fn default_leeway() -> i64 {
    shared::jwt::DEFAULT_LEEWAY_SECS
}
fn default_focused_interval() -> u64 {
    3
}
fn default_overview_interval() -> u64 {
    30
}
fn default_alerts_interval() -> u64 {
    30
}
fn default_geofences_interval() -> u64 {
    60
}
fn default_degraded_after() -> u32 {
    3
}
fn default_inactivity_threshold() -> u64 {
    900
}
fn default_true() -> bool {
    true
}
fn default_focus_zoom() -> u8 {
    16
}
fn default_center_lat() -> f64 {
    -15.4167
}
fn default_center_lng() -> f64 {
    28.2833
}
fn default_zoom() -> u8 {
    10
}
fn default_deep_link_cycles() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with FT__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("FT").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Builds the config from embedded defaults so tests do not depend on
    /// the working directory.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [api]
            base_url = "http://localhost:8000/api"
            request_timeout_secs = 15
            connect_timeout_secs = 5

            [auth]
            storage_path = ".farmtrack/auth-storage.json"
            leeway_secs = 30

            [polling]
            focused_interval_secs = 3
            overview_interval_secs = 30
            alerts_interval_secs = 30
            geofences_interval_secs = 60
            degraded_after_failures = 3

            [alerts]
            inactivity_threshold_secs = 900
            inactivity_enabled = true

            [tracking]
            focus_zoom = 16
            default_center_lat = -15.4167
            default_center_lng = 28.2833
            default_zoom = 10
            deep_link_max_cycles = 5

            [logging]
            level = "info"
            format = "json"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "FT__API__BASE_URL environment variable must be set".to_string(),
            ));
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ConfigValidationError::InvalidValue(
                "api.base_url must be an http(s) URL".to_string(),
            ));
        }

        if self.polling.focused_interval_secs == 0
            || self.polling.overview_interval_secs == 0
            || self.polling.alerts_interval_secs == 0
            || self.polling.geofences_interval_secs == 0
        {
            return Err(ConfigValidationError::InvalidValue(
                "Polling intervals must be greater than 0".to_string(),
            ));
        }

        if self.polling.focused_interval_secs > self.polling.overview_interval_secs {
            return Err(ConfigValidationError::InvalidValue(
                "focused_interval_secs cannot exceed overview_interval_secs".to_string(),
            ));
        }

        if self.polling.degraded_after_failures == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "degraded_after_failures must be at least 1".to_string(),
            ));
        }

        if self.tracking.deep_link_max_cycles == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "deep_link_max_cycles must be at least 1".to_string(),
            ));
        }

        shared::validation::validate_coordinate(
            self.tracking.default_center_lat,
            self.tracking.default_center_lng,
        )
        .map_err(|e| {
            ConfigValidationError::InvalidValue(format!(
                "tracking default center: {}",
                e.message.unwrap_or_default()
            ))
        })?;

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.connect_timeout_secs)
    }

    pub fn view_settings(&self) -> ViewSettings {
        ViewSettings {
            focus_zoom: self.tracking.focus_zoom,
            default_center: (self.tracking.default_center_lat, self.tracking.default_center_lng),
            default_zoom: self.tracking.default_zoom,
            deep_link_max_cycles: self.tracking.deep_link_max_cycles,
        }
    }
}

impl PollingConfig {
    pub fn focused_interval(&self) -> Duration {
        Duration::from_secs(self.focused_interval_secs)
    }

    pub fn overview_interval(&self) -> Duration {
        Duration::from_secs(self.overview_interval_secs)
    }

    pub fn alerts_interval(&self) -> Duration {
        Duration::from_secs(self.alerts_interval_secs)
    }

    pub fn geofences_interval(&self) -> Duration {
        Duration::from_secs(self.geofences_interval_secs)
    }
}

impl AlertsConfig {
    pub fn inactivity_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inactivity_threshold_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_for_test_defaults() {
        let config = Config::load_for_test(&[]).expect("Failed to load config");
        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert_eq!(config.polling.focused_interval(), Duration::from_secs(3));
        assert_eq!(config.polling.overview_interval(), Duration::from_secs(30));
        assert_eq!(config.polling.degraded_after_failures, 3);
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_view_settings_from_config() {
        let config = Config::load_for_test(&[("tracking.focus_zoom", "15")])
            .expect("Failed to load config");
        let settings = config.view_settings();
        assert_eq!(settings.focus_zoom, 15);
        assert_eq!(settings.default_center, (-15.4167, 28.2833));
        assert_eq!(settings.default_zoom, 10);
    }

    #[test]
    fn test_validation_requires_base_url() {
        let config = Config::load_for_test(&[("api.base_url", "")]).expect("Failed to load config");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("FT__API__BASE_URL"));
    }

    #[test]
    fn test_validation_rejects_non_http_url() {
        let config = Config::load_for_test(&[("api.base_url", "ftp://farm")])
            .expect("Failed to load config");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_interval_order() {
        let config = Config::load_for_test(&[
            ("polling.focused_interval_secs", "60"),
            ("polling.overview_interval_secs", "30"),
        ])
        .expect("Failed to load config");

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("focused_interval_secs"));
    }

    #[test]
    fn test_validation_zero_interval() {
        let config = Config::load_for_test(&[("polling.alerts_interval_secs", "0")])
            .expect("Failed to load config");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_default_center_range() {
        let config = Config::load_for_test(&[("tracking.default_center_lat", "123.0")])
            .expect("Failed to load config");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Latitude"));
    }

    #[test]
    fn test_inactivity_threshold() {
        let config = Config::load_for_test(&[("alerts.inactivity_threshold_secs", "120")])
            .expect("Failed to load config");
        assert_eq!(config.alerts.inactivity_threshold(), chrono::Duration::minutes(2));
    }
}
