//! Configuration loading and validation for lb-sync

use crate::model::ObjectKey;
use crate::queue::RateLimiter;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "LB_SYNC_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub target: TargetSettings,

    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub keepalived: KeepalivedSettings,

    #[serde(default)]
    pub source: SourceSettings,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.target.validate()?;
        self.keepalived.validate()?;
        self.source.validate()?;
        self.reconciler.validate()?;
        self.metrics.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// The single load balancer this node manages
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TargetSettings {
    #[validate(length(min = 1))]
    pub namespace: String,

    #[validate(length(min = 1))]
    pub name: String,
}

/// This node's identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Source address for unicast VRRP; excluded from the peer list.
    pub address: Option<IpAddr>,
}

/// keepalived paths
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KeepalivedSettings {
    #[validate(custom = "validate_absolute_path")]
    pub config_path: PathBuf,

    #[validate(custom = "validate_absolute_path")]
    pub pid_file: PathBuf,

    /// State-change FIFO; transitions are not observed when unset.
    #[validate(custom = "validate_notify_fifo")]
    pub notify_fifo: Option<PathBuf>,
}

/// Desired-state and membership file
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourceSettings {
    pub path: PathBuf,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_poll_interval")]
    pub poll_interval: Duration,
}

/// Work queue and worker settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReconcilerSettings {
    #[validate(range(min = 1, max = 64))]
    pub workers: usize,

    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    #[validate(range(min = 1, max = 100000))]
    pub event_channel: usize,
}

/// Prometheus endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(length(min = 1))]
    pub listen_addr: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,

    #[validate(custom = "validate_log_format")]
    pub format: Option<String>,
}

// Default implementations

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            name: "lb".to_string(),
        }
    }
}

impl Default for KeepalivedSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/keepalived/keepalived.conf"),
            pid_file: PathBuf::from("/var/run/keepalived.pid"),
            notify_fifo: Some(PathBuf::from("/var/run/lb-sync/notify.fifo")),
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/lb-sync/state.yaml"),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            event_channel: 256,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0:9443".to_string(),
        }
    }
}

// Custom validators

fn validate_absolute_path(path: &PathBuf) -> Result<(), ValidationError> {
    if !path.is_absolute() {
        return Err(ValidationError::new("path_not_absolute"));
    }
    Ok(())
}

/// Written into keepalived's `global_defs` verbatim.
fn validate_notify_fifo(path: &PathBuf) -> Result<(), ValidationError> {
    validate_absolute_path(path)?;
    let printable = path.to_str().is_some_and(|p| {
        p.chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '{' | '}' | '"' | '#' | '!'))
    });
    if !printable {
        return Err(ValidationError::new("notify_fifo_not_plain"));
    }
    Ok(())
}

fn validate_poll_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(100..=300_000).contains(&millis) {
        return Err(ValidationError::new("poll_interval_out_of_range"));
    }
    Ok(())
}

fn validate_log_format(format: &String) -> Result<(), ValidationError> {
    match format.as_str() {
        "text" | "json" => Ok(()),
        _ => Err(ValidationError::new("log_format_unknown")),
    }
}

impl ReconcilerSettings {
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.base_delay, self.max_delay)
    }
}

impl TargetSettings {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

impl Config {
    /// Load from `LB_SYNC_CONFIG`, else the default search paths, else defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path));
            }
            tracing::info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(&path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        if config.reconciler.base_delay > config.reconciler.max_delay {
            let mut errors = validator::ValidationErrors::new();
            errors.add("max_delay", ValidationError::new("max_delay_below_base_delay"));
            return Err(errors.into());
        }
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/lb-sync/lb-sync.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./lb-sync.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/lb-sync/lb-sync.yaml"))
    }

    pub fn json_logging(&self) -> bool {
        self.logging.format.as_deref() == Some("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconciler.workers, 1);
        assert_eq!(config.reconciler.rate_limiter(), RateLimiter::default());
    }

    #[test]
    fn test_valid_yaml_parsing() {
        let yaml = r#"
target:
  namespace: default
  name: edge

node:
  address: 10.0.0.1

keepalived:
  config_path: /tmp/keepalived.conf
  pid_file: /tmp/keepalived.pid

source:
  path: /tmp/state.yaml
  poll_interval: 500ms

reconciler:
  workers: 2
  base_delay: 10ms
  max_delay: 5m
  event_channel: 64

metrics:
  enabled: false
  listen_addr: 127.0.0.1:9000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.target.key(), ObjectKey::new("default", "edge"));
        assert_eq!(config.node.address, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(
            config.keepalived.notify_fifo,
            Some(PathBuf::from("/var/run/lb-sync/notify.fifo"))
        );
        assert_eq!(config.source.poll_interval, Duration::from_millis(500));
        assert_eq!(config.reconciler.max_delay, Duration::from_secs(300));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
target:
  name: edge
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.target.namespace, "kube-system");
        assert_eq!(config.reconciler.base_delay, Duration::from_millis(5));
        assert_eq!(config.node.address, None);
    }

    #[test]
    fn test_invalid_values() {
        let yaml = r#"
reconciler:
  workers: 0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
keepalived:
  config_path: keepalived.conf
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
source:
  poll_interval: 10ms  # Invalid: < 100ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = "keepalived:\n  notify_fifo: \"/run/notify fifo\\n}\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
keepalived:
  notify_fifo: run/notify.fifo
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
logging:
  format: xml
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_checks_delays() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lb-sync.yaml");
        std::fs::write(&path, "reconciler:\n  base_delay: 10s\n  max_delay: 1s\n").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(ConfigError::ValidationError(_))
        ));

        std::fs::write(&path, "logging:\n  format: json\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert!(config.json_logging());
    }
}
