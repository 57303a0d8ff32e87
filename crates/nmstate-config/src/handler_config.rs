//! Handler configuration loading and validation

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use nmstate_core::{InterfaceFilter, PatternError};

/// Environment variable prefix for overrides (`NMSTATE_INTERFACES_FILTER`, ...)
pub const ENV_PREFIX: &str = "NMSTATE";

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Upper bound for every configured timeout and interval, in seconds
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

const DEFAULT_CONFIG_PATHS: &[&str] = &["/etc/nmstate/nmstate.yaml", "./nmstate.yaml"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid interfaces filter: {0}")]
    Filter(#[from] PatternError),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// External commands invoked by the handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub nmstatectl: String,
    pub vlan_filtering: String,
    pub ping: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            nmstatectl: "nmstatectl".to_string(),
            vlan_filtering: "vlan-filtering".to_string(),
            ping: "ping".to_string(),
        }
    }
}

/// Control plane endpoint used by the connectivity probe.
///
/// When `url` is unset the in-cluster service environment
/// (`KUBERNETES_SERVICE_HOST` / `KUBERNETES_SERVICE_PORT`) is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    pub url: Option<String>,
    pub token_path: PathBuf,
    pub ca_path: PathBuf,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            token_path: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token"),
            ca_path: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt"),
        }
    }
}

/// Bounded retry for enactment status writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusRetryConfig {
    pub steps: u32,
    pub backoff_ms: u64,
}

impl Default for StatusRetryConfig {
    fn default() -> Self {
        Self {
            steps: 5,
            backoff_ms: 10,
        }
    }
}

/// Immutable handler configuration snapshot.
///
/// Durations are stored in seconds (`probe_interval_ms` in milliseconds) to
/// keep the file format flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Glob of interfaces excluded from reported node state
    pub interfaces_filter: String,
    pub node_network_state_refresh_interval: u64,
    pub gateway_retrieve_timeout: u64,
    pub gateway_probe_timeout: u64,
    pub api_server_probe_timeout: u64,
    pub probe_interval_ms: u64,
    pub commands: CommandConfig,
    pub api_server: ApiServerConfig,
    pub status_retry: StatusRetryConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            interfaces_filter: "veth*".to_string(),
            node_network_state_refresh_interval: 5,
            gateway_retrieve_timeout: 120,
            gateway_probe_timeout: 120,
            api_server_probe_timeout: 120,
            probe_interval_ms: 1000,
            commands: CommandConfig::default(),
            api_server: ApiServerConfig::default(),
            status_retry: StatusRetryConfig::default(),
        }
    }
}

impl HandlerConfig {
    /// Load configuration from a file, with environment overrides on top
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load(Some(path.as_ref()))
    }

    /// Load configuration from `$CONFIG_PATH` or the standard locations,
    /// falling back to defaults when no file exists
    pub fn load_with_defaults() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                DEFAULT_CONFIG_PATHS
                    .iter()
                    .map(PathBuf::from)
                    .find(|path| path.exists())
            });

        match &path {
            Some(path) => log::info!("Loading configuration from {}", path.display()),
            None => log::info!("No configuration file found, using defaults"),
        }

        Self::load(path.as_deref())
    }

    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: HandlerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check timeouts are usable and the filter glob compiles
    pub fn validate(&self) -> Result<(), ConfigError> {
        let seconds = [
            ("gateway_retrieve_timeout", self.gateway_retrieve_timeout),
            ("gateway_probe_timeout", self.gateway_probe_timeout),
            ("api_server_probe_timeout", self.api_server_probe_timeout),
            (
                "node_network_state_refresh_interval",
                self.node_network_state_refresh_interval,
            ),
        ];
        for (field, value) in seconds {
            check_range(field, value, MAX_TIMEOUT_SECS, "s")?;
        }
        check_range(
            "probe_interval_ms",
            self.probe_interval_ms,
            MAX_TIMEOUT_SECS * 1000,
            "ms",
        )?;

        if self.status_retry.steps == 0 {
            return Err(ConfigError::Invalid {
                field: "status_retry.steps",
                message: "at least one attempt is required".to_string(),
            });
        }

        self.interface_filter()?;
        Ok(())
    }

    pub fn interface_filter(&self) -> Result<InterfaceFilter, ConfigError> {
        Ok(InterfaceFilter::new(&self.interfaces_filter)?)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.node_network_state_refresh_interval)
    }

    pub fn gateway_retrieve_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_retrieve_timeout)
    }

    pub fn gateway_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_probe_timeout)
    }

    pub fn api_server_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.api_server_probe_timeout)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Checkpoint timeout handed to `nmstatectl set`. It outlives the gateway
    /// probe so nmstate's own revert timer is still armed if this process
    /// dies mid transaction.
    pub fn stage_timeout(&self) -> Duration {
        self.gateway_probe_timeout().saturating_mul(2)
    }

    pub fn status_backoff(&self) -> Duration {
        Duration::from_millis(self.status_retry.backoff_ms)
    }
}

fn check_range(field: &'static str, value: u64, max: u64, unit: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            message: "must be greater than zero".to_string(),
        });
    }
    if value > max {
        return Err(ConfigError::Invalid {
            field,
            message: format!("must not exceed {}{}", max, unit),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HandlerConfig::default();
        assert_eq!(config.interfaces_filter, "veth*");
        assert_eq!(config.refresh_interval(), Duration::from_secs(5));
        assert_eq!(config.gateway_probe_timeout(), Duration::from_secs(120));
        assert_eq!(config.stage_timeout(), Duration::from_secs(240));
        assert_eq!(config.status_retry.steps, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "node_network_state_refresh_interval: 1\ninterfaces_filter: \"eth1*\"\ngateway_probe_timeout: 5\ncommands:\n  nmstatectl: /usr/local/bin/nmstatectl"
        )
        .unwrap();

        let config = HandlerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.interfaces_filter, "eth1*");
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
        assert_eq!(config.stage_timeout(), Duration::from_secs(10));
        assert_eq!(config.commands.nmstatectl, "/usr/local/bin/nmstatectl");
        // Untouched keys keep their defaults
        assert_eq!(config.commands.vlan_filtering, "vlan-filtering");
        assert_eq!(config.gateway_retrieve_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HandlerConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.interfaces_filter, "veth*");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = HandlerConfig {
            interfaces_filter: "veth[".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Filter(_))));

        let config = HandlerConfig {
            gateway_probe_timeout: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "gateway_probe_timeout",
                ..
            })
        ));
    }

    #[test]
    fn test_oversized_timeouts_are_rejected() {
        let config = HandlerConfig {
            gateway_retrieve_timeout: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "gateway_retrieve_timeout",
                ..
            })
        ));

        let config = HandlerConfig {
            probe_interval_ms: MAX_TIMEOUT_SECS * 1000 + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HandlerConfig {
            gateway_probe_timeout: MAX_TIMEOUT_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_timeout_saturates() {
        let config = HandlerConfig {
            gateway_probe_timeout: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.stage_timeout(), Duration::MAX);
    }
}
