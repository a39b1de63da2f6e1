//! Configuration file management for tlstracker.
//!
//! Settings are layered with clear precedence rules:
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (tlstracker.toml or specified with --config)
//! 3. Command-line arguments (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! hosts = ["example.com", "example.org"]
//! output = "summary"
//! exit_code = 1
//! workers = 20
//! task_timeout_secs = 10
//! verify_peer = false
//! warn_days = 30
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::pool::{
    PoolOptions, DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TASK_TIMEOUT,
};
use crate::probe::Prober;

/// How check results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    Json,
    Text,
    Summary,
}

/// Main configuration structure.
///
/// All fields are optional to support partial configuration and merging.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Hosts to check
    pub hosts: Option<Vec<String>>,
    /// Output format: json, text, summary
    pub output: Option<String>,
    /// Exit code to use when a check failed or a certificate is expired
    pub exit_code: Option<i32>,
    /// Number of concurrent workers
    pub workers: Option<usize>,
    /// Per-check timeout in seconds
    pub task_timeout_secs: Option<u64>,
    /// Capacity of the task and result queues
    pub queue_capacity: Option<usize>,
    /// Grace period for in-flight checks at shutdown, in seconds
    pub shutdown_timeout_secs: Option<u64>,
    /// Verify the peer chain and hostname during the handshake
    pub verify_peer: Option<bool>,
    /// Certificates expiring within this many days are flagged
    pub warn_days: Option<i64>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Prometheus push gateway settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

impl Default for Config {
    /// Defaults: summary output, exit code 0, 20 workers, 10s per check,
    /// 30s shutdown grace, no peer verification, warn at 30 days, prometheus
    /// disabled.
    fn default() -> Self {
        Config {
            hosts: None,
            output: Some(OutputFormat::Summary.to_string()),
            exit_code: Some(0),
            workers: Some(20),
            task_timeout_secs: Some(DEFAULT_TASK_TIMEOUT.as_secs()),
            queue_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            shutdown_timeout_secs: Some(DEFAULT_SHUTDOWN_TIMEOUT.as_secs()),
            verify_peer: Some(false),
            warn_days: Some(30),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// ```no_run
    /// # use tlstracker::config::Config;
    /// let config = Config::from_file("tlstracker.toml")?;
    /// # Ok::<(), tlstracker::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Merges `other` into this configuration. Every field `other` sets wins.
    pub fn merge_with(mut self, other: Config) -> Self {
        override_with(&mut self.hosts, other.hosts);
        override_with(&mut self.output, other.output);
        override_with(&mut self.exit_code, other.exit_code);
        override_with(&mut self.workers, other.workers);
        override_with(&mut self.task_timeout_secs, other.task_timeout_secs);
        override_with(&mut self.queue_capacity, other.queue_capacity);
        override_with(&mut self.shutdown_timeout_secs, other.shutdown_timeout_secs);
        override_with(&mut self.verify_peer, other.verify_peer);
        override_with(&mut self.warn_days, other.warn_days);

        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                override_with(&mut self_prom.enabled, other_prom.enabled);
                override_with(&mut self_prom.address, other_prom.address);
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Builds a partial configuration from command-line values. Only the
    /// `Some` values override other layers.
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli_args(
        hosts: Option<Vec<String>>,
        output: Option<String>,
        exit_code: Option<i32>,
        workers: Option<usize>,
        task_timeout_secs: Option<u64>,
        verify_peer: Option<bool>,
        prometheus: Option<bool>,
        prometheus_address: Option<String>,
    ) -> Self {
        Config {
            hosts,
            output,
            exit_code,
            workers,
            task_timeout_secs,
            queue_capacity: None,
            shutdown_timeout_secs: None,
            verify_peer,
            warn_days: None,
            prometheus: Some(PrometheusConfig {
                enabled: prometheus,
                address: prometheus_address,
            }),
        }
    }

    /// Rejects values the checker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.output_format()?;
        if self.workers == Some(0) {
            return Err(ConfigError::Validation(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "task_timeout_secs must be positive".to_string(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Validation(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if self.prometheus_enabled() && self.prometheus_address().is_none() {
            return Err(ConfigError::Validation(
                "prometheus is enabled but no address is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn output_format(&self) -> Result<OutputFormat, ConfigError> {
        match &self.output {
            None => Ok(OutputFormat::Summary),
            Some(s) => OutputFormat::from_str(s)
                .map_err(|_| ConfigError::Validation(format!("unknown output format: {}", s))),
        }
    }

    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus
            .as_ref()
            .and_then(|p| p.enabled)
            .unwrap_or(false)
    }

    pub fn prometheus_address(&self) -> Option<&str> {
        self.prometheus.as_ref().and_then(|p| p.address.as_deref())
    }

    /// Pool sizing and timing derived from this configuration.
    pub fn pool_options(&self) -> PoolOptions {
        let defaults = PoolOptions::default();
        PoolOptions {
            workers: self.workers.unwrap_or(defaults.workers),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            task_timeout: self
                .task_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.task_timeout),
            shutdown_timeout: self
                .shutdown_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            prober: Prober::new().verify_peer(self.verify_peer.unwrap_or(false)),
        }
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            hosts: Some(vec![
                "example.com".to_string(),
                "https://secure.example.com".to_string(),
                "expired.badssl.com".to_string(),
            ]),
            exit_code: Some(1),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: Some("http://localhost:9091".to_string()),
            }),
            ..Config::default()
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

fn override_with<T>(base: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *base = value;
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found, permission denied, etc.
    #[error("IO Error: {0}")]
    Io(String),
    /// Invalid TOML syntax or a type mismatch
    #[error("Parse Error: {0}")]
    Parse(String),
    /// A value the checker cannot run with
    #[error("Validation Error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
            hosts = ["example.com", "example.org"]
            output = "json"
            exit_code = 1
            workers = 8
            task_timeout_secs = 5
            verify_peer = true

            [prometheus]
            enabled = true
            address = "http://localhost:9092"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(
            config.hosts,
            Some(vec!["example.com".to_string(), "example.org".to_string()])
        );
        assert_eq!(config.output_format().unwrap(), OutputFormat::Json);
        assert_eq!(config.exit_code, Some(1));
        assert_eq!(config.workers, Some(8));
        assert_eq!(config.verify_peer, Some(true));
        assert_eq!(config.queue_capacity, None);
        assert!(config.prometheus_enabled());
        assert_eq!(config.prometheus_address(), Some("http://localhost:9092"));
    }

    #[test]
    fn test_config_merge() {
        let base = Config::default();
        let file = Config {
            hosts: Some(vec!["file.com".to_string()]),
            output: Some("text".to_string()),
            workers: Some(4),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: None,
            }),
            ..empty()
        };
        let cli = Config::from_cli_args(
            Some(vec!["cli.com".to_string()]),
            None,
            Some(2),
            None,
            Some(3),
            None,
            None,
            Some("http://cli:9091".to_string()),
        );

        let merged = base.merge_with(file).merge_with(cli);

        assert_eq!(merged.hosts, Some(vec!["cli.com".to_string()]));
        assert_eq!(merged.output, Some("text".to_string()));
        assert_eq!(merged.exit_code, Some(2));
        assert_eq!(merged.workers, Some(4));
        assert_eq!(merged.task_timeout_secs, Some(3));
        assert_eq!(merged.warn_days, Some(30));
        assert!(merged.prometheus_enabled());
        assert_eq!(merged.prometheus_address(), Some("http://cli:9091"));
    }

    #[test]
    fn test_pool_options_from_config() {
        let config = Config {
            workers: Some(3),
            task_timeout_secs: Some(2),
            ..Config::default()
        };
        let options = config.pool_options();
        assert_eq!(options.workers, 3);
        assert_eq!(options.task_timeout, Duration::from_secs(2));
        assert_eq!(options.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(options.prober.port(), 443);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let bad_output = Config {
            output: Some("yaml".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            bad_output.validate(),
            Err(ConfigError::Validation(_))
        ));

        let no_workers = Config {
            workers: Some(0),
            ..Config::default()
        };
        assert!(no_workers.validate().is_err());

        let prom_without_address = Config {
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: None,
            }),
            ..Config::default()
        };
        assert!(prom_without_address.validate().is_err());
    }

    #[test]
    fn test_output_format_case_insensitive() {
        let config = Config {
            output: Some("JSON".to_string()),
            ..Config::default()
        };
        assert_eq!(config.output_format().unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::Summary.to_string(), "summary");
    }

    #[test]
    fn test_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hosts = [invalid toml").unwrap();

        match Config::from_file(temp_file.path()) {
            Err(ConfigError::Parse(_)) => {}
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_example_toml_generation() {
        let parsed: Config = toml::from_str(&Config::example_toml()).unwrap();
        assert!(parsed.hosts.is_some());
        assert!(parsed.prometheus_enabled());
        assert!(parsed.validate().is_ok());
    }

    fn empty() -> Config {
        Config {
            hosts: None,
            output: None,
            exit_code: None,
            workers: None,
            task_timeout_secs: None,
            queue_capacity: None,
            shutdown_timeout_secs: None,
            verify_peer: None,
            warn_days: None,
            prometheus: None,
        }
    }
}
