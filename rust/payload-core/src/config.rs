// rust/payload-core/src/config.rs

//! Configuration management for payload processes.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{PayloadError, Result};

// Top-level payload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    pub coordinator: CoordinatorConfig,
    pub server: ServerConfig,
    pub lifecycle: LifecycleConfig,
    pub failure: FailureConfig,
}

/// Connection settings for the coordinator link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Coordinator address as `host:port`.
    pub address: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Connection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Initial delay (milliseconds) between connection attempts.
    pub reconnect_delay_ms: u64,
}

/// Local RPC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP or hostname the payload endpoint binds to.
    pub bind_ip: String,
    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,
}

/// How the iteration cap is compared against the completed iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapBoundary {
    /// The cap itself is the last iteration: `Ready(0..N-1)`, then `End(N)`.
    #[default]
    Inclusive,
    /// The cap is never reached: `Ready(0..N-2)`, then `End(N-1)`.
    Exclusive,
}

// Loop and iteration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    // First iteration number.
    pub iteration_base: u64,
    // Iteration cap used when the Start directive carries no cap option.
    pub max_iterations: u64,
    // Name of the user option that overrides max_iterations.
    pub max_iterations_option: String,
    pub cap_boundary: CapBoundary,
    // Inbound messages buffered ahead of the message handler.
    pub inbox_capacity: usize,
}

/// What to do when an outbound call to the coordinator fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPolicy {
    /// Log and exit the process with `failure.exit_code`.
    #[default]
    Exit,
    /// Return the error to the caller.
    Propagate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    pub transport_policy: TransportPolicy,
    /// Exit status used by the `exit` policy.
    pub exit_code: i32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            address: "localhost:50000".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 200,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "localhost".to_string(),
            port: 0,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            iteration_base: 0,
            max_iterations: 5,
            max_iterations_option: "nb_iterations".to_string(),
            cap_boundary: CapBoundary::Inclusive,
            inbox_capacity: 1024,
        }
    }
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            transport_policy: TransportPolicy::Exit,
            exit_code: 202, // exit(-54) as seen by the parent
        }
    }
}

impl FromStr for PayloadConfig {
    type Err = PayloadError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| PayloadError::config_with_source("failed to parse TOML config", e))
    }
}

impl PayloadConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PayloadError::io_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `POLLUX_`, e.g.
    // - `POLLUX_COORDINATOR_ADDRESS` overrides `coordinator.address`
    // - `POLLUX_SERVER_BIND_IP` overrides `server.bind_ip`
    // - `POLLUX_LIFECYCLE_CAP_BOUNDARY` overrides `lifecycle.cap_boundary`
    // - `POLLUX_FAILURE_TRANSPORT_POLICY` overrides `failure.transport_policy`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Coordinator overrides
        if let Ok(val) = std::env::var("POLLUX_COORDINATOR_ADDRESS") {
            self.coordinator.address = val;
        }
        if let Ok(val) = std::env::var("POLLUX_COORDINATOR_CONNECT_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.coordinator.connect_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("POLLUX_COORDINATOR_REQUEST_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.coordinator.request_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("POLLUX_COORDINATOR_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                self.coordinator.max_reconnect_attempts = v;
            }
        }

        // Server overrides
        if let Ok(val) = std::env::var("POLLUX_SERVER_BIND_IP") {
            self.server.bind_ip = val;
        }
        if let Ok(val) = std::env::var("POLLUX_SERVER_PORT") {
            if let Ok(v) = val.parse() {
                self.server.port = v;
            }
        }

        // Lifecycle overrides
        if let Ok(val) = std::env::var("POLLUX_LIFECYCLE_ITERATION_BASE") {
            if let Ok(v) = val.parse() {
                self.lifecycle.iteration_base = v;
            }
        }
        if let Ok(val) = std::env::var("POLLUX_LIFECYCLE_MAX_ITERATIONS") {
            if let Ok(v) = val.parse() {
                self.lifecycle.max_iterations = v;
            }
        }
        if let Ok(val) = std::env::var("POLLUX_LIFECYCLE_CAP_BOUNDARY") {
            match val.to_lowercase().as_str() {
                "inclusive" => self.lifecycle.cap_boundary = CapBoundary::Inclusive,
                "exclusive" => self.lifecycle.cap_boundary = CapBoundary::Exclusive,
                _ => {} // ignore invalid values
            }
        }
        if let Ok(val) = std::env::var("POLLUX_LIFECYCLE_INBOX_CAPACITY") {
            if let Ok(v) = val.parse() {
                self.lifecycle.inbox_capacity = v;
            }
        }

        // Failure overrides
        if let Ok(val) = std::env::var("POLLUX_FAILURE_TRANSPORT_POLICY") {
            match val.to_lowercase().as_str() {
                "exit" => self.failure.transport_policy = TransportPolicy::Exit,
                "propagate" => self.failure.transport_policy = TransportPolicy::Propagate,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("POLLUX_FAILURE_EXIT_CODE") {
            if let Ok(v) = val.parse() {
                self.failure.exit_code = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.address.is_empty() {
            return Err(PayloadError::config("coordinator.address must not be empty"));
        }
        if self.coordinator.connect_timeout_ms == 0 {
            return Err(PayloadError::config(
                "coordinator.connect_timeout_ms must be greater than 0",
            ));
        }
        if self.coordinator.request_timeout_ms == 0 {
            return Err(PayloadError::config(
                "coordinator.request_timeout_ms must be greater than 0",
            ));
        }
        if self.coordinator.max_reconnect_attempts == 0 {
            return Err(PayloadError::config(
                "coordinator.max_reconnect_attempts must be greater than 0",
            ));
        }

        if self.server.bind_ip.is_empty() {
            return Err(PayloadError::config("server.bind_ip must not be empty"));
        }

        if self.lifecycle.max_iterations_option.is_empty() {
            return Err(PayloadError::config(
                "lifecycle.max_iterations_option must not be empty",
            ));
        }
        if self.lifecycle.inbox_capacity == 0 {
            return Err(PayloadError::config(
                "lifecycle.inbox_capacity must be greater than 0",
            ));
        }

        if self.failure.exit_code == 0 {
            return Err(PayloadError::config(
                "failure.exit_code must be non-zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PayloadConfig::default();

        assert_eq!(config.coordinator.address, "localhost:50000");
        assert_eq!(config.coordinator.max_reconnect_attempts, 5);
        assert_eq!(config.server.bind_ip, "localhost");
        assert_eq!(config.server.port, 0);

        assert_eq!(config.lifecycle.iteration_base, 0);
        assert_eq!(config.lifecycle.max_iterations, 5);
        assert_eq!(config.lifecycle.max_iterations_option, "nb_iterations");
        assert_eq!(config.lifecycle.cap_boundary, CapBoundary::Inclusive);

        assert_eq!(config.failure.transport_policy, TransportPolicy::Exit);
        assert_eq!(config.failure.exit_code, 202);
    }

    #[test]
    fn test_default_validates() {
        assert!(PayloadConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_str_partial() {
        let toml = r#"
            [coordinator]
            address = "10.0.0.7:50000"

            [lifecycle]
            cap_boundary = "exclusive"
        "#;
        let config: PayloadConfig = toml.parse().unwrap();

        assert_eq!(config.coordinator.address, "10.0.0.7:50000");
        assert_eq!(config.lifecycle.cap_boundary, CapBoundary::Exclusive);
        // Other fields should be defaults
        assert_eq!(config.coordinator.request_timeout_ms, 30_000);
        assert_eq!(config.lifecycle.max_iterations, 5);
        assert_eq!(config.failure.transport_policy, TransportPolicy::Exit);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<PayloadConfig, _> = "invalid = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_str_unknown_policy() {
        let toml = r#"
            [failure]
            transport_policy = "retry"
        "#;
        let result: std::result::Result<PayloadConfig, _> = toml.parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [failure]
            transport_policy = "propagate"
            exit_code = 3
            "#
        )
        .unwrap();

        let config = PayloadConfig::from_file(file.path()).unwrap();
        assert_eq!(config.failure.transport_policy, TransportPolicy::Propagate);
        assert_eq!(config.failure.exit_code, 3);
    }

    #[test]
    fn test_from_file_not_found() {
        let result = PayloadConfig::from_file("/nonexistent/pollux.toml");
        assert!(matches!(result, Err(PayloadError::Io { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_inbox() {
        let mut config = PayloadConfig::default();
        config.lifecycle.inbox_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inbox_capacity"));
    }

    #[test]
    fn test_validate_rejects_zero_exit_code() {
        let mut config = PayloadConfig::default();
        config.failure.exit_code = 0;
        assert!(config.validate().is_err());
    }

    // Environment variables are process-global, so all override checks live
    // in one test.
    #[test]
    fn test_env_overrides() {
        for (key, _) in std::env::vars() {
            if key.starts_with("POLLUX_") {
                std::env::remove_var(&key);
            }
        }

        std::env::set_var("POLLUX_COORDINATOR_ADDRESS", "zebulon:6000");
        std::env::set_var("POLLUX_SERVER_BIND_IP", "0.0.0.0");
        std::env::set_var("POLLUX_LIFECYCLE_CAP_BOUNDARY", "Exclusive");
        std::env::set_var("POLLUX_FAILURE_TRANSPORT_POLICY", "propagate");
        std::env::set_var("POLLUX_LIFECYCLE_MAX_ITERATIONS", "not_a_number");

        let config = PayloadConfig::default().with_env_overrides();

        assert_eq!(config.coordinator.address, "zebulon:6000");
        assert_eq!(config.server.bind_ip, "0.0.0.0");
        assert_eq!(config.lifecycle.cap_boundary, CapBoundary::Exclusive);
        assert_eq!(config.failure.transport_policy, TransportPolicy::Propagate);
        // Unparseable values keep defaults
        assert_eq!(config.lifecycle.max_iterations, 5);

        for key in [
            "POLLUX_COORDINATOR_ADDRESS",
            "POLLUX_SERVER_BIND_IP",
            "POLLUX_LIFECYCLE_CAP_BOUNDARY",
            "POLLUX_FAILURE_TRANSPORT_POLICY",
            "POLLUX_LIFECYCLE_MAX_ITERATIONS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = PayloadConfig::default();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: PayloadConfig = toml_str.parse().unwrap();

        assert_eq!(original.coordinator.address, parsed.coordinator.address);
        assert_eq!(original.lifecycle.cap_boundary, parsed.lifecycle.cap_boundary);
        assert_eq!(original.failure.exit_code, parsed.failure.exit_code);
    }
}
