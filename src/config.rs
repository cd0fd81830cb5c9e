//! Configuration module for agwarden.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Command-line flags layer on top of these values in `main`.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::sql::{Concurrency, Credential, QueryOptions};

/// Configuration error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a SQL login needs a password (AGWARDEN_SQL_PASSWORD)")]
    MissingPassword,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP port for the status view (default: 8080)
    pub http_port: u16,
    /// Per-statement timeout in seconds (default: 30)
    pub command_timeout_secs: u64,
    /// Per-connection-attempt timeout in seconds (default: 15)
    pub connect_timeout_secs: u64,
    /// Pause after a failover command before dependent steps (default: 10)
    pub settle_secs: u64,
    /// Directory generated reports are written to (default: ".")
    pub report_dir: PathBuf,
    /// Try every resolved address of a listener (default: true)
    pub multi_subnet_failover: bool,
    /// SQL login; integrated authentication when unset
    pub sql_user: Option<String>,
    pub sql_password: Option<String>,
    /// Number of targets queried at once; 1 keeps the sequential order (default: 1)
    pub max_parallel: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            command_timeout_secs: 30,
            connect_timeout_secs: 15,
            settle_secs: 10,
            report_dir: PathBuf::from("."),
            multi_subnet_failover: true,
            sql_user: None,
            sql_password: None,
            max_parallel: 1,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `AGWARDEN_HTTP_PORT`
    /// - `AGWARDEN_COMMAND_TIMEOUT_SECS`
    /// - `AGWARDEN_CONNECT_TIMEOUT_SECS`
    /// - `AGWARDEN_SETTLE_SECS`
    /// - `AGWARDEN_REPORT_DIR`
    /// - `AGWARDEN_MULTI_SUBNET_FAILOVER` (`true`/`false`)
    /// - `AGWARDEN_SQL_USER`, `AGWARDEN_SQL_PASSWORD`
    /// - `AGWARDEN_MAX_PARALLEL`
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("AGWARDEN_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Some(secs) = parse_var("AGWARDEN_COMMAND_TIMEOUT_SECS") {
            cfg.command_timeout_secs = secs;
        }
        if let Some(secs) = parse_var("AGWARDEN_CONNECT_TIMEOUT_SECS") {
            cfg.connect_timeout_secs = secs;
        }
        if let Some(secs) = parse_var("AGWARDEN_SETTLE_SECS") {
            cfg.settle_secs = secs;
        }
        if let Ok(dir) = env::var("AGWARDEN_REPORT_DIR") {
            cfg.report_dir = PathBuf::from(dir);
        }
        if let Some(flag) = parse_var("AGWARDEN_MULTI_SUBNET_FAILOVER") {
            cfg.multi_subnet_failover = flag;
        }
        if let Ok(user) = env::var("AGWARDEN_SQL_USER") {
            if !user.is_empty() {
                cfg.sql_user = Some(user);
            }
        }
        if let Ok(password) = env::var("AGWARDEN_SQL_PASSWORD") {
            cfg.sql_password = Some(password);
        }
        if let Some(n) = parse_var::<usize>("AGWARDEN_MAX_PARALLEL") {
            cfg.max_parallel = n.max(1);
        }

        cfg
    }

    /// Reject combinations no connection could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sql_user.is_some() && self.sql_password.is_none() {
            return Err(ConfigError::MissingPassword);
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Zero("command timeout"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Zero("connect timeout"));
        }
        Ok(())
    }

    /// Credential derived from the configured login.
    pub fn credential(&self) -> Credential {
        match &self.sql_user {
            Some(user) => Credential::SqlLogin {
                user: user.clone(),
                password: self.sql_password.clone().unwrap_or_default(),
            },
            None => Credential::Integrated,
        }
    }

    /// Executor options derived from this configuration.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            multi_subnet_failover: self.multi_subnet_failover,
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            credential: self.credential(),
            ..QueryOptions::default()
        }
    }

    pub fn concurrency(&self) -> Concurrency {
        if self.max_parallel <= 1 {
            Concurrency::Sequential
        } else {
            Concurrency::Bounded(self.max_parallel)
        }
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
