// ABOUTME: Environment-based server configuration for the fanout server
// ABOUTME: Parses bind address, notification backend, worker count, idle window and channels
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-only configuration.
//!
//! Every value has a default so the server starts with no environment at all
//! (in-process broker, one worker, port 8080). `from_lookup` takes the variable
//! source as a closure so parsing can be tested without touching the process
//! environment.

use crate::constants::{loops, ports};
use crate::errors::{AppError, AppResult};
use crate::models::Channel;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Production deployment
    Production,
    /// Automated tests
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Which notification backend the server talks to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseUrl {
    /// `PostgreSQL` `LISTEN`/`NOTIFY`
    PostgreSQL {
        /// `PostgreSQL` connection string
        connection_string: String,
    },
    /// In-process broker, for development and tests
    #[default]
    Memory,
}

impl DatabaseUrl {
    /// Parse from string with validation
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for anything that is neither a `PostgreSQL` URL
    /// nor `memory:`
    pub fn parse_url(s: &str) -> AppResult<Self> {
        if s.starts_with("postgresql://") || s.starts_with("postgres://") {
            Ok(Self::PostgreSQL {
                connection_string: s.to_owned(),
            })
        } else if s == "memory:" || s == "memory" {
            Ok(Self::Memory)
        } else {
            Err(AppError::config(format!(
                "Unsupported DATABASE_URL '{s}': expected postgres://... or memory:"
            )))
        }
    }

    /// Check if this is the in-process broker
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }

    /// Connection string with any password masked, for logs
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Memory => "memory:".into(),
            Self::PostgreSQL { connection_string } => redact_password(connection_string),
        }
    }
}

impl Display for DatabaseUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.redacted())
    }
}

fn redact_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_owned();
    };
    let Some((userinfo, host)) = rest.split_once('@') else {
        return url.to_owned();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_owned(),
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// HTTP and WebSocket port
    pub http_port: u16,
    /// Notification backend
    pub database: DatabaseUrl,
    /// Number of fanout worker threads
    pub workers: usize,
    /// Idle window after which a connection loop probes both sources
    pub idle_timeout: Duration,
    /// Channels served by the relay handler
    pub channels: Vec<Channel>,
    /// Deployment environment
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: ports::DEFAULT_HOST.into(),
            http_port: ports::DEFAULT_HTTP_PORT,
            database: DatabaseUrl::default(),
            workers: loops::DEFAULT_WORKERS,
            idle_timeout: Duration::from_millis(loops::DEFAULT_IDLE_TIMEOUT_MS),
            channels: Vec::new(),
            environment: Environment::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if any variable fails to parse or validate
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if any variable fails to parse or validate
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let config = Self {
            host: var_or("HOST", ports::DEFAULT_HOST),
            http_port: parse_var("HTTP_PORT", lookup("HTTP_PORT"), ports::DEFAULT_HTTP_PORT)?,
            database: DatabaseUrl::parse_url(&var_or("DATABASE_URL", "memory:"))?,
            workers: parse_var("FANOUT_WORKERS", lookup("FANOUT_WORKERS"), loops::DEFAULT_WORKERS)?,
            idle_timeout: Duration::from_millis(parse_var(
                "FANOUT_IDLE_TIMEOUT_MS",
                lookup("FANOUT_IDLE_TIMEOUT_MS"),
                loops::DEFAULT_IDLE_TIMEOUT_MS,
            )?),
            channels: parse_channels(&var_or("FANOUT_CHANNELS", ""))?,
            environment: Environment::from_str_or_default(&var_or("ENVIRONMENT", "development")),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for a zero worker count or a zero idle window
    pub fn validate(&self) -> AppResult<()> {
        if self.workers == 0 {
            return Err(AppError::config("FANOUT_WORKERS must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(AppError::config("FANOUT_IDLE_TIMEOUT_MS must be greater than 0"));
        }
        Ok(())
    }

    /// One-line description for startup logs
    #[must_use]
    pub fn summary(&self) -> String {
        let channels: Vec<&str> = self.channels.iter().map(Channel::as_str).collect();
        format!(
            "pg-fanout on {}:{} ({}) backend={} workers={} idle_timeout={}ms channels=[{}]",
            self.host,
            self.http_port,
            self.environment,
            self.database,
            self.workers,
            self.idle_timeout.as_millis(),
            channels.join(",")
        )
    }
}

fn parse_var<T>(key: &str, value: Option<String>, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map_err(|e| AppError::config(format!("Invalid {key} value '{raw}': {e}")))
    })
}

/// Parse a comma-separated channel list, skipping blanks
///
/// # Errors
///
/// Returns `ConfigInvalid` naming the first invalid or repeated channel
pub fn parse_channels(list: &str) -> AppResult<Vec<Channel>> {
    let mut channels: Vec<Channel> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let channel = Channel::new(name)
            .map_err(|e| AppError::config(format!("Invalid FANOUT_CHANNELS entry: {}", e.message)))?;
        if channels.contains(&channel) {
            return Err(AppError::config(format!(
                "Channel '{channel}' is listed more than once"
            )));
        }
        channels.push(channel);
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.workers, 1);
        assert_eq!(config.idle_timeout, Duration::from_secs(3));
        assert!(config.database.is_memory());
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_full_environment() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HOST", "0.0.0.0"),
            ("HTTP_PORT", "9000"),
            ("DATABASE_URL", "postgres://fanout:secret@db:5432/app"),
            ("FANOUT_WORKERS", "4"),
            ("FANOUT_IDLE_TIMEOUT_MS", "250"),
            ("FANOUT_CHANNELS", "alpha, beta,,"),
            ("ENVIRONMENT", "prod"),
        ]))
        .unwrap();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.idle_timeout, Duration::from_millis(250));
        assert_eq!(config.channels.len(), 2);
        assert!(config.environment.is_production());
        assert!(config.summary().contains("fanout:***@db:5432"));
        assert!(!config.summary().contains("secret"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for pairs in [
            [("HTTP_PORT", "eighty")],
            [("FANOUT_WORKERS", "0")],
            [("FANOUT_IDLE_TIMEOUT_MS", "0")],
            [("FANOUT_CHANNELS", "ok,not ok")],
            [("FANOUT_CHANNELS", "alpha,beta, alpha")],
            [("DATABASE_URL", "sqlite::memory:")],
        ] {
            let err = ServerConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert_eq!(err.code, ErrorCode::ConfigInvalid, "{pairs:?}");
        }
    }

    #[test]
    fn test_repeated_channel_is_rejected() {
        let err = parse_channels("alpha, Alpha,alpha").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
        assert!(err.message.contains("'alpha'"));

        // Names are case-sensitive, so these are distinct
        assert_eq!(parse_channels("alpha,Alpha").unwrap().len(), 2);
    }
}
