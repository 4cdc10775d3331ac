// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Proxy Configuration
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional file (`rabbitmq-proxy.toml`/`.yaml`/`.json`, path overridable via
//! `RABBITMQ_PROXY_CONFIG`), then environment variables such as
//! `RABBITMQ_PROXY__BROKER__HOST`. A `.env` file is loaded first when present.
//!
//! Configuration is read once at startup and never reloaded.

use config::{Config, ConfigError, Environment, File, Map};
use serde::Deserialize;
use std::fmt;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "RABBITMQ_PROXY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RABBITMQ_PROXY";
/// Environment variable holding the log filter directives.
pub const LOG_ENV_VAR: &str = "RABBITMQ_PROXY_LOG";
/// Configuration file looked up when `RABBITMQ_PROXY_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "rabbitmq-proxy";
/// Queue every published message converges on.
pub const DEFAULT_QUEUE: &str = "service_redemption_queue";

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Address the HTTP endpoint binds to.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Broker connection parameters plus the well-known queue name.
#[derive(Clone, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub queue: String,
    pub connection_name: String,
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("vhost", &self.vhost)
            .field("queue", &self.queue)
            .field("connection_name", &self.connection_name)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub secret_key: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret_key", &"***")
            .finish()
    }
}

/// Logging sink. Without a file, log lines go to stdout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    pub file: Option<String>,
}

impl ProxyConfig {
    /// Loads the configuration from `.env`, the optional config file and the
    /// process environment.
    pub fn load() -> Result<ProxyConfig, ConfigError> {
        dotenvy::dotenv().ok();

        let file =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_owned());

        Self::build(Some(&file), None)
    }

    /// Builds the configuration from an optional file and an environment map.
    ///
    /// A `None` environment reads the process environment.
    pub(crate) fn build(
        file: Option<&str>,
        env: Option<Map<String, String>>,
    ) -> Result<ProxyConfig, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("broker.host", "localhost")?
            .set_default("broker.port", 5672)?
            .set_default("broker.username", "guest")?
            .set_default("broker.password", "guest")?
            .set_default("broker.vhost", "/")?
            .set_default("broker.queue", DEFAULT_QUEUE)?
            .set_default("broker.connection_name", env!("CARGO_PKG_NAME"))?
            .set_default("auth.secret_key", "")?;

        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let cfg: ProxyConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;

        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("server.port must be in 1-65535".into()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Message("broker.port must be in 1-65535".into()));
        }
        if self.broker.queue.is_empty() {
            return Err(ConfigError::Message("broker.queue must not be empty".into()));
        }
        if self.auth.secret_key.is_empty() {
            return Err(ConfigError::Message("auth.secret_key must be set".into()));
        }

        Ok(())
    }

    /// Socket address string for the HTTP listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
