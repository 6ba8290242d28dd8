// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for flowgate-server.

use std::net::SocketAddr;
use std::time::Duration;

use flowgate_connectors::HttpAdapterConfig;
use flowgate_connectors::github::DEFAULT_API_URL;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Connection pool size.
    pub db_max_connections: u32,
    /// Secret used to verify billing webhook signatures.
    pub stripe_webhook_secret: Option<String>,
    /// Timeout for n8n and GitHub calls.
    pub provider_timeout: Duration,
    /// GitHub API endpoint.
    pub github_api_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FLOWGATE_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("FLOWGATE_DATABASE_URL"))?;

        let port: u16 = std::env::var("FLOWGATE_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let db_max_connections = std::env::var("FLOWGATE_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let stripe_webhook_secret = std::env::var("FLOWGATE_STRIPE_WEBHOOK_SECRET")
            .ok()
            .filter(|v| !v.is_empty());

        let provider_timeout_secs = std::env::var("FLOWGATE_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let github_api_url = std::env::var("FLOWGATE_GITHUB_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            db_max_connections,
            stripe_webhook_secret,
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            github_api_url,
        })
    }

    /// Settings for the HTTP adapters.
    pub fn adapter_config(&self) -> HttpAdapterConfig {
        HttpAdapterConfig {
            timeout: self.provider_timeout,
            github_api_url: self.github_api_url.clone(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}
