//! Observability configuration parsing from environment variables.
//!
//! This module handles loading the pull endpoint and status reporter settings.

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub port: u16,
    pub bind_address: String,
    /// Seconds between status reports
    pub interval: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            bind_address: "127.0.0.1".to_string(),
            interval: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("OBSERVABILITY_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
            port: env::var("OBSERVABILITY_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse::<u16>()
                .unwrap_or(9090),
            bind_address: env::var("OBSERVABILITY_BIND_ADDRESS")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            interval: env::var("OBSERVABILITY_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()
                .unwrap_or(60)
                .max(1),
        }
    }

    /// Address the pull endpoint binds to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid OBSERVABILITY_BIND_ADDRESS/PORT: {}:{}",
                    self.bind_address, self.port
                )
            })
    }
}
