use axum::http::HeaderValue;
use deskrun_sandbox::DaytonaConfig;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::num::ParseIntError;
use thiserror::Error;

const DEFAULT_PORT: &str = "8000";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid CORS origin: {0}")]
    InvalidCorsOrigin(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind_address: IpAddr,
    /// Single allowed origin; any origin when unset
    pub cors_origin: Option<String>,
    pub daytona_api_key: Option<String>,
    pub daytona_api_url: String,
    pub daytona_target: String,
}

/// Read an optional variable, treating blank values as unset
fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate_port(port: u16) -> Result<u16, ConfigError> {
    if port == 0 {
        return Err(ConfigError::PortOutOfRange(port));
    }
    Ok(port)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string());
        let port = validate_port(port_str.trim().parse::<u16>()?)?;

        let bind_str =
            env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
        let bind_address = bind_str
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidBindAddress(bind_str.clone()))?;

        let cors_origin = optional_var("CORS_ORIGIN");
        if let Some(origin) = &cors_origin {
            HeaderValue::from_str(origin)
                .map_err(|_| ConfigError::InvalidCorsOrigin(origin.clone()))?;
        }

        let defaults = DaytonaConfig::default();

        Ok(Config {
            port,
            bind_address,
            cors_origin,
            daytona_api_key: optional_var("DAYTONA_API_KEY"),
            daytona_api_url: optional_var("DAYTONA_API_URL").unwrap_or(defaults.api_url),
            daytona_target: optional_var("DAYTONA_TARGET").unwrap_or(defaults.target),
        })
    }

    /// Apply a port given on the command line
    pub fn with_port(mut self, port: Option<u16>) -> Result<Self, ConfigError> {
        if let Some(port) = port {
            self.port = validate_port(port)?;
        }
        Ok(self)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn daytona_config(&self) -> DaytonaConfig {
        DaytonaConfig {
            api_key: self.daytona_api_key.clone(),
            api_url: self.daytona_api_url.clone(),
            target: self.daytona_target.clone(),
            ..Default::default()
        }
    }
}
