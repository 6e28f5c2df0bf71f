pub mod commands;
pub mod config;
pub mod logging;
pub mod server;

pub use config::{Config, ConfigError};

#[cfg(test)]
mod tests;
