// ABOUTME: Provider trait for remote desktop sandbox backends
// ABOUTME: Defines the lifecycle, command execution and input automation contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

pub mod daytona;

pub use daytona::{DaytonaConfig, DaytonaProvider};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Outcome of a command executed inside a sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i64,
    #[serde(default)]
    pub output: String,
}

impl ExecResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Tunnel endpoint the provider exposes for a port inside a sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewLink {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Mouse button used for simulated clicks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
        }
    }
}

impl std::fmt::Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider trait for remote sandboxes with an attached virtual desktop.
///
/// Every operation after `create_sandbox` addresses the sandbox by the
/// opaque identifier the provider returned.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human readable provider name used in logs
    fn name(&self) -> &str;

    /// Fail fast when the credentials needed to reach the provider are missing.
    /// Called before any network traffic.
    fn ensure_credentials(&self) -> Result<()>;

    /// Create a new sandbox and return its provider identifier
    async fn create_sandbox(&self, public: bool) -> Result<String>;

    /// Delete a sandbox and release its resources
    async fn delete_sandbox(&self, sandbox_id: &str) -> Result<()>;

    /// Start the remote desktop (VNC) service inside the sandbox
    async fn start_desktop(&self, sandbox_id: &str) -> Result<()>;

    /// Run a shell command inside the sandbox, bounded by `timeout`
    async fn exec(&self, sandbox_id: &str, command: &str, timeout: Duration)
        -> Result<ExecResult>;

    /// Send a hotkey combination such as `ctrl+alt+t`
    async fn send_hotkey(&self, sandbox_id: &str, combo: &str) -> Result<()>;

    /// Click at a screen coordinate on the sandbox desktop
    async fn mouse_click(&self, sandbox_id: &str, x: i32, y: i32, button: MouseButton)
        -> Result<()>;

    /// Type text into the focused window
    async fn type_text(&self, sandbox_id: &str, text: &str) -> Result<()>;

    /// Press a single key while holding the given modifiers
    async fn send_key_combo(
        &self,
        sandbox_id: &str,
        key: &str,
        modifiers: &BTreeSet<String>,
    ) -> Result<()>;

    /// Fetch the public tunnel URL and access token for a port inside the sandbox
    async fn preview_link(&self, sandbox_id: &str, port: u16) -> Result<PreviewLink>;
}
