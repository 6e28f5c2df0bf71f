// ABOUTME: Daytona provider backed by the Daytona REST and toolbox APIs
// ABOUTME: Creates sandboxes, drives their computer-use desktop and resolves preview links

use super::{ExecResult, MouseButton, PreviewLink, Provider, ProviderError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_API_URL: &str = "https://app.daytona.io/api";
pub const DEFAULT_TARGET: &str = "us";

/// Extra time granted to the HTTP call beyond the command's own timeout
const EXEC_GRACE: Duration = Duration::from_secs(15);

const STATE_STARTED: &str = "started";
const FAILED_STATES: [&str; 4] = ["error", "build_failed", "destroying", "destroyed"];

/// Connection settings for the Daytona API
#[derive(Debug, Clone)]
pub struct DaytonaConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub target: String,
    /// Timeout applied to every call except command execution
    pub request_timeout: Duration,
    /// How long create waits for a new sandbox to reach `started`
    pub startup_timeout: Duration,
    pub startup_poll_interval: Duration,
}

impl Default for DaytonaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            target: DEFAULT_TARGET.to_string(),
            request_timeout: Duration::from_secs(60),
            startup_timeout: Duration::from_secs(120),
            startup_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Daytona provider for remote desktop sandboxes
pub struct DaytonaProvider {
    http_client: Client,
    config: DaytonaConfig,
}

#[derive(Debug, Deserialize)]
struct SandboxResponse {
    id: String,
    /// Absent on older API versions, which only answer once the sandbox runs
    #[serde(default)]
    state: Option<String>,
}

impl SandboxResponse {
    fn is_started(&self) -> bool {
        self.state
            .as_deref()
            .map_or(true, |state| state.eq_ignore_ascii_case(STATE_STARTED))
    }

    fn failed_state(&self) -> Option<&str> {
        self.state
            .as_deref()
            .filter(|state| FAILED_STATES.contains(&state.to_ascii_lowercase().as_str()))
    }
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    #[serde(rename = "exitCode")]
    exit_code: i64,
    #[serde(default)]
    result: String,
}

#[derive(Debug, Serialize)]
struct CreateSandboxBody<'a> {
    public: bool,
    target: &'a str,
}

impl DaytonaProvider {
    pub fn new(config: DaytonaConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn toolbox_url(&self, sandbox_id: &str, path: &str) -> String {
        self.api_url(&format!("toolbox/{}/toolbox/{}", sandbox_id, path))
    }

    fn auth_header(&self) -> Result<String> {
        self.ensure_credentials()?;
        Ok(format!(
            "Bearer {}",
            self.config.api_key.as_deref().unwrap_or_default()
        ))
    }

    /// POST a JSON body to a toolbox endpoint and discard the response body
    async fn toolbox_post(&self, sandbox_id: &str, path: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .http_client
            .post(self.toolbox_url(sandbox_id, path))
            .header("Authorization", self.auth_header()?)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        check_status(response, sandbox_id).await?;
        Ok(())
    }

    async fn fetch_sandbox(&self, sandbox_id: &str) -> Result<SandboxResponse> {
        let response = self
            .http_client
            .get(self.api_url(&format!("sandbox/{}", sandbox_id)))
            .header("Authorization", self.auth_header()?)
            .send()
            .await
            .map_err(map_transport_error)?;

        check_status(response, sandbox_id)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    /// Poll the sandbox until it reports `started`, fails, or the startup timeout passes
    async fn wait_until_started(&self, mut sandbox: SandboxResponse) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout;
        loop {
            if let Some(state) = sandbox.failed_state() {
                return Err(ProviderError::Api {
                    status: 500,
                    message: format!("sandbox {} entered state '{}'", sandbox.id, state),
                });
            }
            if sandbox.is_started() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProviderError::Timeout(format!(
                    "sandbox {} still '{}' after {:?}",
                    sandbox.id,
                    sandbox.state.as_deref().unwrap_or_default(),
                    self.config.startup_timeout
                )));
            }

            debug!(
                "Waiting for Daytona sandbox {} (state: {})",
                sandbox.id,
                sandbox.state.as_deref().unwrap_or_default()
            );
            tokio::time::sleep(self.config.startup_poll_interval).await;
            sandbox = self.fetch_sandbox(&sandbox.id).await?;
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::NetworkError(err.to_string())
    }
}

/// Translate non-success HTTP statuses into provider errors
async fn check_status(response: Response, sandbox_id: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(sandbox_id.to_string()),
        _ => ProviderError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl Provider for DaytonaProvider {
    fn name(&self) -> &str {
        "daytona"
    }

    fn ensure_credentials(&self) -> Result<()> {
        match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(ProviderError::ConfigError(
                "DAYTONA_API_KEY is not set".to_string(),
            )),
        }
    }

    async fn create_sandbox(&self, public: bool) -> Result<String> {
        info!("Creating Daytona sandbox (target: {})", self.config.target);

        let response = self
            .http_client
            .post(self.api_url("sandbox"))
            .header("Authorization", self.auth_header()?)
            .json(&CreateSandboxBody {
                public,
                target: &self.config.target,
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        let sandbox: SandboxResponse = check_status(response, "")
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let sandbox_id = sandbox.id.clone();
        debug!("Created Daytona sandbox: {}", sandbox_id);

        if let Err(e) = self.wait_until_started(sandbox).await {
            // Do not leave a sandbox nobody will track
            if let Err(cleanup) = self.delete_sandbox(&sandbox_id).await {
                warn!("Failed to delete unstarted sandbox {}: {}", sandbox_id, cleanup);
            }
            return Err(e);
        }

        Ok(sandbox_id)
    }

    async fn delete_sandbox(&self, sandbox_id: &str) -> Result<()> {
        info!("Deleting Daytona sandbox: {}", sandbox_id);

        let response = self
            .http_client
            .delete(self.api_url(&format!("sandbox/{}", sandbox_id)))
            .header("Authorization", self.auth_header()?)
            .send()
            .await
            .map_err(map_transport_error)?;

        check_status(response, sandbox_id).await?;
        Ok(())
    }

    async fn start_desktop(&self, sandbox_id: &str) -> Result<()> {
        self.toolbox_post(sandbox_id, "computeruse/start", json!({}))
            .await
    }

    async fn exec(
        &self,
        sandbox_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecResult> {
        debug!("Executing in {}: {}", sandbox_id, command);

        let response = self
            .http_client
            .post(self.toolbox_url(sandbox_id, "process/execute"))
            .header("Authorization", self.auth_header()?)
            .timeout(timeout + EXEC_GRACE)
            .json(&json!({
                "command": command,
                "timeout": timeout.as_secs(),
            }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let exec: ExecResponse = check_status(response, sandbox_id)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(ExecResult {
            exit_code: exec.exit_code,
            output: exec.result,
        })
    }

    async fn send_hotkey(&self, sandbox_id: &str, combo: &str) -> Result<()> {
        self.toolbox_post(
            sandbox_id,
            "computeruse/keyboard/hotkey",
            json!({ "keys": combo }),
        )
        .await
    }

    async fn mouse_click(
        &self,
        sandbox_id: &str,
        x: i32,
        y: i32,
        button: MouseButton,
    ) -> Result<()> {
        self.toolbox_post(
            sandbox_id,
            "computeruse/mouse/click",
            json!({ "x": x, "y": y, "button": button.as_str(), "double": false }),
        )
        .await
    }

    async fn type_text(&self, sandbox_id: &str, text: &str) -> Result<()> {
        self.toolbox_post(
            sandbox_id,
            "computeruse/keyboard/type",
            json!({ "text": text }),
        )
        .await
    }

    async fn send_key_combo(
        &self,
        sandbox_id: &str,
        key: &str,
        modifiers: &BTreeSet<String>,
    ) -> Result<()> {
        self.toolbox_post(
            sandbox_id,
            "computeruse/keyboard/key",
            json!({ "key": key, "modifiers": modifiers }),
        )
        .await
    }

    async fn preview_link(&self, sandbox_id: &str, port: u16) -> Result<PreviewLink> {
        let response = self
            .http_client
            .get(self.api_url(&format!(
                "sandbox/{}/ports/{}/preview-url",
                sandbox_id, port
            )))
            .header("Authorization", self.auth_header()?)
            .send()
            .await
            .map_err(map_transport_error)?;

        check_status(response, sandbox_id)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}
