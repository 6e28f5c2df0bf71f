// ABOUTME: Provisioning pipeline that turns a bare sandbox into a running desktop tool
// ABOUTME: Executes an ordered step list; only credential checks and creation are fatal

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::providers::{MouseButton, PreviewLink, Provider, ProviderError};
use crate::registry::Registry;
use crate::types::{InstanceId, SandboxRecord, SandboxStatus, StepDiagnostic};

pub const DEFAULT_INSTALL_COMMAND: &str = "npm install -g opencode-ai@latest";
pub const DEFAULT_LAUNCH_COMMAND: &str = "opencode";
pub const DEFAULT_WORKSPACE_DIR: &str = "/home/daytona";
pub const DEFAULT_TERMINAL_HOTKEY: &str = "ctrl+alt+t";
/// noVNC websockify port inside the sandbox desktop
pub const DEFAULT_VNC_PORT: u16 = 6080;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Provider precondition failed: {0}")]
    Precondition(#[source] ProviderError),

    #[error("Failed to create sandbox: {0}")]
    Create(#[source] ProviderError),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Fixed waits standing in for completion signals the remote desktop never sends
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionTimings {
    /// After starting the desktop service
    pub desktop_settle: Duration,
    /// After the hotkey that opens a terminal window
    pub terminal_open: Duration,
    /// After clicking into the terminal
    pub focus_settle: Duration,
    /// After typing the launch command
    pub type_settle: Duration,
    /// After pressing Enter, before fetching the preview link
    pub launch_settle: Duration,
}

impl Default for ProvisionTimings {
    fn default() -> Self {
        Self {
            desktop_settle: Duration::from_secs(5),
            terminal_open: Duration::from_secs(3),
            focus_settle: Duration::from_secs(1),
            type_settle: Duration::from_millis(300),
            launch_settle: Duration::from_secs(2),
        }
    }
}

impl ProvisionTimings {
    /// No waiting at all
    pub fn immediate() -> Self {
        Self {
            desktop_settle: Duration::ZERO,
            terminal_open: Duration::ZERO,
            focus_settle: Duration::ZERO,
            type_settle: Duration::ZERO,
            launch_settle: Duration::ZERO,
        }
    }

    pub fn total(&self) -> Duration {
        self.desktop_settle
            + self.terminal_open
            + self.focus_settle
            + self.type_settle
            + self.launch_settle
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionConfig {
    pub public: bool,
    pub install_command: String,
    pub install_timeout: Duration,
    pub workspace_dir: String,
    pub clone_timeout: Duration,
    pub terminal_hotkey: String,
    pub focus_x: i32,
    pub focus_y: i32,
    pub focus_button: MouseButton,
    pub launch_command: String,
    /// Ctrl+M is a carriage return in terminals
    pub enter_key: String,
    pub enter_modifiers: BTreeSet<String>,
    pub vnc_port: u16,
    pub timings: ProvisionTimings,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            public: true,
            install_command: DEFAULT_INSTALL_COMMAND.to_string(),
            install_timeout: Duration::from_secs(180),
            workspace_dir: DEFAULT_WORKSPACE_DIR.to_string(),
            clone_timeout: Duration::from_secs(300),
            terminal_hotkey: DEFAULT_TERMINAL_HOTKEY.to_string(),
            focus_x: 500,
            focus_y: 350,
            focus_button: MouseButton::Left,
            launch_command: DEFAULT_LAUNCH_COMMAND.to_string(),
            enter_key: "m".to_string(),
            enter_modifiers: BTreeSet::from(["ctrl".to_string()]),
            vnc_port: DEFAULT_VNC_PORT,
            timings: ProvisionTimings::default(),
        }
    }
}

/// One independently failable unit of the pipeline, after sandbox creation
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStep {
    StartDesktop,
    Wait {
        label: &'static str,
        duration: Duration,
    },
    Exec {
        label: &'static str,
        command: String,
        timeout: Duration,
    },
    Hotkey(String),
    Click {
        x: i32,
        y: i32,
        button: MouseButton,
    },
    TypeText(String),
    KeyCombo {
        key: String,
        modifiers: BTreeSet<String>,
    },
    FetchPreview {
        port: u16,
    },
}

impl PipelineStep {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStep::StartDesktop => "start_desktop",
            PipelineStep::Wait { label, .. } => *label,
            PipelineStep::Exec { label, .. } => *label,
            PipelineStep::Hotkey(_) => "open_terminal",
            PipelineStep::Click { .. } => "focus_terminal",
            PipelineStep::TypeText(_) => "type_launch_command",
            PipelineStep::KeyCombo { .. } => "press_enter",
            PipelineStep::FetchPreview { .. } => "fetch_preview",
        }
    }
}

/// Waits between input-automation steps. A provider that can report real
/// completion would swap this out without touching step order.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn settle(&self, label: &str, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn settle(&self, label: &str, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        info!(step = label, "Waiting {:?}", duration);
        tokio::time::sleep(duration).await;
    }
}

enum StepOutput {
    Done,
    Preview(PreviewLink),
}

/// Drives sandboxes through the provisioning pipeline
pub struct Provisioner {
    provider: Arc<dyn Provider>,
    config: ProvisionConfig,
    pacer: Arc<dyn Pacer>,
}

impl Provisioner {
    pub fn new(provider: Arc<dyn Provider>, config: ProvisionConfig) -> Self {
        Self {
            provider,
            config,
            pacer: Arc::new(TokioPacer),
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Ordered steps run after the sandbox exists
    pub fn steps(&self, repo_url: Option<&str>) -> Vec<PipelineStep> {
        let config = &self.config;
        let timings = &config.timings;

        let mut steps = vec![
            PipelineStep::StartDesktop,
            PipelineStep::Wait {
                label: "wait_desktop",
                duration: timings.desktop_settle,
            },
            PipelineStep::Exec {
                label: "install_tool",
                command: config.install_command.clone(),
                timeout: config.install_timeout,
            },
        ];

        if let Some(repo_url) = repo_url {
            steps.push(PipelineStep::Exec {
                label: "clone_repository",
                command: clone_command(&config.workspace_dir, repo_url),
                timeout: config.clone_timeout,
            });
        }

        steps.extend([
            PipelineStep::Hotkey(config.terminal_hotkey.clone()),
            PipelineStep::Wait {
                label: "wait_terminal",
                duration: timings.terminal_open,
            },
            PipelineStep::Click {
                x: config.focus_x,
                y: config.focus_y,
                button: config.focus_button,
            },
            PipelineStep::Wait {
                label: "wait_focus",
                duration: timings.focus_settle,
            },
            PipelineStep::TypeText(config.launch_command.clone()),
            PipelineStep::Wait {
                label: "wait_typing",
                duration: timings.type_settle,
            },
            PipelineStep::KeyCombo {
                key: config.enter_key.clone(),
                modifiers: config.enter_modifiers.clone(),
            },
            PipelineStep::Wait {
                label: "wait_launch",
                duration: timings.launch_settle,
            },
            PipelineStep::FetchPreview {
                port: config.vnc_port,
            },
        ]);

        steps
    }

    /// Run the whole pipeline for instance `id`.
    ///
    /// The record enters `registry` as soon as the provider has created the
    /// sandbox and is updated in place as the pipeline progresses. Errors are
    /// returned only for the fatal phase, in which case nothing is registered.
    pub async fn provision(
        &self,
        registry: &Registry,
        id: InstanceId,
        repo_url: Option<String>,
    ) -> Result<SandboxRecord> {
        let repo_url = repo_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        self.provider.ensure_credentials().map_err(|e| {
            error!(instance_id = id, "Provider credentials unavailable: {}", e);
            ProvisionError::Precondition(e)
        })?;

        info!(
            instance_id = id,
            provider = self.provider.name(),
            "Creating sandbox"
        );
        let sandbox_id = self
            .provider
            .create_sandbox(self.config.public)
            .await
            .map_err(|e| {
                error!(instance_id = id, "Sandbox creation failed: {}", e);
                ProvisionError::Create(e)
            })?;
        info!(instance_id = id, sandbox_id = %sandbox_id, "Sandbox created");

        let mut record = SandboxRecord::provisioning(sandbox_id.clone(), repo_url.clone());
        registry.put(id, record.clone()).await;
        let mut detached = false;

        for step in self.steps(repo_url.as_deref()) {
            let label = step.label();
            let changed = match self.run_step(&sandbox_id, &step).await {
                Ok(StepOutput::Done) => false,
                Ok(StepOutput::Preview(link)) => {
                    record.terminal_url = Some(terminal_url(&link.url, link.token.as_deref()));
                    record.vnc_base_url = Some(link.url);
                    record.vnc_token = link.token;
                    true
                }
                Err(reason) => {
                    warn!(
                        instance_id = id,
                        sandbox_id = %sandbox_id,
                        step = label,
                        "Step degraded: {}",
                        reason
                    );
                    record.diagnostics.push(StepDiagnostic {
                        step: label.to_string(),
                        reason,
                    });
                    true
                }
            };

            if changed && !detached {
                detached = !sync_record(registry, id, &record).await;
            }
        }

        record.status = if detached {
            SandboxStatus::Stopped
        } else if record.is_degraded() {
            SandboxStatus::Degraded
        } else {
            SandboxStatus::Ready
        };

        if !detached {
            detached = !sync_record(registry, id, &record).await;
            if detached {
                record.status = SandboxStatus::Stopped;
            }
        }

        info!(
            instance_id = id,
            sandbox_id = %sandbox_id,
            status = %record.status,
            degraded_steps = record.diagnostics.len(),
            "Provisioning finished"
        );
        Ok(record)
    }

    async fn run_step(
        &self,
        sandbox_id: &str,
        step: &PipelineStep,
    ) -> std::result::Result<StepOutput, String> {
        let provider = &self.provider;
        let label = step.label();

        match step {
            PipelineStep::Wait { duration, .. } => {
                self.pacer.settle(label, *duration).await;
                return Ok(StepOutput::Done);
            }
            PipelineStep::FetchPreview { port } => {
                info!(sandbox_id, step = label, "Fetching preview link for port {}", port);
                return provider
                    .preview_link(sandbox_id, *port)
                    .await
                    .map(StepOutput::Preview)
                    .map_err(|e| e.to_string());
            }
            PipelineStep::Exec {
                command, timeout, ..
            } => {
                info!(sandbox_id, step = label, "Running `{}`", command);
                let result = provider
                    .exec(sandbox_id, command, *timeout)
                    .await
                    .map_err(|e| e.to_string())?;
                if !result.succeeded() {
                    warn!(
                        sandbox_id,
                        step = label,
                        output = %result.output.trim(),
                        "Command exited with {}",
                        result.exit_code
                    );
                    return Err(format!("command exited with code {}", result.exit_code));
                }
                return Ok(StepOutput::Done);
            }
            _ => {}
        }

        info!(sandbox_id, step = label, "Running step");
        let outcome = match step {
            PipelineStep::StartDesktop => provider.start_desktop(sandbox_id).await,
            PipelineStep::Hotkey(combo) => provider.send_hotkey(sandbox_id, combo).await,
            PipelineStep::Click { x, y, button } => {
                provider.mouse_click(sandbox_id, *x, *y, *button).await
            }
            PipelineStep::TypeText(text) => provider.type_text(sandbox_id, text).await,
            PipelineStep::KeyCombo { key, modifiers } => {
                provider.send_key_combo(sandbox_id, key, modifiers).await
            }
            PipelineStep::Wait { .. }
            | PipelineStep::Exec { .. }
            | PipelineStep::FetchPreview { .. } => Ok(()),
        };

        outcome.map(|_| StepOutput::Done).map_err(|e| e.to_string())
    }
}

/// Copy the pipeline's view of the record into the registry. Returns false
/// once the instance has been removed by a concurrent stop.
async fn sync_record(registry: &Registry, id: InstanceId, record: &SandboxRecord) -> bool {
    match registry.update(id, |stored| *stored = record.clone()).await {
        Ok(_) => true,
        Err(e) => {
            warn!(instance_id = id, "Instance removed during provisioning: {}", e);
            false
        }
    }
}

/// Browser URL of the provider's bundled noVNC client
pub fn terminal_url(base_url: &str, token: Option<&str>) -> String {
    let mut url = if base_url.ends_with('/') {
        format!("{}vnc.html", base_url)
    } else {
        format!("{}/vnc.html", base_url)
    };

    if let Some(token) = token {
        url.push_str("?token=");
        url.push_str(token);
    }
    url
}

fn clone_command(workspace_dir: &str, repo_url: &str) -> String {
    format!(
        "cd {} && git clone {} project",
        shell_quote(workspace_dir),
        shell_quote(repo_url)
    )
}

/// Single-quote a value for POSIX shells
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
