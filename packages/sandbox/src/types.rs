// ABOUTME: Sandbox record types tracked by the instance registry
// ABOUTME: Includes status lifecycle and per-step provisioning diagnostics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical instance identifier assigned by the controller
pub type InstanceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    /// Provider sandbox exists, pipeline still running
    Provisioning,
    /// Every pipeline step completed
    Ready,
    /// At least one optional step failed
    Degraded,
    /// Provider sandbox deleted
    Stopped,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxStatus::Provisioning => "provisioning",
            SandboxStatus::Ready => "ready",
            SandboxStatus::Degraded => "degraded",
            SandboxStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a pipeline step did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDiagnostic {
    pub step: String,
    pub reason: String,
}

/// A provisioned sandbox as seen by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRecord {
    #[serde(rename = "sandbox_id")]
    pub provider_sandbox_id: String,
    pub terminal_url: Option<String>,
    pub vnc_base_url: Option<String>,
    pub vnc_token: Option<String>,
    pub status: SandboxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<StepDiagnostic>,
    pub created_at: DateTime<Utc>,
}

impl SandboxRecord {
    /// Tentative record for a sandbox the provider just created
    pub fn provisioning(provider_sandbox_id: impl Into<String>, repo_url: Option<String>) -> Self {
        Self {
            provider_sandbox_id: provider_sandbox_id.into(),
            terminal_url: None,
            vnc_base_url: None,
            vnc_token: None,
            status: SandboxStatus::Provisioning,
            repo_url,
            diagnostics: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}
