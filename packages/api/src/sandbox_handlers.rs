// ABOUTME: HTTP request handlers for creating, stopping and listing sandbox instances
// ABOUTME: Create runs the provisioning pipeline inline; stop deletes at the provider before forgetting

use axum::{body::Bytes, extract::State, Json};
use deskrun_sandbox::{InstanceId, ProviderError, SandboxRecord, SandboxStatus};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Body of a successful create: the logical id plus the stored record
#[derive(Debug, Serialize)]
pub struct CreateSandboxResponse {
    pub instance_id: InstanceId,
    #[serde(flatten)]
    pub record: SandboxRecord,
}

/// Options accepted by create. Anything unreadable counts as no options.
#[derive(Debug, Default, PartialEq)]
pub struct CreateOptions {
    pub repo_url: Option<String>,
}

impl CreateOptions {
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        Self {
            repo_url: value
                .get("repo_url")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Create a sandbox and run it through the full provisioning pipeline
pub async fn create_sandbox(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CreateSandboxResponse>> {
    let options = CreateOptions::from_body(&body);
    let instance_id = state.registry.allocate().await;
    info!(
        instance_id,
        repo_url = options.repo_url.as_deref().unwrap_or("-"),
        "Creating sandbox instance"
    );

    let record = state
        .provisioner
        .provision(&state.registry, instance_id, options.repo_url)
        .await?;

    Ok(Json(CreateSandboxResponse {
        instance_id,
        record,
    }))
}

fn invalid_instance_id() -> AppError {
    AppError::Validation("Invalid instance_id".to_string())
}

/// Extract a non-negative integer `instance_id` from a stop request body
pub fn parse_instance_id(body: &[u8]) -> Option<InstanceId> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("instance_id")?
        .as_u64()
}

/// Stop a sandbox: delete it at the provider, then drop it from the registry.
/// A sandbox the provider no longer knows is already deleted, so it is dropped too.
pub async fn stop_sandbox(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let instance_id = parse_instance_id(&body).ok_or_else(invalid_instance_id)?;
    let record = state
        .registry
        .get(instance_id)
        .await
        .map_err(|_| invalid_instance_id())?;

    info!(
        instance_id,
        sandbox_id = %record.provider_sandbox_id,
        "Stopping sandbox instance"
    );
    match state
        .provider()
        .delete_sandbox(&record.provider_sandbox_id)
        .await
    {
        Ok(()) => {}
        // Lost a race with a concurrent stop, or deleted out of band
        Err(ProviderError::NotFound(_)) => warn!(
            instance_id,
            sandbox_id = %record.provider_sandbox_id,
            "Sandbox already gone at the provider"
        ),
        Err(e) => return Err(e.into()),
    }

    match state.registry.delete(instance_id).await {
        Ok(mut removed) => {
            removed.status = SandboxStatus::Stopped;
            info!(
                instance_id,
                sandbox_id = %removed.provider_sandbox_id,
                status = %removed.status,
                "Sandbox instance removed"
            );
        }
        // A concurrent stop may already have removed it
        Err(e) => debug!(instance_id, "Registry entry already gone: {}", e),
    }

    Ok(Json(json!({ "success": true })))
}

/// Snapshot of every live sandbox keyed by instance id, in creation order
pub async fn sandbox_status(State(state): State<AppState>) -> Result<Json<Value>> {
    let mut sandboxes = Map::new();
    for (instance_id, record) in state.registry.list().await {
        let value = serde_json::to_value(record).map_err(anyhow::Error::from)?;
        sandboxes.insert(instance_id.to_string(), value);
    }

    Ok(Json(json!({ "sandboxes": sandboxes })))
}
