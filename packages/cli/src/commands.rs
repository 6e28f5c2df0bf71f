// ABOUTME: One-shot commands that talk to the sandbox provider without starting the server
// ABOUTME: Used to clean up sandboxes the server no longer tracks and to keep idle ones running

use anyhow::{Context, Result};
use deskrun_sandbox::Provider;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(300);
const KEEP_ALIVE_COMMAND: &str = "echo 'keepalive'";
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a keep-alive session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveReport {
    pub pings: u64,
    pub failures: u64,
}

fn require_sandbox_id(sandbox_id: &str) -> Result<&str> {
    let sandbox_id = sandbox_id.trim();
    if sandbox_id.is_empty() {
        anyhow::bail!("Sandbox id must not be empty");
    }
    Ok(sandbox_id)
}

/// Delete a provider sandbox by its provider id
pub async fn stop_sandbox(provider: &dyn Provider, sandbox_id: &str) -> Result<()> {
    let sandbox_id = require_sandbox_id(sandbox_id)?;

    provider
        .ensure_credentials()
        .context("Provider credentials unavailable")?;

    info!(sandbox_id, provider = provider.name(), "Deleting sandbox");
    provider
        .delete_sandbox(sandbox_id)
        .await
        .with_context(|| format!("Failed to delete sandbox {}", sandbox_id))?;

    Ok(())
}

/// Run a trivial command in the sandbox every `interval` so the provider does
/// not stop it for inactivity. Failed pings are logged and the loop carries on
/// until `shutdown` resolves.
pub async fn keep_alive<F>(
    provider: &dyn Provider,
    sandbox_id: &str,
    interval: Duration,
    shutdown: F,
) -> Result<KeepAliveReport>
where
    F: Future<Output = ()>,
{
    let sandbox_id = require_sandbox_id(sandbox_id)?;
    if interval.is_zero() {
        anyhow::bail!("Keep-alive interval must be greater than zero");
    }

    provider
        .ensure_credentials()
        .context("Provider credentials unavailable")?;

    info!(
        sandbox_id,
        interval_secs = interval.as_secs(),
        "Keeping sandbox alive"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut report = KeepAliveReport::default();
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                report.pings += 1;
                match provider.exec(sandbox_id, KEEP_ALIVE_COMMAND, KEEP_ALIVE_TIMEOUT).await {
                    Ok(result) if result.succeeded() => info!(sandbox_id, "Ping successful"),
                    Ok(result) => {
                        report.failures += 1;
                        warn!(sandbox_id, exit_code = result.exit_code, "Ping failed");
                    }
                    Err(e) => {
                        report.failures += 1;
                        warn!(sandbox_id, "Ping failed: {}", e);
                    }
                }
            }
        }
    }

    info!(
        sandbox_id,
        pings = report.pings,
        failures = report.failures,
        "Stopped keep-alive"
    );
    Ok(report)
}
