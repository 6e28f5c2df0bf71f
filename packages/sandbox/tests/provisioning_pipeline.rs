// ABOUTME: Integration tests for the provisioning pipeline against a scripted provider
// ABOUTME: Covers step ordering, fatal versus degraded failures and concurrent stops

use async_trait::async_trait;
use futures::future::join_all;
use deskrun_sandbox::test_utils::{Operation, ProviderCall, ScriptedProvider};
use deskrun_sandbox::{
    Pacer, ProvisionConfig, ProvisionError, ProvisionTimings, Provisioner, Registry,
    SandboxStatus,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

fn immediate_config() -> ProvisionConfig {
    ProvisionConfig {
        timings: ProvisionTimings::immediate(),
        ..Default::default()
    }
}

fn provisioner(provider: &Arc<ScriptedProvider>) -> Provisioner {
    Provisioner::new(provider.clone(), immediate_config())
}

#[tokio::test]
async fn test_full_pipeline_runs_steps_in_order() {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = Registry::new();
    let id = registry.allocate().await;

    let record = provisioner(&provider)
        .provision(&registry, id, None)
        .await
        .expect("pipeline should succeed");

    assert_eq!(
        provider.operations(),
        vec![
            Operation::Create,
            Operation::StartDesktop,
            Operation::Exec,
            Operation::Hotkey,
            Operation::Click,
            Operation::Type,
            Operation::KeyCombo,
            Operation::Preview,
        ]
    );

    assert_eq!(record.provider_sandbox_id, "sb-1");
    assert_eq!(record.status, SandboxStatus::Ready);
    assert_eq!(record.vnc_base_url.as_deref(), Some("https://h/p"));
    assert_eq!(record.vnc_token.as_deref(), Some("T"));
    assert_eq!(
        record.terminal_url.as_deref(),
        Some("https://h/p/vnc.html?token=T")
    );
    assert!(record.diagnostics.is_empty());

    let stored = registry.get(id).await.expect("record should be registered");
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_pipeline_sends_configured_inputs() {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = Registry::new();
    let id = registry.allocate().await;

    provisioner(&provider)
        .provision(&registry, id, None)
        .await
        .unwrap();

    let calls = provider.calls();
    assert_eq!(calls[0], ProviderCall::Create { public: true });
    assert_eq!(
        calls[2],
        ProviderCall::Exec {
            sandbox_id: "sb-1".to_string(),
            command: "npm install -g opencode-ai@latest".to_string(),
            timeout: Duration::from_secs(180),
        }
    );
    assert_eq!(
        calls[3],
        ProviderCall::Hotkey {
            sandbox_id: "sb-1".to_string(),
            combo: "ctrl+alt+t".to_string(),
        }
    );
    assert!(matches!(
        &calls[4],
        ProviderCall::Click { x: 500, y: 350, .. }
    ));
    assert_eq!(
        calls[5],
        ProviderCall::Type {
            sandbox_id: "sb-1".to_string(),
            text: "opencode".to_string(),
        }
    );
    match &calls[6] {
        ProviderCall::KeyCombo { key, modifiers, .. } => {
            assert_eq!(key, "m");
            assert!(modifiers.contains("ctrl"));
        }
        other => panic!("expected key combo, got {:?}", other),
    }
    assert_eq!(
        calls[7],
        ProviderCall::Preview {
            sandbox_id: "sb-1".to_string(),
            port: 6080,
        }
    );
}

#[tokio::test]
async fn test_repository_is_cloned_after_install() {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = Registry::new();
    let id = registry.allocate().await;

    let record = provisioner(&provider)
        .provision(&registry, id, Some("https://github.com/a/b.git".to_string()))
        .await
        .unwrap();

    let commands: Vec<String> = provider
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ProviderCall::Exec { command, .. } => Some(command),
            _ => None,
        })
        .collect();

    assert_eq!(commands.len(), 2);
    assert!(commands[0].starts_with("npm install"));
    assert_eq!(
        commands[1],
        "cd '/home/daytona' && git clone 'https://github.com/a/b.git' project"
    );
    assert_eq!(record.repo_url.as_deref(), Some("https://github.com/a/b.git"));
}

#[tokio::test]
async fn test_blank_repository_is_ignored() {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = Registry::new();
    let id = registry.allocate().await;

    let record = provisioner(&provider)
        .provision(&registry, id, Some("   ".to_string()))
        .await
        .unwrap();

    let exec_count = provider
        .operations()
        .into_iter()
        .filter(|op| *op == Operation::Exec)
        .count();
    assert_eq!(exec_count, 1);
    assert!(record.repo_url.is_none());
}

#[tokio::test]
async fn test_missing_credentials_aborts_before_any_call() {
    let provider = Arc::new(ScriptedProvider::new().without_credentials());
    let registry = Registry::new();
    let id = registry.allocate().await;

    let result = provisioner(&provider).provision(&registry, id, None).await;

    assert!(matches!(result, Err(ProvisionError::Precondition(_))));
    assert!(provider.calls().is_empty());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_create_failure_registers_nothing() {
    let provider = Arc::new(ScriptedProvider::new().failing(Operation::Create));
    let registry = Registry::new();
    let id = registry.allocate().await;

    let result = provisioner(&provider).provision(&registry, id, None).await;

    assert!(matches!(result, Err(ProvisionError::Create(_))));
    assert_eq!(provider.operations(), vec![Operation::Create]);
    assert!(registry.is_empty().await);
}

#[rstest]
#[case(Operation::StartDesktop, "start_desktop")]
#[case(Operation::Exec, "install_tool")]
#[case(Operation::Hotkey, "open_terminal")]
#[case(Operation::Click, "focus_terminal")]
#[case(Operation::Type, "type_launch_command")]
#[case(Operation::KeyCombo, "press_enter")]
#[case(Operation::Preview, "fetch_preview")]
#[tokio::test]
async fn test_optional_step_failure_degrades_without_aborting(
    #[case] operation: Operation,
    #[case] step: &str,
) {
    let provider = Arc::new(ScriptedProvider::new().failing(operation));
    let registry = Registry::new();
    let id = registry.allocate().await;

    let record = provisioner(&provider)
        .provision(&registry, id, None)
        .await
        .expect("optional failures are not fatal");

    // Every later step still ran
    assert_eq!(provider.operations().len(), 8);
    assert_eq!(provider.operations().last(), Some(&Operation::Preview));

    assert_eq!(record.status, SandboxStatus::Degraded);
    assert_eq!(record.diagnostics.len(), 1);
    assert_eq!(record.diagnostics[0].step, step);

    let stored = registry.get(id).await.expect("degraded record is kept");
    assert_eq!(stored.status, SandboxStatus::Degraded);
}

#[tokio::test]
async fn test_preview_failure_leaves_vnc_fields_absent() {
    let provider = Arc::new(ScriptedProvider::new().failing(Operation::Preview));
    let registry = Registry::new();
    let id = registry.allocate().await;

    provisioner(&provider)
        .provision(&registry, id, None)
        .await
        .unwrap();

    let stored = registry.get(id).await.unwrap();
    assert_eq!(stored.provider_sandbox_id, "sb-1");
    assert!(stored.vnc_base_url.is_none());
    assert!(stored.vnc_token.is_none());
    assert!(stored.terminal_url.is_none());
}

#[tokio::test]
async fn test_nonzero_exit_code_degrades_command_steps() {
    let provider = Arc::new(ScriptedProvider::new().with_exit_code(1));
    let registry = Registry::new();
    let id = registry.allocate().await;

    let record = provisioner(&provider)
        .provision(&registry, id, Some("https://github.com/a/b.git".to_string()))
        .await
        .unwrap();

    let steps: Vec<&str> = record.diagnostics.iter().map(|d| d.step.as_str()).collect();
    assert_eq!(steps, vec!["install_tool", "clone_repository"]);
    assert!(record.diagnostics[0].reason.contains("code 1"));
    // The desktop is still reachable
    assert_eq!(record.vnc_base_url.as_deref(), Some("https://h/p"));
}

#[tokio::test]
async fn test_preview_without_token() {
    let provider = Arc::new(ScriptedProvider::new().with_preview("https://h/p/", None));
    let registry = Registry::new();
    let id = registry.allocate().await;

    let record = provisioner(&provider)
        .provision(&registry, id, None)
        .await
        .unwrap();

    assert_eq!(record.vnc_token, None);
    assert_eq!(
        record.terminal_url.as_deref(),
        Some("https://h/p/vnc.html")
    );
}

/// Removes the instance from the registry when a given wait is reached,
/// standing in for a stop request that lands mid-pipeline
struct StopDuring {
    registry: Registry,
    id: u64,
    label: &'static str,
}

#[async_trait]
impl Pacer for StopDuring {
    async fn settle(&self, label: &str, _duration: Duration) {
        if label == self.label {
            let _ = self.registry.delete(self.id).await;
        }
    }
}

#[tokio::test]
async fn test_stopped_instance_is_not_resurrected() {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = Registry::new();
    let id = registry.allocate().await;

    let record = provisioner(&provider)
        .with_pacer(Arc::new(StopDuring {
            registry: registry.clone(),
            id,
            label: "wait_terminal",
        }))
        .provision(&registry, id, None)
        .await
        .unwrap();

    assert_eq!(record.status, SandboxStatus::Stopped);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_record_visible_while_provisioning() {
    struct Inspect {
        registry: Registry,
        id: u64,
        seen: std::sync::Mutex<Option<SandboxStatus>>,
    }

    #[async_trait]
    impl Pacer for Inspect {
        async fn settle(&self, label: &str, _duration: Duration) {
            if label == "wait_desktop" {
                let status = self.registry.get(self.id).await.ok().map(|r| r.status);
                *self.seen.lock().unwrap() = status;
            }
        }
    }

    let provider = Arc::new(ScriptedProvider::new());
    let registry = Registry::new();
    let id = registry.allocate().await;
    let inspect = Arc::new(Inspect {
        registry: registry.clone(),
        id,
        seen: std::sync::Mutex::new(None),
    });

    provisioner(&provider)
        .with_pacer(inspect.clone())
        .provision(&registry, id, None)
        .await
        .unwrap();

    assert_eq!(
        *inspect.seen.lock().unwrap(),
        Some(SandboxStatus::Provisioning)
    );
}

#[tokio::test(start_paused = true)]
async fn test_default_timings_are_waited() {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = Registry::new();
    let id = registry.allocate().await;
    let config = ProvisionConfig::default();
    let expected = config.timings.total();

    let started = tokio::time::Instant::now();
    Provisioner::new(provider.clone(), config)
        .provision(&registry, id, None)
        .await
        .unwrap();

    assert!(started.elapsed() >= expected);
}

#[tokio::test]
async fn test_concurrent_pipelines_get_distinct_records() {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = Registry::new();
    let provisioner = Arc::new(provisioner(&provider));

    let results = join_all((0..8).map(|_| {
        let registry = registry.clone();
        let provisioner = provisioner.clone();
        async move {
            let id = registry.allocate().await;
            provisioner.provision(&registry, id, None).await
        }
    }))
    .await;

    let mut sandbox_ids: Vec<String> = results
        .into_iter()
        .map(|result| result.unwrap().provider_sandbox_id)
        .collect();
    sandbox_ids.sort();
    sandbox_ids.dedup();

    assert_eq!(sandbox_ids.len(), 8);
    assert_eq!(registry.len().await, 8);
}
