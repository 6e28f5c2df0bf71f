// ABOUTME: Scripted in-memory provider for exercising the pipeline without a backend
// ABOUTME: Records every call and fails chosen operations on demand

use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::providers::{ExecResult, MouseButton, PreviewLink, Provider, ProviderError, Result};

/// Provider operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Delete,
    StartDesktop,
    Exec,
    Hotkey,
    Click,
    Type,
    KeyCombo,
    Preview,
}

/// A call the provider received, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Create { public: bool },
    Delete { sandbox_id: String },
    StartDesktop { sandbox_id: String },
    Exec { sandbox_id: String, command: String, timeout: Duration },
    Hotkey { sandbox_id: String, combo: String },
    Click { sandbox_id: String, x: i32, y: i32, button: MouseButton },
    Type { sandbox_id: String, text: String },
    KeyCombo { sandbox_id: String, key: String, modifiers: BTreeSet<String> },
    Preview { sandbox_id: String, port: u16 },
}

impl ProviderCall {
    pub fn operation(&self) -> Operation {
        match self {
            ProviderCall::Create { .. } => Operation::Create,
            ProviderCall::Delete { .. } => Operation::Delete,
            ProviderCall::StartDesktop { .. } => Operation::StartDesktop,
            ProviderCall::Exec { .. } => Operation::Exec,
            ProviderCall::Hotkey { .. } => Operation::Hotkey,
            ProviderCall::Click { .. } => Operation::Click,
            ProviderCall::Type { .. } => Operation::Type,
            ProviderCall::KeyCombo { .. } => Operation::KeyCombo,
            ProviderCall::Preview { .. } => Operation::Preview,
        }
    }
}

/// Records every call and answers from a script. Sandbox ids are `sb-1`,
/// `sb-2`, ... and the preview link defaults to `https://h/p` with token `T`.
pub struct ScriptedProvider {
    has_credentials: bool,
    failing: Mutex<HashSet<Operation>>,
    exit_code: Mutex<i64>,
    preview: Mutex<PreviewLink>,
    next_id: AtomicU64,
    calls: Mutex<Vec<ProviderCall>>,
    gone: Mutex<HashSet<String>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            has_credentials: true,
            failing: Mutex::new(HashSet::new()),
            exit_code: Mutex::new(0),
            preview: Mutex::new(PreviewLink {
                url: "https://h/p".to_string(),
                token: Some("T".to_string()),
            }),
            next_id: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            gone: Mutex::new(HashSet::new()),
        }
    }

    pub fn without_credentials(mut self) -> Self {
        self.has_credentials = false;
        self
    }

    pub fn failing(self, operation: Operation) -> Self {
        self.fail(operation);
        self
    }

    pub fn with_exit_code(self, exit_code: i64) -> Self {
        *lock(&self.exit_code) = exit_code;
        self
    }

    pub fn with_preview(self, url: &str, token: Option<&str>) -> Self {
        *lock(&self.preview) = PreviewLink {
            url: url.to_string(),
            token: token.map(str::to_string),
        };
        self
    }

    /// Make `operation` fail from now on
    pub fn fail(&self, operation: Operation) {
        lock(&self.failing).insert(operation);
    }

    /// Make `operation` succeed from now on
    pub fn recover(&self, operation: Operation) {
        lock(&self.failing).remove(&operation);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.calls).clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.calls().iter().map(ProviderCall::operation).collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Delete { sandbox_id } => Some(sandbox_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ProviderCall) -> Result<()> {
        let operation = call.operation();
        lock(&self.calls).push(call);
        if lock(&self.failing).contains(&operation) {
            return Err(ProviderError::Api {
                status: 500,
                message: format!("scripted {:?} failure", operation),
            });
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn ensure_credentials(&self) -> Result<()> {
        if self.has_credentials {
            Ok(())
        } else {
            Err(ProviderError::ConfigError(
                "scripted provider has no credentials".to_string(),
            ))
        }
    }

    async fn create_sandbox(&self, public: bool) -> Result<String> {
        self.record(ProviderCall::Create { public })?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("sb-{}", id))
    }

    /// Deleting a sandbox that was already deleted answers `NotFound`
    async fn delete_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.record(ProviderCall::Delete {
            sandbox_id: sandbox_id.to_string(),
        })?;
        if !lock(&self.gone).insert(sandbox_id.to_string()) {
            return Err(ProviderError::NotFound(sandbox_id.to_string()));
        }
        Ok(())
    }

    async fn start_desktop(&self, sandbox_id: &str) -> Result<()> {
        self.record(ProviderCall::StartDesktop {
            sandbox_id: sandbox_id.to_string(),
        })
    }

    async fn exec(
        &self,
        sandbox_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecResult> {
        self.record(ProviderCall::Exec {
            sandbox_id: sandbox_id.to_string(),
            command: command.to_string(),
            timeout,
        })?;
        Ok(ExecResult {
            exit_code: *lock(&self.exit_code),
            output: String::new(),
        })
    }

    async fn send_hotkey(&self, sandbox_id: &str, combo: &str) -> Result<()> {
        self.record(ProviderCall::Hotkey {
            sandbox_id: sandbox_id.to_string(),
            combo: combo.to_string(),
        })
    }

    async fn mouse_click(
        &self,
        sandbox_id: &str,
        x: i32,
        y: i32,
        button: MouseButton,
    ) -> Result<()> {
        self.record(ProviderCall::Click {
            sandbox_id: sandbox_id.to_string(),
            x,
            y,
            button,
        })
    }

    async fn type_text(&self, sandbox_id: &str, text: &str) -> Result<()> {
        self.record(ProviderCall::Type {
            sandbox_id: sandbox_id.to_string(),
            text: text.to_string(),
        })
    }

    async fn send_key_combo(
        &self,
        sandbox_id: &str,
        key: &str,
        modifiers: &BTreeSet<String>,
    ) -> Result<()> {
        self.record(ProviderCall::KeyCombo {
            sandbox_id: sandbox_id.to_string(),
            key: key.to_string(),
            modifiers: modifiers.clone(),
        })
    }

    async fn preview_link(&self, sandbox_id: &str, port: u16) -> Result<PreviewLink> {
        self.record(ProviderCall::Preview {
            sandbox_id: sandbox_id.to_string(),
            port,
        })?;
        Ok(lock(&self.preview).clone())
    }
}
