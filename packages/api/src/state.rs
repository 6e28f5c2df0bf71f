// ABOUTME: Shared router state holding the registry and provisioner
// ABOUTME: Cloned into every handler; clones share the same registry

use deskrun_sandbox::{Provider, Provisioner, Registry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub provisioner: Arc<Provisioner>,
}

impl AppState {
    pub fn new(provisioner: Provisioner) -> Self {
        Self {
            registry: Registry::new(),
            provisioner: Arc::new(provisioner),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        self.provisioner.provider()
    }
}
