// ABOUTME: In-memory registry mapping logical instance ids to sandbox records
// ABOUTME: Single lock serializes id allocation and record mutation across requests

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{InstanceId, SandboxRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Instance not found: {0}")]
    NotFound(InstanceId),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Default)]
struct RegistryInner {
    /// Last id handed out; ids start at 1
    last_id: InstanceId,
    records: HashMap<InstanceId, SandboxRecord>,
    /// Ids in the order their records were first inserted
    order: Vec<InstanceId>,
}

/// Process-local store of live sandboxes. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next logical id. Ids are never reused, even when the
    /// create that reserved one fails.
    pub async fn allocate(&self) -> InstanceId {
        let mut inner = self.inner.write().await;
        inner.last_id += 1;
        debug!("Allocated instance id {}", inner.last_id);
        inner.last_id
    }

    /// Insert or replace the record for `id`
    pub async fn put(&self, id: InstanceId, record: SandboxRecord) {
        let mut inner = self.inner.write().await;
        if inner.records.insert(id, record).is_none() {
            inner.order.push(id);
        }
    }

    pub async fn get(&self, id: InstanceId) -> Result<SandboxRecord> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Mutate a live record in place. Fails when the record has been removed,
    /// so a pipeline never resurrects an instance that was stopped meanwhile.
    pub async fn update<F>(&self, id: InstanceId, f: F) -> Result<SandboxRecord>
    where
        F: FnOnce(&mut SandboxRecord),
    {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        f(record);
        Ok(record.clone())
    }

    /// Remove the record for `id`, returning it
    pub async fn delete(&self, id: InstanceId) -> Result<SandboxRecord> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;
        inner.order.retain(|existing| *existing != id);
        Ok(record)
    }

    /// Snapshot of every live record in insertion order
    pub async fn list(&self) -> Vec<(InstanceId, SandboxRecord)> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).map(|record| (*id, record.clone())))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
