// ABOUTME: Remote desktop sandbox management for Deskrun
// ABOUTME: Provider backends, the provisioning pipeline and the live instance registry

pub mod providers;
pub mod provisioner;
pub mod registry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use providers::{
    DaytonaConfig, DaytonaProvider, ExecResult, MouseButton, PreviewLink, Provider,
    ProviderError,
};
pub use provisioner::{
    terminal_url, Pacer, PipelineStep, ProvisionConfig, ProvisionError, ProvisionTimings,
    Provisioner, TokioPacer,
};
pub use registry::{Registry, RegistryError};
pub use types::{InstanceId, SandboxRecord, SandboxStatus, StepDiagnostic};
