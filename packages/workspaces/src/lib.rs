// ABOUTME: Ephemeral IDE workspace orchestration for DockerIDE
// ABOUTME: Provisions, inspects and tears down per-session workspaces on Docker or Kubernetes

pub mod config;
pub mod credentials;
pub mod error;
pub mod images;
pub mod labels;
pub mod metrics;
pub mod orchestrator;
pub mod substrates;
pub mod types;

// Re-export commonly used types
pub use config::{
    ConfigError, DockerSettings, ImageSettings, KubernetesSettings, LaunchSettings,
    OrchestratorConfig, SubstrateKind,
};
pub use error::{Result, SubstrateError, WorkspaceError};
pub use images::ImageCatalog;
pub use orchestrator::WorkspaceOrchestrator;
pub use substrates::{DockerSubstrate, KubernetesSubstrate, Substrate};
pub use types::{
    AccessCredential, DeleteOutcome, Endpoint, LaunchRequest, LaunchedWorkspace, MetricsReading,
    StatusLookup, StudentIdentity, WorkspaceCondition, WorkspaceIntent, WorkspaceMetrics,
    WorkspacePhase, WorkspaceRecord, WorkspaceSummary,
};
