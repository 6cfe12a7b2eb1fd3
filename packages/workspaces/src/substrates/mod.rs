// ABOUTME: Substrate trait and implementations for workspace execution backends
// ABOUTME: Defines the create/delete/status/list contract every backend fulfils

use crate::error::{Result, SubstrateError, WorkspaceError};
use crate::types::{DeleteOutcome, StatusLookup, WorkspaceIntent, WorkspaceRecord, WorkspaceSummary};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub mod docker;
pub mod kubernetes;

pub use docker::{
    BollardEngine, ContainerDetails, ContainerSpec, ContainerSummary, DockerSubstrate, EngineApi,
};
pub use kubernetes::{ClusterApi, ContainerUsage, KubeCluster, KubernetesSubstrate};

/// Port the workspace IDE listens on inside every execution unit
pub const WORKSPACE_PORT: u16 = 8080;

/// Execution backend for workspaces.
///
/// Implementations derive everything from substrate labels and keep no
/// state about workspaces between calls.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Create and start the workspace's execution unit and network exposure.
    ///
    /// Returns only after the substrate accepted the started unit. On failure,
    /// objects created so far are removed before the error is returned.
    async fn create_workspace(&self, intent: &WorkspaceIntent) -> Result<WorkspaceRecord>;

    /// Remove every object belonging to the session; absent sessions succeed
    async fn delete_workspace(&self, session_id: &str) -> Result<DeleteOutcome>;

    /// Current record with a best-effort metrics snapshot
    async fn workspace_status(&self, session_id: &str) -> Result<StatusLookup>;

    /// All workspaces managed by this layer
    async fn list_workspaces(&self) -> Result<Vec<WorkspaceSummary>>;
}

/// Run one substrate call under `limit`.
///
/// The outer error reports a timeout; the inner one is the call's own result.
pub(crate) async fn bounded<T, F>(
    operation: &str,
    limit: Duration,
    call: F,
) -> std::result::Result<std::result::Result<T, SubstrateError>, WorkspaceError>
where
    F: Future<Output = std::result::Result<T, SubstrateError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| WorkspaceError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        })
}

/// Like [`bounded`], flattening substrate failures into `WorkspaceError`
pub(crate) async fn call<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, SubstrateError>>,
{
    Ok(bounded(operation, limit, fut).await??)
}
