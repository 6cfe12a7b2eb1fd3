// ABOUTME: Kubernetes substrate running each workspace as a pod behind a ClusterIP service
// ABOUTME: Pods are bounded by activeDeadlineSeconds; metrics come from metrics-server when installed

mod cluster;
pub mod manifest;

pub use cluster::KubeCluster;

use super::{bounded, call, Substrate, WORKSPACE_PORT};
use crate::config::KubernetesSettings;
use crate::error::{Result, SubstrateError, WorkspaceError};
use crate::labels::{self, WorkspaceLabels};
use crate::metrics::{
    cpu_percent_of_limit, memory_percent, parse_cpu_quantity, parse_memory_quantity,
};
use crate::types::{
    DeleteOutcome, Endpoint, MetricsReading, StatusLookup, WorkspaceCondition, WorkspaceIntent,
    WorkspaceMetrics, WorkspacePhase, WorkspaceRecord, WorkspaceSummary,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Selector matching every workspace pod
pub const WORKSPACE_POD_SELECTOR: &str = "app=dockeride,type=workspace";

/// Usage of one container as reported by the metrics API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerUsage {
    pub name: String,
    /// CPU quantity, e.g. `250m` or `1234567n`
    pub cpu: String,
    /// Memory quantity, e.g. `128Mi`
    pub memory: String,
}

/// The cluster API calls the Kubernetes substrate relies on.
///
/// All calls are scoped to one namespace chosen at construction.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_pod(&self, pod: &Pod) -> std::result::Result<Pod, SubstrateError>;

    async fn create_service(&self, service: &Service)
        -> std::result::Result<Service, SubstrateError>;

    async fn get_pod(&self, name: &str) -> std::result::Result<Pod, SubstrateError>;

    async fn list_pods(&self, label_selector: &str) -> std::result::Result<Vec<Pod>, SubstrateError>;

    /// Delete immediately, removing dependents before the pod itself
    async fn delete_pod(&self, name: &str) -> std::result::Result<(), SubstrateError>;

    async fn delete_service(&self, name: &str) -> std::result::Result<(), SubstrateError>;

    /// Current usage per container from the metrics API.
    ///
    /// `Ok(None)` means the API is served but has not sampled the pod yet; a
    /// `NotFound` error means the metrics API itself is not installed.
    async fn pod_usage(
        &self,
        name: &str,
    ) -> std::result::Result<Option<Vec<ContainerUsage>>, SubstrateError>;
}

pub struct KubernetesSubstrate<C> {
    cluster: C,
    settings: KubernetesSettings,
    call_timeout: Duration,
}

impl KubernetesSubstrate<KubeCluster> {
    /// Build a client from in-cluster or inferred credentials
    pub async fn connect(settings: KubernetesSettings, call_timeout: Duration) -> Result<Self> {
        let cluster = call(
            "connect to cluster",
            call_timeout,
            KubeCluster::connect(&settings.namespace, settings.in_cluster),
        )
        .await?;
        info!(
            "Connected to Kubernetes namespace {} (in-cluster: {})",
            settings.namespace, settings.in_cluster
        );

        Ok(Self::new(cluster, settings, call_timeout))
    }
}

impl<C: ClusterApi> KubernetesSubstrate<C> {
    pub fn new(cluster: C, settings: KubernetesSettings, call_timeout: Duration) -> Self {
        Self {
            cluster,
            settings,
            call_timeout,
        }
    }

    fn endpoint(&self, session_id: &str) -> Endpoint {
        Endpoint {
            host: format!(
                "{}.{}.svc.cluster.local",
                labels::service_name(session_id),
                self.settings.namespace
            ),
            port: WORKSPACE_PORT,
        }
    }

    fn record_from_pod(&self, session_id: &str, pod: Pod) -> WorkspaceRecord {
        let name = pod
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| labels::unit_name(session_id));
        let status = pod.status.unwrap_or_default();

        let conditions = status
            .conditions
            .unwrap_or_default()
            .into_iter()
            .map(|condition| WorkspaceCondition {
                kind: condition.type_,
                status: condition.status,
                reason: condition.reason,
                message: condition.message,
            })
            .collect();

        WorkspaceRecord {
            id: pod.metadata.uid.unwrap_or_else(|| name.clone()),
            name,
            phase: pod_phase(status.phase.as_deref()),
            created_at: pod.metadata.creation_timestamp.map(|time| time.0),
            endpoint: Some(self.endpoint(session_id)),
            conditions,
            metrics: None,
        }
    }

    /// Delete the pod and service a failed creation may have left behind
    async fn reap(&self, session_id: &str, failure: String) -> WorkspaceError {
        let pod_name = labels::unit_name(session_id);
        let service_name = labels::service_name(session_id);
        warn!(
            "Provisioning workspace {} failed, deleting pod {} and service {}: {}",
            session_id, pod_name, service_name, failure
        );

        let mut leftovers = Vec::new();
        if let Some(reason) = self
            .reap_object("pod", &pod_name, self.cluster.delete_pod(&pod_name))
            .await
        {
            leftovers.push(reason);
        }
        if let Some(reason) = self
            .reap_object("service", &service_name, self.cluster.delete_service(&service_name))
            .await
        {
            leftovers.push(reason);
        }

        if leftovers.is_empty() {
            return WorkspaceError::provision(session_id, failure);
        }
        error!(
            "Workspace {} left objects behind: {}",
            session_id,
            leftovers.join("; ")
        );
        WorkspaceError::Cleanup {
            session_id: session_id.to_string(),
            reason: leftovers.join("; "),
            provision_failure: Some(failure),
        }
    }

    /// Delete one object during reaping; `None` when it is gone
    async fn reap_object<F>(&self, kind: &str, name: &str, fut: F) -> Option<String>
    where
        F: std::future::Future<Output = std::result::Result<(), SubstrateError>>,
    {
        let reason = match bounded(&format!("delete {}", kind), self.call_timeout, fut).await {
            Ok(Ok(())) | Ok(Err(SubstrateError::NotFound(_))) => return None,
            Ok(Err(e)) => e.to_string(),
            Err(timeout) => timeout.to_string(),
        };
        Some(format!("delete {} {}: {}", kind, name, reason))
    }

    /// Delete one object, reporting whether it existed
    async fn delete_object<F>(&self, session_id: &str, kind: &str, name: &str, fut: F) -> Result<bool>
    where
        F: std::future::Future<Output = std::result::Result<(), SubstrateError>>,
    {
        match bounded(&format!("delete {}", kind), self.call_timeout, fut).await {
            Ok(Ok(())) => {
                info!("Deleted {} {}", kind, name);
                Ok(true)
            }
            Ok(Err(SubstrateError::NotFound(_))) => {
                debug!("{} {} already absent", kind, name);
                Ok(false)
            }
            Ok(Err(SubstrateError::Unavailable(message))) => {
                Err(WorkspaceError::SubstrateUnavailable(message))
            }
            Ok(Err(e)) => {
                error!("Failed to delete {} {}: {}", kind, name, e);
                Err(WorkspaceError::cleanup(
                    session_id,
                    format!("delete {} {}: {}", kind, name, e),
                ))
            }
            Err(timeout) => Err(WorkspaceError::cleanup(session_id, timeout)),
        }
    }

    async fn read_metrics(&self, pod_name: &str) -> Result<MetricsReading> {
        let outcome = bounded(
            "read pod metrics",
            self.call_timeout,
            self.cluster.pod_usage(pod_name),
        )
        .await;

        match outcome {
            Ok(Ok(Some(usage))) => Ok(MetricsReading::Collected(self.normalize(&usage))),
            Ok(Ok(None)) => {
                debug!("No metrics sample for pod {} yet", pod_name);
                Ok(MetricsReading::Failed {
                    reason: format!("no metrics sample for pod {} yet", pod_name),
                })
            }
            Ok(Err(SubstrateError::NotFound(message)))
            | Ok(Err(SubstrateError::Rejected {
                status: 503,
                message,
            })) => {
                debug!("Pod metrics unavailable for {}: {}", pod_name, message);
                Ok(MetricsReading::Unsupported {
                    reason: format!("metrics API unavailable: {}", message),
                })
            }
            Ok(Err(SubstrateError::Unavailable(message))) => {
                Err(WorkspaceError::SubstrateUnavailable(message))
            }
            Ok(Err(e)) => {
                warn!("Failed to read metrics for pod {}: {}", pod_name, e);
                Ok(MetricsReading::Failed {
                    reason: e.to_string(),
                })
            }
            Err(timeout) => Ok(MetricsReading::Failed {
                reason: timeout.to_string(),
            }),
        }
    }

    /// Sum container usage and relate it to the configured pod limits
    fn normalize(&self, usage: &[ContainerUsage]) -> WorkspaceMetrics {
        let cpu_cores: f64 = usage
            .iter()
            .filter_map(|container| parse_cpu_quantity(&container.cpu))
            .sum();
        let memory_bytes: u64 = usage
            .iter()
            .filter_map(|container| parse_memory_quantity(&container.memory))
            .sum();

        let cpu_limit = parse_cpu_quantity(&self.settings.cpu_limit).unwrap_or(0.0);
        let memory_limit = parse_memory_quantity(&self.settings.memory_limit);

        WorkspaceMetrics {
            cpu_percent: cpu_percent_of_limit(cpu_cores, cpu_limit),
            memory_usage_bytes: memory_bytes,
            memory_limit_bytes: memory_limit,
            memory_percent: memory_percent(memory_bytes, memory_limit),
        }
    }
}

#[async_trait]
impl<C: ClusterApi> Substrate for KubernetesSubstrate<C> {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn create_workspace(&self, intent: &WorkspaceIntent) -> Result<WorkspaceRecord> {
        let session_id = intent.session_id.as_str();
        let pod = manifest::build_pod(intent, &self.settings);

        let created = match call("create pod", self.call_timeout, self.cluster.create_pod(&pod)).await {
            Ok(created) => created,
            // The API server may have accepted the pod before the call was abandoned
            Err(e @ WorkspaceError::Timeout { .. }) => {
                return Err(self.reap(session_id, e.to_string()).await);
            }
            Err(e) => {
                error!("Failed to create pod for session {}: {}", session_id, e);
                return Err(WorkspaceError::provision(
                    session_id,
                    format!("create pod: {}", e),
                ));
            }
        };
        debug!("Created pod {}", labels::unit_name(session_id));

        let service = manifest::build_service(intent, &self.settings);
        if let Err(e) = call(
            "create service",
            self.call_timeout,
            self.cluster.create_service(&service),
        )
        .await
        {
            return Err(self.reap(session_id, format!("create service: {}", e)).await);
        }

        let record = self.record_from_pod(session_id, created);
        info!(
            "Workspace pod {} created for session {} in namespace {}",
            record.name, session_id, self.settings.namespace
        );
        Ok(record)
    }

    async fn delete_workspace(&self, session_id: &str) -> Result<DeleteOutcome> {
        if !labels::is_valid_session_id(session_id) {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        let pod_name = labels::unit_name(session_id);
        let service_name = labels::service_name(session_id);

        let pod_removed = self
            .delete_object(session_id, "pod", &pod_name, self.cluster.delete_pod(&pod_name))
            .await?;
        let service_removed = self
            .delete_object(
                session_id,
                "service",
                &service_name,
                self.cluster.delete_service(&service_name),
            )
            .await?;

        let removed = usize::from(pod_removed) + usize::from(service_removed);
        if removed == 0 {
            info!("No workspace objects for session {}, nothing to delete", session_id);
            Ok(DeleteOutcome::AlreadyAbsent)
        } else {
            Ok(DeleteOutcome::Deleted { removed })
        }
    }

    async fn workspace_status(&self, session_id: &str) -> Result<StatusLookup> {
        if !labels::is_valid_session_id(session_id) {
            return Ok(StatusLookup::not_found());
        }

        let pod_name = labels::unit_name(session_id);
        let pod = match bounded("get pod", self.call_timeout, self.cluster.get_pod(&pod_name)).await? {
            Ok(pod) => pod,
            Err(SubstrateError::NotFound(_)) => return Ok(StatusLookup::not_found()),
            Err(e) => return Err(e.into()),
        };

        let metrics = self.read_metrics(&pod_name).await?;
        let mut record = self.record_from_pod(session_id, pod);
        record.metrics = Some(metrics);

        Ok(StatusLookup::Found(record))
    }

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceSummary>> {
        let pods = call(
            "list pods",
            self.call_timeout,
            self.cluster.list_pods(WORKSPACE_POD_SELECTOR),
        )
        .await?;

        Ok(pods
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name.clone().unwrap_or_default();
                let Some(ids) = pod
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(WorkspaceLabels::decode_ordered)
                else {
                    warn!("Skipping pod {} with incomplete workspace labels", name);
                    return None;
                };

                Some(WorkspaceSummary {
                    id: pod.metadata.uid.clone().unwrap_or(name),
                    phase: pod_phase(pod.status.as_ref().and_then(|s| s.phase.as_deref())),
                    created_at: pod.metadata.creation_timestamp.map(|time| time.0),
                    session_id: ids.session_id,
                    user_id: ids.user_id,
                    course_id: ids.course_id,
                    assignment_id: ids.assignment_id,
                })
            })
            .collect())
    }
}

/// Map a pod phase onto the workspace lifecycle
fn pod_phase(phase: Option<&str>) -> WorkspacePhase {
    match phase {
        Some("Pending") => WorkspacePhase::Provisioning,
        Some("Running") => WorkspacePhase::Running,
        Some("Succeeded") => WorkspacePhase::Stopped,
        Some("Failed") => WorkspacePhase::Failed,
        _ => WorkspacePhase::Unknown,
    }
}
