// ABOUTME: Single-host Docker substrate for workspaces
// ABOUTME: Ensures images, creates labeled containers with an auto-assigned host port, reaps partial failures

mod engine;

pub use engine::BollardEngine;

use super::{bounded, call, Substrate, WORKSPACE_PORT};
use crate::config::DockerSettings;
use crate::error::{Result, SubstrateError, WorkspaceError};
use crate::labels::{self, WorkspaceLabels, MANAGED_LABEL};
use crate::metrics::UsageSnapshot;
use crate::types::{
    DeleteOutcome, Endpoint, MetricsReading, StatusLookup, WorkspaceIntent, WorkspacePhase,
    WorkspaceRecord, WorkspaceSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Container configuration handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub memory_bytes: i64,
    pub cpu_shares: i64,
    pub network_mode: String,
    /// Container port bound to an engine-assigned host port
    pub port: u16,
}

/// Result of inspecting one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    /// Engine state string: created, running, exited, ...
    pub state: String,
    pub exit_code: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    /// container_port -> host_port
    pub ports: HashMap<u16, u16>,
}

/// One row of a container listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
}

/// The container engine calls the Docker substrate relies on
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> std::result::Result<bool, SubstrateError>;

    /// Pull an image, returning once the pull has finished
    async fn pull_image(&self, image: &str) -> std::result::Result<(), SubstrateError>;

    /// Create a container, returning its id
    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> std::result::Result<String, SubstrateError>;

    async fn start_container(&self, container_id: &str) -> std::result::Result<(), SubstrateError>;

    async fn inspect_container(
        &self,
        container_id: &str,
    ) -> std::result::Result<ContainerDetails, SubstrateError>;

    /// List containers, stopped ones included, carrying every `key=value` label
    async fn list_containers(
        &self,
        label_filters: &[String],
    ) -> std::result::Result<Vec<ContainerSummary>, SubstrateError>;

    async fn stop_container(&self, container_id: &str) -> std::result::Result<(), SubstrateError>;

    async fn remove_container(
        &self,
        container_id: &str,
        force: bool,
    ) -> std::result::Result<(), SubstrateError>;

    /// One stats sample including the previous CPU counters
    async fn container_stats(
        &self,
        container_id: &str,
    ) -> std::result::Result<UsageSnapshot, SubstrateError>;
}

pub struct DockerSubstrate<E> {
    engine: E,
    settings: DockerSettings,
    call_timeout: Duration,
    pull_timeout: Duration,
    /// Pulls in flight, one gate per image reference
    pulls: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DockerSubstrate<BollardEngine> {
    /// Connect to the Docker daemon and verify it responds
    pub async fn connect(
        settings: DockerSettings,
        call_timeout: Duration,
        pull_timeout: Duration,
    ) -> Result<Self> {
        let engine = BollardEngine::connect(settings.socket_path.as_deref())?;
        call("ping docker daemon", call_timeout, engine.ping()).await?;
        info!("Successfully connected to Docker daemon");

        Ok(Self::new(engine, settings, call_timeout, pull_timeout))
    }
}

impl<E: EngineApi> DockerSubstrate<E> {
    pub fn new(
        engine: E,
        settings: DockerSettings,
        call_timeout: Duration,
        pull_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            settings,
            call_timeout,
            pull_timeout,
            pulls: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure `image` is available locally, pulling it if needed.
    ///
    /// Concurrent callers for the same missing image share one pull: the
    /// first pulls, the rest wait for it and re-check.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if call("inspect image", self.call_timeout, self.engine.image_exists(image)).await? {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        let gate = {
            let mut pulls = self.pulls.lock().await;
            pulls
                .entry(image.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _pulling = gate.lock().await;

        if call("inspect image", self.call_timeout, self.engine.image_exists(image)).await? {
            debug!("Image {} was pulled by a concurrent request", image);
            return Ok(());
        }

        info!("Pulling image {} (timeout: {:?})", image, self.pull_timeout);
        let result = call("pull image", self.pull_timeout, self.engine.pull_image(image)).await;
        self.pulls.lock().await.remove(image);

        match result {
            Ok(()) => {
                info!("Image {} pulled successfully", image);
                Ok(())
            }
            Err(e) => {
                error!("Failed to pull image {}: {}", image, e);
                Err(e)
            }
        }
    }

    fn container_spec(&self, intent: &WorkspaceIntent) -> ContainerSpec {
        let mut labels: HashMap<String, String> = intent
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        ContainerSpec {
            name: labels::container_name(&intent.session_id),
            hostname: labels::unit_name(&intent.session_id),
            image: intent.image.clone(),
            env: intent.env_pairs(),
            labels,
            memory_bytes: self.settings.memory_bytes,
            cpu_shares: self.settings.cpu_shares,
            network_mode: self.settings.network_mode.clone(),
            port: WORKSPACE_PORT,
        }
    }

    /// Start a created container and read back its assigned host port
    async fn start_and_inspect(&self, container_id: &str) -> Result<WorkspaceRecord> {
        call(
            "start container",
            self.call_timeout,
            self.engine.start_container(container_id),
        )
        .await?;

        let details = call(
            "inspect container",
            self.call_timeout,
            self.engine.inspect_container(container_id),
        )
        .await?;

        let host_port = details.ports.get(&WORKSPACE_PORT).copied().ok_or_else(|| {
            WorkspaceError::Substrate(format!(
                "container {} has no host port bound for {}/tcp",
                container_id, WORKSPACE_PORT
            ))
        })?;

        let mut record = self.record_from_details(details);
        record.endpoint = Some(Endpoint {
            host: self.settings.advertise_host.clone(),
            port: host_port,
        });
        Ok(record)
    }

    /// Force-remove a container left behind by a failed creation.
    ///
    /// `container_id` may be the container name when the create call never returned an id.
    async fn reap(&self, session_id: &str, container_id: &str, failure: String) -> WorkspaceError {
        warn!(
            "Provisioning workspace {} failed, removing container {}: {}",
            session_id, container_id, failure
        );

        let outcome = bounded(
            "remove container",
            self.call_timeout,
            self.engine.remove_container(container_id, true),
        )
        .await;

        let cleanup_failure = match outcome {
            Ok(Ok(())) | Ok(Err(SubstrateError::NotFound(_))) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(timeout) => Some(timeout.to_string()),
        };

        match cleanup_failure {
            None => {
                info!("Removed container {} after failed provisioning", container_id);
                WorkspaceError::provision(session_id, failure)
            }
            Some(reason) => {
                error!(
                    "Container {} for workspace {} could not be removed: {}",
                    container_id, session_id, reason
                );
                WorkspaceError::Cleanup {
                    session_id: session_id.to_string(),
                    reason: format!("remove container {}: {}", container_id, reason),
                    provision_failure: Some(failure),
                }
            }
        }
    }

    fn record_from_details(&self, details: ContainerDetails) -> WorkspaceRecord {
        let endpoint = details.ports.get(&WORKSPACE_PORT).map(|port| Endpoint {
            host: self.settings.advertise_host.clone(),
            port: *port,
        });

        WorkspaceRecord {
            phase: container_phase(&details.state, details.exit_code),
            id: details.id,
            name: details.name.trim_start_matches('/').to_string(),
            created_at: details.created_at,
            endpoint,
            conditions: Vec::new(),
            metrics: None,
        }
    }

    async fn read_metrics(&self, container_id: &str) -> Result<MetricsReading> {
        let outcome = bounded(
            "read container stats",
            self.call_timeout,
            self.engine.container_stats(container_id),
        )
        .await;

        match outcome {
            Ok(Ok(snapshot)) => Ok(MetricsReading::Collected(snapshot.normalize())),
            Ok(Err(SubstrateError::Unavailable(message))) => {
                Err(WorkspaceError::SubstrateUnavailable(message))
            }
            Ok(Err(e)) => {
                warn!("Failed to read stats for container {}: {}", container_id, e);
                Ok(MetricsReading::Failed {
                    reason: e.to_string(),
                })
            }
            Err(timeout) => {
                warn!("Stats for container {} timed out", container_id);
                Ok(MetricsReading::Failed {
                    reason: timeout.to_string(),
                })
            }
        }
    }

    async fn containers_for_session(&self, session_id: &str) -> Result<Vec<ContainerSummary>> {
        call(
            "list containers",
            self.call_timeout,
            self.engine
                .list_containers(&[labels::session_selector(session_id)]),
        )
        .await
    }
}

#[async_trait]
impl<E: EngineApi> Substrate for DockerSubstrate<E> {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create_workspace(&self, intent: &WorkspaceIntent) -> Result<WorkspaceRecord> {
        let session_id = intent.session_id.as_str();
        debug!(
            "Creating container for session {} with image {}",
            session_id, intent.image
        );

        self.ensure_image(&intent.image)
            .await
            .map_err(|e| WorkspaceError::provision(session_id, format!("ensure image: {}", e)))?;

        let spec = self.container_spec(intent);
        let container_id = match call(
            "create container",
            self.call_timeout,
            self.engine.create_container(&spec),
        )
        .await
        {
            Ok(container_id) => container_id,
            // The engine may have created the container before the call was abandoned
            Err(e @ WorkspaceError::Timeout { .. }) => {
                return Err(self.reap(session_id, &spec.name, e.to_string()).await);
            }
            Err(e) => {
                error!("Failed to create container {}: {}", spec.name, e);
                return Err(WorkspaceError::provision(
                    session_id,
                    format!("create container: {}", e),
                ));
            }
        };

        match self.start_and_inspect(&container_id).await {
            Ok(record) => {
                info!(
                    "Container created: {} for session {} on {}",
                    container_id,
                    session_id,
                    record
                        .endpoint
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                );
                Ok(record)
            }
            Err(e) => Err(self.reap(session_id, &container_id, e.to_string()).await),
        }
    }

    async fn delete_workspace(&self, session_id: &str) -> Result<DeleteOutcome> {
        if !labels::is_valid_session_id(session_id) {
            debug!("Session id {:?} cannot match any container", session_id);
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        let containers = self.containers_for_session(session_id).await?;
        if containers.is_empty() {
            info!("No containers for session {}, nothing to delete", session_id);
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        let mut removed = 0;
        for container in &containers {
            if needs_stop(&container.state) {
                let outcome = bounded(
                    "stop container",
                    self.call_timeout,
                    self.engine.stop_container(&container.id),
                )
                .await;
                match outcome {
                    Ok(Ok(()))
                    | Ok(Err(SubstrateError::NotModified(_)))
                    | Ok(Err(SubstrateError::NotFound(_))) => {}
                    Ok(Err(e)) => return Err(teardown_error(session_id, "stop", &container.id, e)),
                    Err(timeout) => return Err(WorkspaceError::cleanup(session_id, timeout)),
                }
            }

            // Forced: the container may have restarted or been paused since the stop
            let outcome = bounded(
                "remove container",
                self.call_timeout,
                self.engine.remove_container(&container.id, true),
            )
            .await;
            match outcome {
                Ok(Ok(())) => {
                    removed += 1;
                    info!("Container {} deleted", container.id);
                }
                Ok(Err(SubstrateError::NotFound(_))) => {
                    debug!("Container {} already removed", container.id);
                }
                Ok(Err(e)) => return Err(teardown_error(session_id, "remove", &container.id, e)),
                Err(timeout) => return Err(WorkspaceError::cleanup(session_id, timeout)),
            }
        }

        if removed == 0 {
            Ok(DeleteOutcome::AlreadyAbsent)
        } else {
            Ok(DeleteOutcome::Deleted { removed })
        }
    }

    async fn workspace_status(&self, session_id: &str) -> Result<StatusLookup> {
        if !labels::is_valid_session_id(session_id) {
            return Ok(StatusLookup::not_found());
        }

        let containers = self.containers_for_session(session_id).await?;
        let Some(container) = containers.first() else {
            return Ok(StatusLookup::not_found());
        };

        let details = match bounded(
            "inspect container",
            self.call_timeout,
            self.engine.inspect_container(&container.id),
        )
        .await?
        {
            Ok(details) => details,
            Err(SubstrateError::NotFound(_)) => {
                debug!("Container {} vanished during status lookup", container.id);
                return Ok(StatusLookup::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let metrics = self.read_metrics(&details.id).await?;
        let mut record = self.record_from_details(details);
        record.metrics = Some(metrics);

        Ok(StatusLookup::Found(record))
    }

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceSummary>> {
        let containers = call(
            "list containers",
            self.call_timeout,
            self.engine.list_containers(&[labels::managed_selector()]),
        )
        .await?;

        Ok(containers
            .into_iter()
            .filter_map(|container| match WorkspaceLabels::decode(&container.labels) {
                Some(ids) => Some(WorkspaceSummary {
                    phase: container_phase(&container.state, None),
                    id: container.id,
                    session_id: ids.session_id,
                    user_id: ids.user_id,
                    course_id: ids.course_id,
                    assignment_id: ids.assignment_id,
                    created_at: container.created_at,
                }),
                None => {
                    warn!(
                        "Skipping container {} with incomplete workspace labels",
                        container.id
                    );
                    None
                }
            })
            .collect())
    }
}

/// Classify a failed teardown step; transport failures keep their own kind
fn teardown_error(
    session_id: &str,
    step: &str,
    container_id: &str,
    error: SubstrateError,
) -> WorkspaceError {
    match error {
        SubstrateError::Unavailable(message) => WorkspaceError::SubstrateUnavailable(message),
        other => {
            error!("Failed to {} container {}: {}", step, container_id, other);
            WorkspaceError::cleanup(
                session_id,
                format!("{} container {}: {}", step, container_id, other),
            )
        }
    }
}

/// States the engine refuses to remove without stopping first
fn needs_stop(state: &str) -> bool {
    matches!(
        state.to_lowercase().as_str(),
        "running" | "paused" | "restarting"
    )
}

/// Map an engine state onto the workspace lifecycle
fn container_phase(state: &str, exit_code: Option<i64>) -> WorkspacePhase {
    match state.to_lowercase().as_str() {
        "created" => WorkspacePhase::Provisioning,
        "running" | "restarting" | "paused" => WorkspacePhase::Running,
        "removing" => WorkspacePhase::Stopped,
        "exited" => match exit_code {
            Some(code) if code != 0 => WorkspacePhase::Failed,
            _ => WorkspacePhase::Stopped,
        },
        "dead" => WorkspacePhase::Failed,
        _ => WorkspacePhase::Unknown,
    }
}
