// ABOUTME: Common test utilities for workspace integration tests
// ABOUTME: In-memory container engine and cluster doubles with call counters and failure switches

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use dockeride_workspaces::metrics::{CpuCounters, UsageSnapshot};
use dockeride_workspaces::substrates::{
    ClusterApi, ContainerDetails, ContainerSpec, ContainerSummary, ContainerUsage, EngineApi,
};
use dockeride_workspaces::{
    DockerSettings, DockerSubstrate, KubernetesSettings, KubernetesSubstrate, LaunchRequest,
    OrchestratorConfig, StudentIdentity, SubstrateError, WorkspaceOrchestrator,
};
use k8s_openapi::api::core::v1::{Pod, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);
pub const PULL_TIMEOUT: Duration = Duration::from_secs(30);

/// Long enough to outlast any call timeout
const HANG: Duration = Duration::from_secs(600);

static TRACING: Once = Once::new();

/// Install a test subscriber once; respects RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn launch_request(session_id: &str, language: Option<&str>) -> LaunchRequest {
    LaunchRequest {
        session_id: session_id.to_string(),
        user: StudentIdentity {
            id: format!("student-{}", session_id),
            name: Some("Grace Hopper".to_string()),
        },
        course_id: "cs101".to_string(),
        assignment_id: "hw3".to_string(),
        language: language.map(str::to_string),
        extensions: Some("ms-python.python".to_string()),
        github_repo: None,
        session_token: "signed-launch-token".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Container engine double
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub state: String,
    pub host_port: Option<u16>,
}

#[derive(Default)]
struct EngineState {
    images: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    next_id: usize,
}

/// In-memory engine; clones share state so tests can inspect after handing one to a substrate
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
    pub pulls: Arc<AtomicUsize>,
    pub removals: Arc<AtomicUsize>,
    pub pull_delay: Duration,
    pub fail_start: bool,
    /// Create the container, then never answer
    pub hang_after_create: bool,
    pub skip_port_binding: bool,
    pub remove_error: Option<SubstrateError>,
    pub stats_error: Option<SubstrateError>,
    pub memory_limit: Option<u64>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            pull_delay: Duration::from_millis(50),
            memory_limit: Some(2_147_483_648),
            ..Default::default()
        }
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Change a container's state behind the substrate's back
    pub fn set_state(&self, container_id: &str, engine_state: &str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(container_id) {
            container.state = engine_state.to_string();
        }
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.values().cloned().collect()
    }

    /// Insert a container that was not created through the substrate
    pub fn insert_foreign(&self, labels: HashMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("foreign{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                spec: ContainerSpec {
                    name: id.clone(),
                    hostname: id,
                    image: "busybox".to_string(),
                    env: Vec::new(),
                    labels,
                    memory_bytes: 0,
                    cpu_shares: 0,
                    network_mode: "bridge".to_string(),
                    port: 8080,
                },
                state: "running".to_string(),
                host_port: None,
            },
        );
    }

    pub fn substrate(&self) -> DockerSubstrate<FakeEngine> {
        DockerSubstrate::new(
            self.clone(),
            DockerSettings::default(),
            CALL_TIMEOUT,
            PULL_TIMEOUT,
        )
    }

    pub fn orchestrator(&self) -> WorkspaceOrchestrator {
        WorkspaceOrchestrator::new(Arc::new(self.substrate()), &OrchestratorConfig::default())
    }

    fn not_found(id: &str) -> SubstrateError {
        SubstrateError::NotFound(format!("No such container: {}", id))
    }
}

/// The engine accepts either a container id or its name
fn resolve_id(state: &EngineState, id_or_name: &str) -> Option<String> {
    if state.containers.contains_key(id_or_name) {
        return Some(id_or_name.to_string());
    }
    state
        .containers
        .values()
        .find(|c| c.spec.name == id_or_name)
        .map(|c| c.id.clone())
}

fn matches_filters(labels: &HashMap<String, String>, filters: &[String]) -> bool {
    filters.iter().all(|filter| match filter.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => labels.contains_key(filter),
    })
}

#[async_trait]
impl EngineApi for FakeEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, SubstrateError> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), SubstrateError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.pull_delay).await;
        self.state.lock().unwrap().images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SubstrateError> {
        let id = {
            let mut state = self.state.lock().unwrap();
            if state.containers.values().any(|c| c.spec.name == spec.name) {
                return Err(SubstrateError::Rejected {
                    status: 409,
                    message: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
                });
            }
            state.next_id += 1;
            let id = format!("c{:04}", state.next_id);
            state.containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    spec: spec.clone(),
                    state: "created".to_string(),
                    host_port: None,
                },
            );
            id
        };
        if self.hang_after_create {
            tokio::time::sleep(HANG).await;
        }
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), SubstrateError> {
        if self.fail_start {
            return Err(SubstrateError::Rejected {
                status: 500,
                message: "driver failed programming external connectivity".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        let next_port = 49_152 + state.next_id as u16;
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| Self::not_found(container_id))?;
        container.state = "running".to_string();
        if !self.skip_port_binding {
            container.host_port = Some(next_port);
        }
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerDetails, SubstrateError> {
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| Self::not_found(container_id))?;

        Ok(ContainerDetails {
            id: container.id.clone(),
            name: format!("/{}", container.spec.name),
            state: container.state.clone(),
            exit_code: Some(0),
            created_at: Some(Utc::now()),
            ports: container
                .host_port
                .map(|port| HashMap::from([(container.spec.port, port)]))
                .unwrap_or_default(),
        })
    }

    async fn list_containers(
        &self,
        label_filters: &[String],
    ) -> Result<Vec<ContainerSummary>, SubstrateError> {
        let state = self.state.lock().unwrap();
        let mut containers: Vec<ContainerSummary> = state
            .containers
            .values()
            .filter(|c| matches_filters(&c.spec.labels, label_filters))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.spec.name.clone(),
                state: c.state.clone(),
                created_at: Some(Utc::now()),
                labels: c.spec.labels.clone(),
            })
            .collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), SubstrateError> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| Self::not_found(container_id))?;
        if !matches!(container.state.as_str(), "running" | "paused" | "restarting") {
            return Err(SubstrateError::NotModified(container_id.to_string()));
        }
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<(), SubstrateError> {
        if let Some(error) = &self.remove_error {
            return Err(error.clone());
        }
        let mut state = self.state.lock().unwrap();
        let id = resolve_id(&state, container_id).ok_or_else(|| Self::not_found(container_id))?;
        let container_state = state.containers[&id].state.clone();
        if !force && matches!(container_state.as_str(), "running" | "paused" | "restarting") {
            return Err(SubstrateError::Rejected {
                status: 409,
                message: format!("cannot remove a {} container", container_state),
            });
        }
        state.containers.remove(&id);
        self.removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn container_stats(&self, container_id: &str) -> Result<UsageSnapshot, SubstrateError> {
        if let Some(error) = &self.stats_error {
            return Err(error.clone());
        }
        if !self.state.lock().unwrap().containers.contains_key(container_id) {
            return Err(Self::not_found(container_id));
        }

        Ok(UsageSnapshot {
            cpu: CpuCounters {
                total_usage: 1_200,
                system_usage: 11_000,
            },
            precpu: CpuCounters {
                total_usage: 1_000,
                system_usage: 10_000,
            },
            online_cpus: Some(4),
            percpu_count: None,
            memory_usage: 536_870_912,
            memory_limit: self.memory_limit,
        })
    }
}

// ---------------------------------------------------------------------------
// Cluster double
// ---------------------------------------------------------------------------

/// How the fake metrics API answers
#[derive(Debug, Clone)]
pub enum FakeMetrics {
    /// metrics-server not installed: the API group is not served
    NotInstalled,
    /// The API is served but has no sample for the pod yet
    NotScraped,
    Usage(Vec<ContainerUsage>),
    Error(SubstrateError),
}

impl Default for FakeMetrics {
    fn default() -> Self {
        FakeMetrics::Usage(vec![ContainerUsage {
            name: "vscode-server".to_string(),
            cpu: "250m".to_string(),
            memory: "512Mi".to_string(),
        }])
    }
}

#[derive(Default)]
struct ClusterState {
    pods: BTreeMap<String, Pod>,
    services: BTreeMap<String, Service>,
    next_uid: usize,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
    pub pod_deletes: Arc<AtomicUsize>,
    pub service_error: Option<SubstrateError>,
    /// Store the object, then never answer
    pub hang_after_pod_create: bool,
    pub hang_after_service_create: bool,
    pub pod_delete_error: Option<SubstrateError>,
    pub service_delete_error: Option<SubstrateError>,
    pub metrics: FakeMetrics,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.state.lock().unwrap().pods.keys().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.state.lock().unwrap().services.keys().cloned().collect()
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(name).cloned()
    }

    pub fn set_pod_phase(&self, name: &str, phase: &str) {
        if let Some(pod) = self.state.lock().unwrap().pods.get_mut(name) {
            pod.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
        }
    }

    pub fn substrate(&self) -> KubernetesSubstrate<FakeCluster> {
        KubernetesSubstrate::new(self.clone(), KubernetesSettings::default(), CALL_TIMEOUT)
    }

    pub fn orchestrator(&self) -> WorkspaceOrchestrator {
        WorkspaceOrchestrator::new(Arc::new(self.substrate()), &OrchestratorConfig::default())
    }

    fn not_found(kind: &str, name: &str) -> SubstrateError {
        SubstrateError::NotFound(format!("{} \"{}\" not found", kind, name))
    }
}

fn selector_matches(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.and_then(|l| l.get(key)).map(String::as_str) == Some(value),
            None => false,
        })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, SubstrateError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let created = {
            let mut state = self.state.lock().unwrap();
            if state.pods.contains_key(&name) {
                return Err(SubstrateError::Rejected {
                    status: 409,
                    message: format!("pods \"{}\" already exists", name),
                });
            }

            state.next_uid += 1;
            let mut created = pod.clone();
            created.metadata.uid = Some(format!("uid-{:04}", state.next_uid));
            created.metadata.creation_timestamp = Some(Time(Utc::now()));
            created.status = Some(PodStatus {
                phase: Some("Pending".to_string()),
                ..Default::default()
            });
            state.pods.insert(name, created.clone());
            created
        };
        if self.hang_after_pod_create {
            tokio::time::sleep(HANG).await;
        }
        Ok(created)
    }

    async fn create_service(&self, service: &Service) -> Result<Service, SubstrateError> {
        if let Some(error) = &self.service_error {
            return Err(error.clone());
        }
        let name = service.metadata.name.clone().unwrap_or_default();
        if name.len() > 63 {
            return Err(SubstrateError::Rejected {
                status: 422,
                message: format!("Service \"{}\" is invalid: must be no more than 63 characters", name),
            });
        }
        self.state
            .lock()
            .unwrap()
            .services
            .insert(name, service.clone());
        if self.hang_after_service_create {
            tokio::time::sleep(HANG).await;
        }
        Ok(service.clone())
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, SubstrateError> {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found("pods", name))
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, SubstrateError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .values()
            .filter(|pod| selector_matches(pod.metadata.labels.as_ref(), label_selector))
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<(), SubstrateError> {
        if let Some(error) = &self.pod_delete_error {
            return Err(error.clone());
        }
        self.state
            .lock()
            .unwrap()
            .pods
            .remove(name)
            .ok_or_else(|| Self::not_found("pods", name))?;
        self.pod_deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), SubstrateError> {
        if let Some(error) = &self.service_delete_error {
            return Err(error.clone());
        }
        self.state
            .lock()
            .unwrap()
            .services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("services", name))
    }

    async fn pod_usage(&self, name: &str) -> Result<Option<Vec<ContainerUsage>>, SubstrateError> {
        match &self.metrics {
            FakeMetrics::NotInstalled => Err(SubstrateError::NotFound(
                "the server could not find the requested resource".to_string(),
            )),
            FakeMetrics::NotScraped => Ok(None),
            FakeMetrics::Error(error) => Err(error.clone()),
            FakeMetrics::Usage(usage) => {
                if self.state.lock().unwrap().pods.contains_key(name) {
                    Ok(Some(usage.clone()))
                } else {
                    Ok(None)
                }
            }
        }
    }
}
