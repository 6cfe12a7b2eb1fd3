// ABOUTME: Orchestrator configuration constructed once at startup
// ABOUTME: Defaults match the production deployment; from_env reads the documented variables

use dockeride_config::constants;
use dockeride_config::env::{parse_flag, parse_value};
use dockeride_config::EnvError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("{name} must be greater than zero")]
    ZeroValue { name: &'static str },
}

/// Which execution substrate runs workspaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstrateKind {
    Docker,
    Kubernetes,
}

/// Single-host engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerSettings {
    /// Engine socket; `None` uses the client defaults
    pub socket_path: Option<String>,
    pub network_mode: String,
    pub memory_bytes: i64,
    pub cpu_shares: i64,
    /// Host name advertised in workspace endpoints
    pub advertise_host: String,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            network_mode: "bridge".to_string(),
            memory_bytes: 2_147_483_648,
            cpu_shares: 1024,
            advertise_host: "localhost".to_string(),
        }
    }
}

/// Cluster orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesSettings {
    pub namespace: String,
    /// Use the in-cluster service account instead of kubeconfig inference
    pub in_cluster: bool,
    pub memory_request: String,
    pub cpu_request: String,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub volume_size: String,
    /// Hard wall-clock deadline after which the cluster kills the pod
    pub active_deadline_seconds: i64,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            namespace: "dockeride".to_string(),
            in_cluster: false,
            memory_request: "1Gi".to_string(),
            cpu_request: "500m".to_string(),
            memory_limit: "2Gi".to_string(),
            cpu_limit: "1000m".to_string(),
            volume_size: "5Gi".to_string(),
            active_deadline_seconds: 14_400,
        }
    }
}

/// Workspace image naming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    pub prefix: String,
    pub tag: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            prefix: "dockeride".to_string(),
            tag: "latest".to_string(),
        }
    }
}

/// Values the orchestrator folds into every launch
#[derive(Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub base_url: String,
    /// Forwarded to workspaces that clone a repository
    pub github_token: Option<String>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            github_token: None,
        }
    }
}

impl std::fmt::Debug for LaunchSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchSettings")
            .field("base_url", &self.base_url)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub substrate: SubstrateKind,
    pub docker: DockerSettings,
    pub kubernetes: KubernetesSettings,
    pub images: ImageSettings,
    pub launch: LaunchSettings,
    /// Deadline for each individual substrate call
    pub call_timeout: Duration,
    /// Deadline for a complete image pull
    pub pull_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            substrate: SubstrateKind::Docker,
            docker: DockerSettings::default(),
            kubernetes: KubernetesSettings::default(),
            images: ImageSettings::default(),
            launch: LaunchSettings::default(),
            call_timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(600),
        }
    }
}

impl OrchestratorConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for unset values
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: String| -> String {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let defaults = Self::default();

        let substrate = match parse_flag(
            constants::USE_KUBERNETES,
            lookup(constants::USE_KUBERNETES),
        )? {
            Some(true) => SubstrateKind::Kubernetes,
            _ => SubstrateKind::Docker,
        };

        let docker = DockerSettings {
            socket_path: lookup(constants::DOCKER_SOCKET)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            network_mode: text(constants::DOCKER_NETWORK, defaults.docker.network_mode),
            memory_bytes: positive(
                constants::CONTAINER_MEMORY,
                parse_value(constants::CONTAINER_MEMORY, lookup(constants::CONTAINER_MEMORY))?,
                defaults.docker.memory_bytes,
            )?,
            cpu_shares: positive(
                constants::CONTAINER_CPU_SHARES,
                parse_value(
                    constants::CONTAINER_CPU_SHARES,
                    lookup(constants::CONTAINER_CPU_SHARES),
                )?,
                defaults.docker.cpu_shares,
            )?,
            advertise_host: text(
                constants::WORKSPACE_ADVERTISE_HOST,
                defaults.docker.advertise_host,
            ),
        };

        // NODE_ENV=production implies in-cluster credentials unless overridden
        let production = lookup(constants::NODE_ENV)
            .map(|v| v.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let in_cluster = parse_flag(constants::K8S_IN_CLUSTER, lookup(constants::K8S_IN_CLUSTER))?
            .unwrap_or(production);

        let kubernetes = KubernetesSettings {
            namespace: text(constants::K8S_NAMESPACE, defaults.kubernetes.namespace),
            in_cluster,
            memory_request: text(
                constants::K8S_MEMORY_REQUEST,
                defaults.kubernetes.memory_request,
            ),
            cpu_request: text(constants::K8S_CPU_REQUEST, defaults.kubernetes.cpu_request),
            memory_limit: text(constants::K8S_MEMORY_LIMIT, defaults.kubernetes.memory_limit),
            cpu_limit: text(constants::K8S_CPU_LIMIT, defaults.kubernetes.cpu_limit),
            volume_size: text(constants::K8S_VOLUME_SIZE, defaults.kubernetes.volume_size),
            active_deadline_seconds: positive(
                constants::K8S_POD_TIMEOUT,
                parse_value(constants::K8S_POD_TIMEOUT, lookup(constants::K8S_POD_TIMEOUT))?,
                defaults.kubernetes.active_deadline_seconds,
            )?,
        };

        let images = ImageSettings {
            prefix: text(constants::WORKSPACE_IMAGE_PREFIX, defaults.images.prefix),
            tag: text(constants::WORKSPACE_IMAGE_TAG, defaults.images.tag),
        };

        let launch = LaunchSettings {
            base_url: text(constants::BASE_URL, defaults.launch.base_url)
                .trim_end_matches('/')
                .to_string(),
            github_token: lookup(constants::GITHUB_TOKEN)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        };

        let call_timeout_secs: u64 = positive(
            constants::SUBSTRATE_CALL_TIMEOUT_SECS,
            parse_value(
                constants::SUBSTRATE_CALL_TIMEOUT_SECS,
                lookup(constants::SUBSTRATE_CALL_TIMEOUT_SECS),
            )?,
            defaults.call_timeout.as_secs(),
        )?;
        let pull_timeout_secs: u64 = positive(
            constants::IMAGE_PULL_TIMEOUT_SECS,
            parse_value(
                constants::IMAGE_PULL_TIMEOUT_SECS,
                lookup(constants::IMAGE_PULL_TIMEOUT_SECS),
            )?,
            defaults.pull_timeout.as_secs(),
        )?;

        Ok(Self {
            substrate,
            docker,
            kubernetes,
            images,
            launch,
            call_timeout: Duration::from_secs(call_timeout_secs),
            pull_timeout: Duration::from_secs(pull_timeout_secs),
        })
    }
}

fn positive<T>(name: &'static str, value: Option<T>, default: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default,
{
    match value {
        Some(v) if v <= T::default() => Err(ConfigError::ZeroValue { name }),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}
