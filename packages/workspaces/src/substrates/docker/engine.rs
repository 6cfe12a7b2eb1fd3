// ABOUTME: Bollard-backed implementation of the container engine API
// ABOUTME: Translates engine requests and responses to and from the substrate vocabulary

use super::{ContainerDetails, ContainerSpec, ContainerSummary, EngineApi};
use crate::error::SubstrateError;
use crate::metrics::{CpuCounters, UsageSnapshot};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
        StartContainerOptions, StatsOptions, StopContainerOptions,
    },
    image::CreateImageOptions,
    models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum},
    Docker, API_DEFAULT_VERSION,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use tracing::debug;

/// Seconds the engine waits for a workspace to exit before killing it
const STOP_GRACE_SECS: i64 = 10;

/// Client-side HTTP timeout; per-call deadlines are enforced by the substrate
const CLIENT_TIMEOUT_SECS: u64 = 900;

pub struct BollardEngine {
    client: Docker,
}

impl BollardEngine {
    /// Connect over `socket_path`, or the client defaults (`DOCKER_HOST`, local socket)
    pub fn connect(socket_path: Option<&str>) -> Result<Self, SubstrateError> {
        let client = match socket_path {
            Some(path) => {
                Docker::connect_with_socket(path, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_defaults(),
        }
        .map_err(|e| SubstrateError::Unavailable(e.to_string()))?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    pub async fn ping(&self) -> Result<(), SubstrateError> {
        self.client.ping().await?;
        Ok(())
    }

    fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let container_port = format!("{}/tcp", spec.port);

        // HostPort "0" lets the engine pick a free host port
        let port_bindings = HashMap::from([(
            container_port.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some("0".to_string()),
            }]),
        )]);

        let host_config = HostConfig {
            memory: Some(spec.memory_bytes),
            cpu_shares: Some(spec.cpu_shares),
            network_mode: Some(spec.network_mode.clone()),
            port_bindings: Some(port_bindings),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            auto_remove: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(HashMap::from([(container_port, HashMap::new())])),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EngineApi for BollardEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, SubstrateError> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match SubstrateError::from(e) {
                SubstrateError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), SubstrateError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        let mut last_status = String::new();

        while let Some(progress) = stream.next().await {
            let info = progress?;
            if let Some(error) = info.error {
                return Err(SubstrateError::Rejected {
                    status: 500,
                    message: format!("pull {}: {}", image, error),
                });
            }
            if let Some(status) = info.status {
                if status != last_status {
                    debug!("Pull status for {}: {}", image, status);
                    last_status = status;
                }
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SubstrateError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), Self::to_bollard_config(spec))
            .await?;

        debug!("Created container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), SubstrateError> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerDetails, SubstrateError> {
        let inspect = self.client.inspect_container(container_id, None).await?;

        let (state, exit_code) = inspect
            .state
            .as_ref()
            .map(|state| {
                (
                    state
                        .status
                        .as_ref()
                        .map(|s| AsRef::<str>::as_ref(s).to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    state.exit_code,
                )
            })
            .unwrap_or_else(|| ("unknown".to_string(), None));

        let mut ports = HashMap::new();
        let port_map = inspect
            .network_settings
            .as_ref()
            .and_then(|settings| settings.ports.as_ref());
        for (container_port, bindings) in port_map.into_iter().flatten() {
            let host_port = bindings
                .as_ref()
                .and_then(|bindings| bindings.iter().find_map(|b| b.host_port.as_deref()))
                .and_then(|port| port.parse::<u16>().ok());
            let container_port = container_port
                .split('/')
                .next()
                .and_then(|port| port.parse::<u16>().ok());

            if let (Some(container_port), Some(host_port)) = (container_port, host_port) {
                ports.insert(container_port, host_port);
            }
        }

        let created_at = inspect
            .created
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_else(|| container_id.to_string()),
            name: inspect.name.unwrap_or_default(),
            state,
            exit_code,
            created_at,
            ports,
        })
    }

    async fn list_containers(
        &self,
        label_filters: &[String],
    ) -> Result<Vec<ContainerSummary>, SubstrateError> {
        // Multiple values under one "label" key must all match
        let filters = HashMap::from([("label".to_string(), label_filters.to_vec())]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|container| {
                let id = container.id?;
                Some(ContainerSummary {
                    name: container
                        .names
                        .and_then(|names| names.into_iter().next())
                        .map(|name| name.trim_start_matches('/').to_string())
                        .unwrap_or_default(),
                    state: container.state.unwrap_or_default(),
                    created_at: container
                        .created
                        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
                    labels: container.labels.unwrap_or_default(),
                    id,
                })
            })
            .collect())
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), SubstrateError> {
        let options = StopContainerOptions {
            t: STOP_GRACE_SECS,
        };
        self.client.stop_container(container_id, Some(options)).await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<(), SubstrateError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        self.client.remove_container(container_id, Some(options)).await?;
        Ok(())
    }

    async fn container_stats(&self, container_id: &str) -> Result<UsageSnapshot, SubstrateError> {
        // one_shot would leave precpu_stats empty
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let stats = self
            .client
            .stats(container_id, Some(options))
            .next()
            .await
            .ok_or_else(|| {
                SubstrateError::Invalid(format!("no stats returned for {}", container_id))
            })??;

        Ok(UsageSnapshot {
            cpu: CpuCounters {
                total_usage: stats.cpu_stats.cpu_usage.total_usage,
                system_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            },
            precpu: CpuCounters {
                total_usage: stats.precpu_stats.cpu_usage.total_usage,
                system_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            },
            online_cpus: stats.cpu_stats.online_cpus,
            percpu_count: stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|usage| usage.len() as u64),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "dockeride-abc".to_string(),
            hostname: "workspace-abc".to_string(),
            image: "dockeride/python:latest".to_string(),
            env: vec!["STUDENT_ID=u1".to_string()],
            labels: HashMap::from([("dockeride.session".to_string(), "abc".to_string())]),
            memory_bytes: 2_147_483_648,
            cpu_shares: 1024,
            network_mode: "bridge".to_string(),
            port: 8080,
        }
    }

    #[test]
    fn test_bollard_config_binds_auto_assigned_port() {
        let config = BollardEngine::to_bollard_config(&spec());

        assert_eq!(config.hostname.as_deref(), Some("workspace-abc"));
        assert!(config
            .exposed_ports
            .as_ref()
            .unwrap()
            .contains_key("8080/tcp"));

        let host_config = config.host_config.unwrap();
        assert_eq!(host_config.memory, Some(2_147_483_648));
        assert_eq!(host_config.cpu_shares, Some(1024));
        assert_eq!(host_config.network_mode.as_deref(), Some("bridge"));
        assert_eq!(host_config.auto_remove, Some(false));

        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings["8080/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("0"));
    }
}
