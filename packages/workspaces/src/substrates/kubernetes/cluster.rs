// ABOUTME: kube-rs implementation of the cluster API for one namespace
// ABOUTME: Reads pod usage from metrics.k8s.io through the dynamic object API

use super::{ClusterApi, ContainerUsage};
use crate::error::SubstrateError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams,
    PropagationPolicy,
};
use kube::{Client, Config};
use serde::Deserialize;

/// Client for one namespace
pub struct KubeCluster {
    pods: Api<Pod>,
    services: Api<Service>,
    pod_metrics: Api<DynamicObject>,
}

#[derive(Debug, Deserialize)]
struct PodMetricsData {
    #[serde(default)]
    containers: Vec<ContainerMetricsData>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetricsData {
    name: String,
    usage: UsageData,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    #[serde(default)]
    cpu: String,
    #[serde(default)]
    memory: String,
}

impl KubeCluster {
    /// Build a client from the service account when `in_cluster`, else from kubeconfig/env
    pub async fn connect(namespace: &str, in_cluster: bool) -> Result<Self, SubstrateError> {
        let config = if in_cluster {
            Config::incluster().map_err(|e| SubstrateError::Unavailable(e.to_string()))?
        } else {
            Config::infer()
                .await
                .map_err(|e| SubstrateError::Unavailable(e.to_string()))?
        };
        let client = Client::try_from(config)?;

        Ok(Self::with_client(client, namespace))
    }

    pub fn with_client(client: Client, namespace: &str) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "pods");

        Self {
            pods: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client.clone(), namespace),
            pod_metrics: Api::namespaced_with(client, namespace, &resource),
        }
    }

    fn immediate_delete() -> DeleteParams {
        DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, SubstrateError> {
        Ok(self.pods.create(&PostParams::default(), pod).await?)
    }

    async fn create_service(&self, service: &Service) -> Result<Service, SubstrateError> {
        Ok(self.services.create(&PostParams::default(), service).await?)
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, SubstrateError> {
        Ok(self.pods.get(name).await?)
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, SubstrateError> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), SubstrateError> {
        self.pods.delete(name, &Self::immediate_delete()).await?;
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), SubstrateError> {
        self.services.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn pod_usage(&self, name: &str) -> Result<Option<Vec<ContainerUsage>>, SubstrateError> {
        let object = match self.pod_metrics.get(name).await {
            Ok(object) => object,
            Err(kube::Error::Api(response))
                if response.code == 404 && names_object(&response.message, name) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let data: PodMetricsData = serde_json::from_value(object.data)
            .map_err(|e| SubstrateError::Invalid(format!("pod metrics for {}: {}", name, e)))?;

        Ok(Some(
            data.containers
                .into_iter()
                .map(|container| ContainerUsage {
                    name: container.name,
                    cpu: container.usage.cpu,
                    memory: container.usage.memory,
                })
                .collect(),
        ))
    }
}

/// A 404 naming the object (`podmetrics.metrics.k8s.io "x" not found`) comes from a
/// served API; an unserved API group answers without naming it
fn names_object(message: &str, name: &str) -> bool {
    message.contains(&format!("\"{}\"", name))
}
