// ABOUTME: Pod and service manifests for cluster workspaces
// ABOUTME: Pure builders so the manifests can be checked without a cluster

use crate::config::KubernetesSettings;
use crate::labels::{self, MANAGED_LABEL, SESSION_LABEL};
use crate::substrates::WORKSPACE_PORT;
use crate::types::WorkspaceIntent;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction, Pod, PodSpec, Probe,
    ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const CONTAINER_NAME: &str = "vscode-server";
pub const CREATED_ANNOTATION: &str = "dockeride/created";
const VOLUME_NAME: &str = "workspace";
const WORKSPACE_MOUNT: &str = "/workspace";
const HEALTH_PATH: &str = "/healthz";
const PORT_NAME: &str = "http";

/// Labels carried by both the pod and its service
fn object_labels(intent: &WorkspaceIntent) -> BTreeMap<String, String> {
    let mut object_labels = intent.labels.clone();
    object_labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    object_labels.insert("app".to_string(), "dockeride".to_string());
    object_labels.insert("type".to_string(), "workspace".to_string());
    object_labels
}

fn http_probe(initial_delay_seconds: i32, period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::Int(i32::from(WORKSPACE_PORT)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        ..Default::default()
    }
}

pub fn build_pod(intent: &WorkspaceIntent, settings: &KubernetesSettings) -> Pod {
    let env = intent
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let resources = ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("memory".to_string(), Quantity(settings.memory_request.clone())),
            ("cpu".to_string(), Quantity(settings.cpu_request.clone())),
        ])),
        limits: Some(BTreeMap::from([
            ("memory".to_string(), Quantity(settings.memory_limit.clone())),
            ("cpu".to_string(), Quantity(settings.cpu_limit.clone())),
        ])),
        ..Default::default()
    };

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(intent.image.clone()),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(WORKSPACE_PORT),
            name: Some(PORT_NAME.to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        resources: Some(resources),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: WORKSPACE_MOUNT.to_string(),
            ..Default::default()
        }]),
        liveness_probe: Some(http_probe(30, 10)),
        readiness_probe: Some(http_probe(10, 5)),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(labels::unit_name(&intent.session_id)),
            namespace: Some(settings.namespace.clone()),
            labels: Some(object_labels(intent)),
            annotations: Some(BTreeMap::from([(
                CREATED_ANNOTATION.to_string(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(vec![Volume {
                name: VOLUME_NAME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource {
                    size_limit: Some(Quantity(settings.volume_size.clone())),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            restart_policy: Some("Never".to_string()),
            active_deadline_seconds: Some(settings.active_deadline_seconds),
            automount_service_account_token: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ClusterIP service selecting exactly the session's pod
pub fn build_service(intent: &WorkspaceIntent, settings: &KubernetesSettings) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(labels::service_name(&intent.session_id)),
            namespace: Some(settings.namespace.clone()),
            labels: Some(object_labels(intent)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(BTreeMap::from([(
                SESSION_LABEL.to_string(),
                intent.session_id.clone(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: i32::from(WORKSPACE_PORT),
                target_port: Some(IntOrString::Int(i32::from(WORKSPACE_PORT))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
