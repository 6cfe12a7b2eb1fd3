// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names read by the workspace manager

// Substrate Selection
pub const USE_KUBERNETES: &str = "USE_KUBERNETES";

// Docker Engine
pub const DOCKER_SOCKET: &str = "DOCKER_SOCKET";
pub const DOCKER_NETWORK: &str = "DOCKER_NETWORK";
pub const CONTAINER_MEMORY: &str = "CONTAINER_MEMORY";
pub const CONTAINER_CPU_SHARES: &str = "CONTAINER_CPU_SHARES";
pub const WORKSPACE_ADVERTISE_HOST: &str = "WORKSPACE_ADVERTISE_HOST";

// Kubernetes
pub const K8S_NAMESPACE: &str = "K8S_NAMESPACE";
pub const K8S_IN_CLUSTER: &str = "K8S_IN_CLUSTER";
pub const K8S_MEMORY_REQUEST: &str = "K8S_MEMORY_REQUEST";
pub const K8S_CPU_REQUEST: &str = "K8S_CPU_REQUEST";
pub const K8S_MEMORY_LIMIT: &str = "K8S_MEMORY_LIMIT";
pub const K8S_CPU_LIMIT: &str = "K8S_CPU_LIMIT";
pub const K8S_VOLUME_SIZE: &str = "K8S_VOLUME_SIZE";
pub const K8S_POD_TIMEOUT: &str = "K8S_POD_TIMEOUT";

// Workspace Images
pub const WORKSPACE_IMAGE_PREFIX: &str = "WORKSPACE_IMAGE_PREFIX";
pub const WORKSPACE_IMAGE_TAG: &str = "WORKSPACE_IMAGE_TAG";

// Launch
pub const BASE_URL: &str = "BASE_URL";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";

// Timeouts
pub const SUBSTRATE_CALL_TIMEOUT_SECS: &str = "SUBSTRATE_CALL_TIMEOUT_SECS";
pub const IMAGE_PULL_TIMEOUT_SECS: &str = "IMAGE_PULL_TIMEOUT_SECS";

// Legacy
pub const NODE_ENV: &str = "NODE_ENV";
