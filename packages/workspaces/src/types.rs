// ABOUTME: Core type definitions for workspace orchestration
// ABOUTME: Defines launch requests, substrate intents, records, metrics and lookup outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Student identity as delivered by the launch flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub id: String,
    pub name: Option<String>,
}

/// Request from the caller to launch a workspace for one session
#[derive(Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub session_id: String,
    pub user: StudentIdentity,
    pub course_id: String,
    pub assignment_id: String,
    /// Assignment language, used to pick the workspace image
    pub language: Option<String>,
    /// Comma-separated IDE extension identifiers
    pub extensions: Option<String>,
    pub github_repo: Option<String>,
    /// Signed launch token, passed through to the workspace untouched
    pub session_token: String,
}

impl fmt::Debug for LaunchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchRequest")
            .field("session_id", &self.session_id)
            .field("user", &self.user)
            .field("course_id", &self.course_id)
            .field("assignment_id", &self.assignment_id)
            .field("language", &self.language)
            .field("extensions", &self.extensions)
            .field("github_repo", &self.github_repo)
            .field("session_token", &"<redacted>")
            .finish()
    }
}

/// What an adapter needs to provision one workspace
#[derive(Clone, PartialEq, Eq)]
pub struct WorkspaceIntent {
    pub session_id: String,
    pub user_id: String,
    pub image: String,
    /// Environment for the execution unit; values may be secrets
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl WorkspaceIntent {
    /// Environment in `KEY=value` form
    pub fn env_pairs(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }
}

impl fmt::Debug for WorkspaceIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceIntent")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("image", &self.image)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("labels", &self.labels)
            .finish()
    }
}

/// Lifecycle phase of a workspace as observed on the substrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspacePhase {
    /// Unit exists but has not started yet
    Provisioning,
    Running,
    /// Unit ended cleanly or is being removed
    Stopped,
    /// Unit ended with an error or was killed
    Failed,
    Unknown,
}

/// Network address at which the workspace IDE is reachable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Readiness condition reported by the cluster for a workspace unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceCondition {
    pub kind: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// Point-in-time resource usage snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMetrics {
    /// CPU utilization; may exceed 100 on multi-core engines
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    /// `None` when the substrate reports no effective cap
    pub memory_limit_bytes: Option<u64>,
    /// `None` when the limit is unbounded or unknown
    pub memory_percent: Option<f64>,
}

/// Outcome of a best-effort metrics read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MetricsReading {
    Collected(WorkspaceMetrics),
    /// The metrics subsystem is not installed or not serving
    Unsupported { reason: String },
    /// The subsystem exists but this read failed
    Failed { reason: String },
}

impl MetricsReading {
    pub fn metrics(&self) -> Option<&WorkspaceMetrics> {
        match self {
            MetricsReading::Collected(metrics) => Some(metrics),
            _ => None,
        }
    }
}

/// A workspace as materialized from substrate objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: String,
    pub name: String,
    pub phase: WorkspacePhase,
    pub created_at: Option<DateTime<Utc>>,
    pub endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<WorkspaceCondition>,
    /// Only populated by status queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsReading>,
}

/// One entry of a workspace listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub course_id: String,
    pub assignment_id: String,
    pub phase: WorkspacePhase,
    pub created_at: Option<DateTime<Utc>>,
}

/// Result of a status lookup; absence is a value, not an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusLookup {
    Found(WorkspaceRecord),
    NotFound(NotFoundMarker),
}

impl StatusLookup {
    pub fn not_found() -> Self {
        StatusLookup::NotFound(NotFoundMarker::default())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StatusLookup::NotFound(_))
    }

    pub fn record(&self) -> Option<&WorkspaceRecord> {
        match self {
            StatusLookup::Found(record) => Some(record),
            StatusLookup::NotFound(_) => None,
        }
    }
}

/// Serializes as `{"status": "not_found"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFoundMarker {
    status: String,
}

impl Default for NotFoundMarker {
    fn default() -> Self {
        Self {
            status: "not_found".to_string(),
        }
    }
}

/// Result of a delete; both variants are success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Number of substrate objects removed
    Deleted { removed: usize },
    AlreadyAbsent,
}

/// Randomly generated workspace entry password
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AccessCredential(String);

impl AccessCredential {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessCredential(<redacted>)")
    }
}

/// Returned to the caller after a successful launch
#[derive(Debug, Clone, Serialize)]
pub struct LaunchedWorkspace {
    pub session_id: String,
    pub record: WorkspaceRecord,
    pub workspace_url: String,
    pub password: AccessCredential,
}
