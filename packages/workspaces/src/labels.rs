// ABOUTME: Workspace identification scheme shared by every substrate
// ABOUTME: Encodes session identifiers into labels and object names, and decodes them back

use std::collections::{BTreeMap, HashMap};

/// Labels applied to all DockerIDE workspace objects for tracking
pub const SESSION_LABEL: &str = "dockeride.session";
pub const USER_LABEL: &str = "dockeride.user";
pub const COURSE_LABEL: &str = "dockeride.course";
pub const ASSIGNMENT_LABEL: &str = "dockeride.assignment";
pub const MANAGED_LABEL: &str = "dockeride.managed";

/// Longest DNS label a cluster accepts as an object name
const MAX_OBJECT_NAME_LEN: usize = 63;

/// Room left for the session id in the longest derived name, `workspace-{id}-svc`
pub const MAX_SESSION_ID_LEN: usize = MAX_OBJECT_NAME_LEN - "workspace--svc".len();

/// The logical identifiers carried by every workspace object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLabels {
    pub session_id: String,
    pub user_id: String,
    pub course_id: String,
    pub assignment_id: String,
}

impl WorkspaceLabels {
    /// Labels the caller attaches; the managed marker is added by the adapters
    pub fn encode(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SESSION_LABEL.to_string(), self.session_id.clone()),
            (USER_LABEL.to_string(), self.user_id.clone()),
            (COURSE_LABEL.to_string(), self.course_id.clone()),
            (ASSIGNMENT_LABEL.to_string(), self.assignment_id.clone()),
        ])
    }

    /// Recover identifiers from an object's labels.
    ///
    /// Returns `None` unless all four keys are present; objects with
    /// partial labels were not created by this layer.
    pub fn decode<S: std::hash::BuildHasher>(
        labels: &HashMap<String, String, S>,
    ) -> Option<Self> {
        Some(Self {
            session_id: labels.get(SESSION_LABEL)?.clone(),
            user_id: labels.get(USER_LABEL)?.clone(),
            course_id: labels.get(COURSE_LABEL)?.clone(),
            assignment_id: labels.get(ASSIGNMENT_LABEL)?.clone(),
        })
    }

    /// Same as [`decode`](Self::decode) for ordered label maps
    pub fn decode_ordered(labels: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            session_id: labels.get(SESSION_LABEL)?.clone(),
            user_id: labels.get(USER_LABEL)?.clone(),
            course_id: labels.get(COURSE_LABEL)?.clone(),
            assignment_id: labels.get(ASSIGNMENT_LABEL)?.clone(),
        })
    }
}

/// `dockeride.session=<id>`
pub fn session_selector(session_id: &str) -> String {
    format!("{}={}", SESSION_LABEL, session_id)
}

/// `dockeride.managed=true`
pub fn managed_selector() -> String {
    format!("{}=true", MANAGED_LABEL)
}

/// Container name on the single-host engine
pub fn container_name(session_id: &str) -> String {
    format!("dockeride-{}", session_id)
}

/// Hostname inside the container, and pod name on the cluster
pub fn unit_name(session_id: &str) -> String {
    format!("workspace-{}", session_id)
}

/// Name of the cluster service exposing the workspace
pub fn service_name(session_id: &str) -> String {
    format!("workspace-{}-svc", session_id)
}

/// Whether `session_id` can be used as a label value and inside every derived object name.
///
/// Every name built from an accepted id is a valid DNS label of at most 63
/// characters. Lookups for identifiers that fail this check can never match anything.
pub fn is_valid_session_id(session_id: &str) -> bool {
    let bytes = session_id.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_SESSION_ID_LEN {
        return false;
    }

    let allowed = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-';
    let alphanumeric = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    bytes.iter().all(allowed)
        && bytes.first().is_some_and(alphanumeric)
        && bytes.last().is_some_and(alphanumeric)
}
