// ABOUTME: Workspace orchestrator facade over the configured substrate
// ABOUTME: Turns launch requests into substrate intents and returns connection details

use crate::config::{LaunchSettings, OrchestratorConfig, SubstrateKind};
use crate::credentials::generate_password;
use crate::error::{Result, WorkspaceError};
use crate::images::ImageCatalog;
use crate::labels::{self, WorkspaceLabels};
use crate::substrates::{DockerSubstrate, KubernetesSubstrate, Substrate};
use crate::types::{
    AccessCredential, DeleteOutcome, LaunchRequest, LaunchedWorkspace, StatusLookup,
    WorkspaceIntent, WorkspaceSummary,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point for workspace lifecycle operations.
///
/// Holds no workspace state: every query is answered from substrate labels.
pub struct WorkspaceOrchestrator {
    substrate: Arc<dyn Substrate>,
    images: ImageCatalog,
    launch: LaunchSettings,
}

impl WorkspaceOrchestrator {
    /// Use an already constructed substrate
    pub fn new(substrate: Arc<dyn Substrate>, config: &OrchestratorConfig) -> Self {
        Self {
            substrate,
            images: ImageCatalog::new(&config.images.prefix, &config.images.tag),
            launch: config.launch.clone(),
        }
    }

    /// Read configuration from the environment and connect
    pub async fn from_env() -> Result<Self> {
        Self::from_config(OrchestratorConfig::from_env()?).await
    }

    /// Connect to the substrate selected by `config`
    pub async fn from_config(config: OrchestratorConfig) -> Result<Self> {
        let substrate: Arc<dyn Substrate> = match config.substrate {
            SubstrateKind::Docker => Arc::new(
                DockerSubstrate::connect(
                    config.docker.clone(),
                    config.call_timeout,
                    config.pull_timeout,
                )
                .await?,
            ),
            SubstrateKind::Kubernetes => Arc::new(
                KubernetesSubstrate::connect(config.kubernetes.clone(), config.call_timeout)
                    .await?,
            ),
        };
        info!("Workspace orchestrator using {} substrate", substrate.name());

        Ok(Self::new(substrate, &config))
    }

    pub fn substrate_name(&self) -> &'static str {
        self.substrate.name()
    }

    /// Provision a workspace and return where and how to reach it
    pub async fn create_workspace(&self, request: LaunchRequest) -> Result<LaunchedWorkspace> {
        if !labels::is_valid_session_id(&request.session_id) {
            warn!("Rejecting launch with invalid session id {:?}", request.session_id);
            return Err(WorkspaceError::provision(
                &request.session_id,
                format!(
                    "session id must be 1-{} lowercase alphanumerics or '-', starting and ending alphanumeric",
                    labels::MAX_SESSION_ID_LEN
                ),
            ));
        }

        let password = generate_password();
        let intent = self.build_intent(&request, &password);
        info!(
            "Creating workspace for session {} (user {}, image {})",
            intent.session_id, intent.user_id, intent.image
        );

        let record = self.substrate.create_workspace(&intent).await?;
        debug!("Workspace {} is {:?}", record.id, record.phase);

        Ok(LaunchedWorkspace {
            workspace_url: format!("{}/workspace/{}", self.launch.base_url, request.session_id),
            session_id: request.session_id,
            record,
            password,
        })
    }

    pub async fn delete_workspace(&self, session_id: &str) -> Result<DeleteOutcome> {
        let outcome = self.substrate.delete_workspace(session_id).await?;
        info!("Delete for session {}: {:?}", session_id, outcome);
        Ok(outcome)
    }

    pub async fn workspace_status(&self, session_id: &str) -> Result<StatusLookup> {
        self.substrate.workspace_status(session_id).await
    }

    pub async fn list_workspaces(&self) -> Result<Vec<WorkspaceSummary>> {
        self.substrate.list_workspaces().await
    }

    fn build_intent(&self, request: &LaunchRequest, password: &AccessCredential) -> WorkspaceIntent {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let mut env = BTreeMap::from([
            ("STUDENT_ID".to_string(), request.user.id.clone()),
            ("COURSE_ID".to_string(), request.course_id.clone()),
            ("ASSIGNMENT_ID".to_string(), request.assignment_id.clone()),
            ("VSCODE_PASSWORD".to_string(), password.expose().to_string()),
            ("SESSION_TOKEN".to_string(), request.session_token.clone()),
        ]);
        if let Some(name) = present(&request.user.name) {
            env.insert("STUDENT_NAME".to_string(), name);
        }
        if let Some(extensions) = present(&request.extensions) {
            env.insert("VSCODE_EXTENSIONS".to_string(), extensions);
        }
        if let Some(repo) = present(&request.github_repo) {
            env.insert("GITHUB_REPO".to_string(), repo);
            if let Some(token) = &self.launch.github_token {
                env.insert("GITHUB_TOKEN".to_string(), token.clone());
            }
        }

        let workspace_labels = WorkspaceLabels {
            session_id: request.session_id.clone(),
            user_id: request.user.id.clone(),
            course_id: request.course_id.clone(),
            assignment_id: request.assignment_id.clone(),
        };

        WorkspaceIntent {
            session_id: request.session_id.clone(),
            user_id: request.user.id.clone(),
            image: self.images.resolve(request.language.as_deref()).to_string(),
            env,
            labels: workspace_labels.encode(),
        }
    }
}
