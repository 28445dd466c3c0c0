use uuid::Uuid;

use crate::error::{Result, WorkspaceError};

const WORKSPACE_ID_PREFIX: &str = "workspace";

/// Cross-cutting facts about one workspace, derived once per reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceProperties {
    pub namespace: String,
    pub workspace_id: String,
    pub workspace_name: String,
    pub started: bool,
    pub routing_class: String,
    pub external_api_url: Option<String>,
}

impl WorkspaceProperties {
    pub fn new(
        namespace: &str,
        name: &str,
        uid: &str,
        started: bool,
        routing_class: &str,
    ) -> Result<Self> {
        Ok(Self {
            namespace: namespace.to_string(),
            workspace_id: workspace_id(uid)?,
            workspace_name: name.to_string(),
            started,
            routing_class: routing_class.to_string(),
            external_api_url: None,
        })
    }

    /// Name of the single deployment that runs every container of the workspace.
    pub fn deployment_name(&self) -> String {
        format!("{}.workspace", self.workspace_id)
    }

    /// Service fronting the endpoints of one workspace container.
    pub fn service_name(&self, container_name: &str) -> String {
        format!("{}-{}", self.workspace_id, container_name)
    }
}

/// Short, label-safe id derived from the first three groups of the resource uid.
///
/// The same uid always yields the same id, so objects keep their names across reconciles.
pub fn workspace_id(uid: &str) -> Result<String> {
    let uid = Uuid::parse_str(uid).map_err(|source| WorkspaceError::InvalidIdentifier {
        uid: uid.to_string(),
        source,
    })?;
    let hyphenated = uid.hyphenated().to_string();
    let groups: String = hyphenated.split('-').take(3).collect();
    Ok(format!("{WORKSPACE_ID_PREFIX}{groups}"))
}
