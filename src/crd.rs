use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the derived workspace id on every object composed for a workspace.
pub const WORKSPACE_ID_LABEL: &str = "workspace.devfile.io/workspace-id";
pub const WORKSPACE_NAME_LABEL: &str = "workspace.devfile.io/workspace-name";
/// Uid of the user that created the workspace. Only that user may exec into its pods.
pub const WORKSPACE_CREATOR_ANNOTATION: &str = "workspace.devfile.io/creator";
/// Ties generated services to the composed deployment's pods.
pub const DEPLOYMENT_NAME_LABEL: &str = "deployment";

pub const PUBLIC_ENDPOINT_ATTRIBUTE: &str = "public";
pub const TYPE_ENDPOINT_ATTRIBUTE: &str = "type";

type ComponentAlias = String;
type ContainerName = String;

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Default)]
#[kube(
    group = "workspace.devfile.io",
    version = "v1alpha1",
    kind = "Workspace",
    namespaced,
    status = "WorkspaceStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.ideUrl"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub routing_class: String,
    #[serde(default)]
    pub devfile: DevfileSpec,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default, PartialEq)]
pub struct DevfileSpec {
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ComponentType {
    CheEditor,
    ChePlugin,
    Kubernetes,
    Openshift,
    #[default]
    Dockerimage,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub alias: Option<ComponentAlias>,
    /// Plugin or editor id, e.g. `eclipse/che-theia/latest`.
    pub id: Option<String>,
    /// URL of a plugin meta.yaml or a kubernetes manifest.
    pub reference: Option<String>,
    /// Inline kubernetes/openshift manifest.
    pub reference_content: Option<String>,
    pub image: Option<String>,
    pub memory_limit: Option<String>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Vec<EnvSpec>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default)]
    pub mount_sources: bool,
}

impl ComponentSpec {
    /// Name used to refer to this component in logs and errors.
    pub fn display_name(&self) -> String {
        self.alias
            .clone()
            .or_else(|| self.id.clone())
            .or_else(|| self.reference.clone())
            .unwrap_or_else(|| format!("{:?}", self.kind))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EnvSpec {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub name: String,
    pub container_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
pub struct Endpoint {
    pub name: String,
    pub port: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<CommandAction>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct CommandAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub component: Option<ComponentAlias>,
    pub command: Option<String>,
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub phase: Option<WorkspacePhase>,
    #[serde(default)]
    pub conditions: Vec<WorkspaceCondition>,
    pub ide_url: Option<String>,
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum WorkspacePhase {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum WorkspaceConditionType {
    ComponentsReady,
    RoutingReady,
    DeploymentReady,
}

impl WorkspaceConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceConditionType::ComponentsReady => "ComponentsReady",
            WorkspaceConditionType::RoutingReady => "RoutingReady",
            WorkspaceConditionType::DeploymentReady => "DeploymentReady",
        }
    }
}

/// Conditions are only ever asserted or decayed, never negated.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceCondition {
    #[serde(rename = "type")]
    pub kind: WorkspaceConditionType,
    pub status: ConditionStatus,
    pub last_transition_time: Time,
}

/// How the containers of one workspace should be exposed. Consumed by an exposure
/// component that creates services and ingresses/routes and reports the resulting urls.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "workspace.devfile.io",
    version = "v1alpha1",
    kind = "WorkspaceRouting",
    namespaced,
    status = "WorkspaceRoutingStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRoutingSpec {
    pub exposed: bool,
    pub routing_class: String,
    pub ingress_global_domain: String,
    pub workspace_pod_selector: BTreeMap<String, String>,
    pub services: BTreeMap<ContainerName, ServiceDescription>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
    pub service_name: String,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRoutingStatus {
    pub phase: Option<RoutingPhase>,
    #[serde(default)]
    pub exposed_endpoints: BTreeMap<String, Vec<ExposedEndpoint>>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RoutingPhase {
    Preparing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ExposedEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
started: true
routingClass: basic
devfile:
  components:
    - type: cheEditor
      id: eclipse/che-theia/next
    - type: dockerimage
      alias: tools
      image: quay.io/eclipse/che-java11-maven:nightly
      memoryLimit: 512Mi
      mountSources: true
      endpoints:
        - name: web
          port: 8080
          attributes:
            public: "false"
    - type: somethingNew
  commands:
    - name: build
      actions:
        - type: exec
          component: tools
          command: mvn package
          workdir: /projects/app
"#;

    #[test]
    fn test_deserialize() {
        let spec: WorkspaceSpec = serde_yaml::from_str(EXAMPLE).unwrap();
        assert!(spec.started);
        assert_eq!(spec.routing_class, "basic");

        let kinds: Vec<ComponentType> = spec.devfile.components.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            [
                ComponentType::CheEditor,
                ComponentType::Dockerimage,
                ComponentType::Unknown
            ]
        );

        let tools = &spec.devfile.components[1];
        assert_eq!(tools.alias.as_deref(), Some("tools"));
        assert!(tools.mount_sources);
        assert_eq!(tools.endpoints[0].port, 8080);
        assert_eq!(tools.endpoints[0].attributes["public"], "false");

        assert_eq!(
            spec.devfile.commands[0].actions[0].workdir.as_deref(),
            Some("/projects/app")
        );
    }

    #[test]
    fn condition_serializes_type_and_time() {
        let condition = WorkspaceCondition {
            kind: WorkspaceConditionType::RoutingReady,
            status: ConditionStatus::Unknown,
            last_transition_time: Time(
                chrono::DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                    .unwrap()
                    .into(),
            ),
        };
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "RoutingReady",
                "status": "Unknown",
                "lastTransitionTime": "2026-01-02T03:04:05Z",
            })
        );
    }
}
