use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Container, PodTemplateSpec, Secret, Service, Volume},
};
use kube::core::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    crd::{CommandSpec, ComponentSpec, ComponentType, Endpoint},
    error::{Result, WorkspaceError},
    properties::WorkspaceProperties,
};

type ContainerName = String;

/// Objects produced for a workspace besides its routing descriptor.
#[derive(Debug, Clone)]
pub enum K8sObject {
    Deployment(Box<Deployment>),
    Service(Service),
    ConfigMap(ConfigMap),
    Secret(Secret),
}

impl K8sObject {
    pub fn as_service_mut(&mut self) -> Option<&mut Service> {
        match self {
            K8sObject::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            K8sObject::Deployment(_) => "Deployment",
            K8sObject::Service(_) => "Service",
            K8sObject::ConfigMap(_) => "ConfigMap",
            K8sObject::Secret(_) => "Secret",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            K8sObject::Deployment(deployment) => &deployment.metadata,
            K8sObject::Service(service) => &service.metadata,
            K8sObject::ConfigMap(config_map) => &config_map.metadata,
            K8sObject::Secret(secret) => &secret.metadata,
        }
    }

    pub fn as_deployment(&self) -> Option<&Deployment> {
        match self {
            K8sObject::Deployment(deployment) => Some(deployment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDescription {
    pub ports: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Everything one provisioner contributes for one component.
#[derive(Debug, Clone, Default)]
pub struct ComponentInstanceStatus {
    pub containers: BTreeMap<ContainerName, ContainerDescription>,
    pub endpoints: Vec<Endpoint>,
    pub pod_additions: Option<PodTemplateSpec>,
    pub external_objects: Vec<K8sObject>,
    pub plugin_reference: Option<PluginReference>,
}

/// Output of the collaborator that resolves plugin and editor references.
#[derive(Debug, Clone, Default)]
pub struct PluginInitOutput {
    pub init_containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub objects: Vec<K8sObject>,
}

/// Builds the containers for each kind of devfile component.
///
/// Each method handles exactly one component tag. Returning `Ok(None)` means the
/// provisioner had nothing to say about a component it was handed, which aborts the pass.
pub trait Provisioners {
    fn plugin(
        &self,
        props: &WorkspaceProperties,
        component: &ComponentSpec,
    ) -> anyhow::Result<Option<ComponentInstanceStatus>>;

    fn manifest(
        &self,
        props: &WorkspaceProperties,
        component: &ComponentSpec,
    ) -> anyhow::Result<Option<ComponentInstanceStatus>>;

    fn dockerimage(
        &self,
        props: &WorkspaceProperties,
        commands: &[CommandSpec],
        component: &ComponentSpec,
    ) -> anyhow::Result<Option<ComponentInstanceStatus>>;

    fn plugin_init(
        &self,
        props: &WorkspaceProperties,
        plugins: &[PluginReference],
    ) -> anyhow::Result<PluginInitOutput>;
}

/// Result of running every component of a devfile through its provisioner.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub statuses: Vec<ComponentInstanceStatus>,
    /// External objects of all components, in component order.
    pub objects: Vec<K8sObject>,
    pub plugins: Vec<PluginReference>,
}

pub fn dispatch_components(
    props: &WorkspaceProperties,
    components: &[ComponentSpec],
    commands: &[CommandSpec],
    provisioners: &impl Provisioners,
) -> Result<Dispatched> {
    let mut ret = Dispatched::default();

    for component in components {
        let name = component.display_name();
        let output = match component.kind {
            ComponentType::CheEditor | ComponentType::ChePlugin => {
                provisioners.plugin(props, component)
            }
            ComponentType::Kubernetes | ComponentType::Openshift => {
                provisioners.manifest(props, component)
            }
            ComponentType::Dockerimage => provisioners.dockerimage(props, commands, component),
            ComponentType::Unknown => Ok(None),
        };
        let status = output
            .map_err(|source| WorkspaceError::Provisioner {
                component: name.clone(),
                source,
            })?
            .ok_or_else(|| WorkspaceError::MissingProvisionerOutput {
                component: name.clone(),
            })?;

        if matches!(
            component.kind,
            ComponentType::CheEditor | ComponentType::ChePlugin
        ) {
            if let Some(plugin) = &status.plugin_reference {
                ret.plugins.push(plugin.clone());
            }
        }

        debug!(
            workspace_id = %props.workspace_id,
            component = %name,
            containers = status.containers.len(),
            objects = status.external_objects.len(),
            "provisioned component"
        );
        ret.objects.extend(status.external_objects.iter().cloned());
        ret.statuses.push(status);
    }

    Ok(ret)
}
