use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::info;

use crate::{
    component::{dispatch_components, ComponentInstanceStatus, K8sObject, Provisioners},
    config::ControllerConfig,
    crd::{Workspace, WorkspaceRouting, WORKSPACE_CREATOR_ANNOTATION},
    deployment::{precreate_subpaths_container, skeleton},
    error::{Result, WorkspaceError},
    merge::{merge_init_containers, merge_pod_additions, merge_volumes},
    properties::WorkspaceProperties,
    routing::{build_workspace_routing, stopped_workspace_routing},
};

/// Everything one reconcile pass wants to exist in the cluster for a workspace.
#[derive(Debug)]
pub struct ComposedWorkspace {
    pub properties: WorkspaceProperties,
    pub routing: WorkspaceRouting,
    pub statuses: Vec<ComponentInstanceStatus>,
    /// Component objects in component order, then plugin broker objects, then the deployment.
    pub objects: Vec<K8sObject>,
}

pub fn convert_to_core_objects(
    workspace: &Workspace,
    config: &ControllerConfig,
    provisioners: &impl Provisioners,
) -> Result<ComposedWorkspace> {
    let mut props = WorkspaceProperties::new(
        workspace.namespace().as_deref().unwrap_or_default(),
        &workspace.name_any(),
        workspace.metadata.uid.as_deref().unwrap_or_default(),
        workspace.spec.started,
        &workspace.spec.routing_class,
    )?;
    props.external_api_url = config.external_api_url.clone();

    if !props.started {
        return Ok(ComposedWorkspace {
            routing: stopped_workspace_routing(&props, &config.ingress_global_domain),
            properties: props,
            statuses: Vec::new(),
            objects: Vec::new(),
        });
    }

    let mut deployment = skeleton(&props, config);

    let devfile = &workspace.spec.devfile;
    let mut dispatched =
        dispatch_components(&props, &devfile.components, &devfile.commands, provisioners)?;
    merge_pod_additions(
        &mut deployment,
        dispatched
            .statuses
            .iter()
            .filter_map(|status| status.pod_additions.as_ref()),
        &mut dispatched.objects,
    )?;
    stamp_creator(
        &mut deployment,
        workspace.annotations().get(WORKSPACE_CREATOR_ANNOTATION),
    );

    let plugin_init = provisioners
        .plugin_init(&props, &dispatched.plugins)
        .map_err(|source| WorkspaceError::Provisioner {
            component: "plugin broker".to_string(),
            source,
        })?;
    let pod = deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default);
    pod.init_containers
        .get_or_insert_with(Vec::new)
        .push(precreate_subpaths_container(&props, config));
    merge_init_containers(pod, &plugin_init.init_containers)?;
    merge_volumes(pod, &plugin_init.volumes)?;

    let mut objects = dispatched.objects;
    objects.extend(plugin_init.objects);

    let routing = build_workspace_routing(
        &props,
        &config.ingress_global_domain,
        &dispatched.statuses,
    );
    info!(
        workspace_id = %props.workspace_id,
        components = dispatched.statuses.len(),
        services = routing.spec.services.len(),
        plugins = dispatched.plugins.len(),
        "composed workspace"
    );
    objects.push(K8sObject::Deployment(Box::new(deployment)));

    Ok(ComposedWorkspace {
        properties: props,
        routing,
        statuses: dispatched.statuses,
        objects,
    })
}

/// The pod template carries exactly the workspace's creator, whatever the components asked for.
fn stamp_creator(deployment: &mut Deployment, creator: Option<&String>) {
    let annotations = deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default);
    match creator {
        Some(creator) => {
            annotations.insert(WORKSPACE_CREATOR_ANNOTATION.to_string(), creator.clone());
        }
        None => {
            annotations.remove(WORKSPACE_CREATOR_ANNOTATION);
        }
    }
}
