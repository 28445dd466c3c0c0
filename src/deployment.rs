use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment},
        core::v1::{
            Container, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec,
            PodTemplateSpec, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::core::ObjectMeta;

use crate::{
    config::ControllerConfig,
    crd::{DEPLOYMENT_NAME_LABEL, WORKSPACE_ID_LABEL, WORKSPACE_NAME_LABEL},
    properties::WorkspaceProperties,
};

/// Uid and fs group of every workspace container.
const WORKSPACE_USER: i64 = 1234;
pub const PRECREATE_SUBPATHS_CONTAINER: &str = "precreate-subpaths";
/// Where the shared claim is mounted in helper containers.
pub const WORKSPACES_MOUNT: &str = "/tmp/workspaces";

/// Labels selecting the pods of a workspace, regardless of which deployment runs them.
pub fn pod_selector(props: &WorkspaceProperties) -> BTreeMap<String, String> {
    [(WORKSPACE_ID_LABEL.to_string(), props.workspace_id.clone())].into()
}

/// The deployment before any component has contributed to it.
pub fn skeleton(props: &WorkspaceProperties, config: &ControllerConfig) -> Deployment {
    let name = props.deployment_name();
    let replicas = if props.started { 1 } else { 0 };

    let mut selector = pod_selector(props);
    selector.insert(DEPLOYMENT_NAME_LABEL.to_string(), name.clone());
    let mut pod_labels = selector.clone();
    pod_labels.insert(
        WORKSPACE_NAME_LABEL.to_string(),
        props.workspace_name.clone(),
    );

    let pod_spec = PodSpec {
        automount_service_account_token: Some(config.service_account.is_some()),
        service_account_name: config.service_account.clone(),
        restart_policy: Some("Always".to_string()),
        termination_grace_period_seconds: Some(0),
        containers: Vec::new(),
        security_context: Some(PodSecurityContext {
            run_as_user: Some(WORKSPACE_USER),
            fs_group: Some(WORKSPACE_USER),
            ..Default::default()
        }),
        volumes: Some(vec![Volume {
            name: config.claim_name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: config.claim_name.clone(),
                read_only: None,
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let deployment_spec = DeploymentSpec {
        replicas: Some(replicas),
        selector: LabelSelector {
            match_labels: Some(selector),
            match_expressions: None,
        },
        strategy: Some(DeploymentStrategy {
            type_: Some("RollingUpdate".to_string()),
            rolling_update: Some(RollingUpdateDeployment {
                max_surge: Some(IntOrString::Int(1)),
                max_unavailable: Some(IntOrString::Int(1)),
            }),
        }),
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                name: Some(name.clone()),
                labels: Some(pod_labels),
                annotations: Some(BTreeMap::new()),
                ..Default::default()
            }),
            spec: Some(pod_spec),
        },
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(props.namespace.clone()),
            labels: Some(pod_selector(props)),
            ..Default::default()
        },
        spec: Some(deployment_spec),
        status: None,
    }
}

/// Creates the workspace's directory on the shared claim before anything else mounts it.
pub fn precreate_subpaths_container(
    props: &WorkspaceProperties,
    config: &ControllerConfig,
) -> Container {
    Container {
        name: PRECREATE_SUBPATHS_CONTAINER.to_string(),
        image: Some(config.precreate_image.clone()),
        command: Some(vec!["/usr/bin/mkdir".to_string()]),
        args: Some(
            ["-p", "-v", "-m", "777"]
                .into_iter()
                .map(String::from)
                .chain([format!("{WORKSPACES_MOUNT}/{}", props.workspace_id)])
                .collect(),
        ),
        image_pull_policy: Some("Always".to_string()),
        volume_mounts: Some(vec![VolumeMount {
            mount_path: WORKSPACES_MOUNT.to_string(),
            name: config.claim_name.clone(),
            read_only: Some(false),
            ..Default::default()
        }]),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        ..Default::default()
    }
}
