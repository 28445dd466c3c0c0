//! Folds the pod fragments contributed by components into the workspace deployment.
//!
//! Containers, init containers and volumes must have unique names: a collision is
//! fatal. Image pull secrets are deduplicated instead, first occurrence wins.

use std::collections::HashSet;

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Container, LocalObjectReference, PodSpec, PodTemplateSpec, Volume},
};

use crate::{
    component::K8sObject,
    crd::DEPLOYMENT_NAME_LABEL,
    error::{ResourceKind, Result, WorkspaceError},
};

/// What to do when an entry's name is already taken.
#[derive(Debug, Clone, Copy)]
pub enum OnDuplicate {
    Reject(ResourceKind),
    Skip,
}

/// Appends `additions` to `into`, keyed by name, preserving order.
pub fn merge_named<T: Clone>(
    into: &mut Vec<T>,
    additions: &[T],
    name_of: impl Fn(&T) -> &str,
    on_duplicate: OnDuplicate,
) -> Result<()> {
    let mut seen: HashSet<String> = into.iter().map(|t| name_of(t).to_string()).collect();
    for item in additions {
        let name = name_of(item);
        if !seen.insert(name.to_string()) {
            match on_duplicate {
                OnDuplicate::Reject(kind) => {
                    return Err(WorkspaceError::DuplicateResourceName {
                        kind,
                        name: name.to_string(),
                    })
                }
                OnDuplicate::Skip => continue,
            }
        }
        into.push(item.clone());
    }
    Ok(())
}

fn container_name(c: &Container) -> &str {
    &c.name
}

fn volume_name(v: &Volume) -> &str {
    &v.name
}

fn secret_name(s: &LocalObjectReference) -> &str {
    s.name.as_deref().unwrap_or_default()
}

pub fn merge_init_containers(pod: &mut PodSpec, additions: &[Container]) -> Result<()> {
    merge_named(
        pod.init_containers.get_or_insert_with(Vec::new),
        additions,
        container_name,
        OnDuplicate::Reject(ResourceKind::InitContainer),
    )
}

pub fn merge_volumes(pod: &mut PodSpec, additions: &[Volume]) -> Result<()> {
    merge_named(
        pod.volumes.get_or_insert_with(Vec::new),
        additions,
        volume_name,
        OnDuplicate::Reject(ResourceKind::Volume),
    )
}

/// Merges every pod fragment into the deployment's pod template, in order.
///
/// Afterwards the deployment name label is stamped on the pod template and on the
/// selector of every service in `objects`, so generated services always reach the pod.
pub fn merge_pod_additions<'a>(
    deployment: &mut Deployment,
    additions: impl IntoIterator<Item = &'a PodTemplateSpec>,
    objects: &mut [K8sObject],
) -> Result<()> {
    let deployment_name = deployment.metadata.name.clone().unwrap_or_default();
    let template = &mut deployment.spec.get_or_insert_with(Default::default).template;
    let metadata = template.metadata.get_or_insert_with(Default::default);
    let pod = template.spec.get_or_insert_with(Default::default);

    for addition in additions {
        if let Some(meta) = &addition.metadata {
            if let Some(annotations) = &meta.annotations {
                metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .extend(annotations.clone());
            }
            if let Some(labels) = &meta.labels {
                metadata
                    .labels
                    .get_or_insert_with(Default::default)
                    .extend(labels.clone());
            }
        }

        let Some(spec) = &addition.spec else {
            continue;
        };
        merge_named(
            &mut pod.containers,
            &spec.containers,
            container_name,
            OnDuplicate::Reject(ResourceKind::Container),
        )?;
        merge_init_containers(pod, spec.init_containers.as_deref().unwrap_or_default())?;
        merge_volumes(pod, spec.volumes.as_deref().unwrap_or_default())?;
        merge_named(
            pod.image_pull_secrets.get_or_insert_with(Vec::new),
            spec.image_pull_secrets.as_deref().unwrap_or_default(),
            secret_name,
            OnDuplicate::Skip,
        )?;
    }

    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(DEPLOYMENT_NAME_LABEL.to_string(), deployment_name.clone());
    for service in objects.iter_mut().filter_map(K8sObject::as_service_mut) {
        service
            .spec
            .get_or_insert_with(Default::default)
            .selector
            .get_or_insert_with(Default::default)
            .insert(DEPLOYMENT_NAME_LABEL.to_string(), deployment_name.clone());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        component::tests::{props, service},
        config::ControllerConfig,
        deployment::skeleton,
    };
    use kube::core::ObjectMeta;

    fn fragment(containers: &[&str], secrets: &[&str]) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|name| Container {
                        name: name.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                image_pull_secrets: Some(
                    secrets
                        .iter()
                        .map(|name| LocalObjectReference {
                            name: Some(name.to_string()),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        }
    }

    fn deployment() -> Deployment {
        skeleton(&props(), &ControllerConfig::default())
    }

    fn pod(deployment: &Deployment) -> &PodSpec {
        deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
    }

    #[test]
    fn duplicate_containers_are_fatal() {
        let mut deployment = deployment();
        let additions = [fragment(&["main"], &[]), fragment(&["main"], &[])];
        let err = merge_pod_additions(&mut deployment, &additions, &mut []).unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::DuplicateResourceName {
                kind: ResourceKind::Container,
                ref name,
            } if name == "main"
        ));
    }

    #[test]
    fn duplicate_pull_secrets_are_skipped() {
        let mut deployment = deployment();
        let additions = [
            fragment(&["a"], &["registry"]),
            fragment(&["b"], &["registry", "other"]),
        ];
        merge_pod_additions(&mut deployment, &additions, &mut []).unwrap();
        let secrets: Vec<_> = pod(&deployment)
            .image_pull_secrets
            .iter()
            .flatten()
            .map(|s| s.name.clone().unwrap())
            .collect();
        assert_eq!(secrets, ["registry", "other"]);
        let containers: Vec<_> = pod(&deployment)
            .containers
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(containers, ["a", "b"]);
    }

    #[test]
    fn volume_colliding_with_shared_claim_is_fatal() {
        let mut deployment = deployment();
        let mut addition = fragment(&[], &[]);
        addition.spec.as_mut().unwrap().volumes = Some(vec![Volume {
            name: ControllerConfig::default().claim_name,
            ..Default::default()
        }]);
        let err = merge_pod_additions(&mut deployment, [&addition], &mut []).unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::DuplicateResourceName {
                kind: ResourceKind::Volume,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_init_containers_are_fatal() {
        let mut deployment = deployment();
        let init = vec![Container {
            name: "setup".into(),
            ..Default::default()
        }];
        let mut addition = fragment(&[], &[]);
        addition.spec.as_mut().unwrap().init_containers = Some(init);
        let err =
            merge_pod_additions(&mut deployment, [&addition, &addition], &mut []).unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::DuplicateResourceName {
                kind: ResourceKind::InitContainer,
                ..
            }
        ));
    }

    #[test]
    fn metadata_is_last_writer_wins() {
        let mut deployment = deployment();
        let with_annotation = |value: &str| PodTemplateSpec {
            metadata: Some(ObjectMeta {
                annotations: Some([("a".to_string(), value.to_string())].into()),
                labels: Some([("l".to_string(), value.to_string())].into()),
                ..Default::default()
            }),
            spec: None,
        };
        let additions = [with_annotation("first"), with_annotation("second")];
        merge_pod_additions(&mut deployment, &additions, &mut []).unwrap();
        let meta = deployment.spec.unwrap().template.metadata.unwrap();
        assert_eq!(meta.annotations.unwrap()["a"], "second");
        assert_eq!(meta.labels.unwrap()["l"], "second");
    }

    #[test]
    fn services_select_the_deployment() {
        let mut deployment = deployment();
        let mut objects = vec![service("web"), service("db")];
        let additions: Vec<&PodTemplateSpec> = Vec::new();
        merge_pod_additions(&mut deployment, additions, &mut objects).unwrap();

        let name = deployment.metadata.name.clone().unwrap();
        let labels = deployment
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .labels
            .unwrap();
        assert_eq!(labels[DEPLOYMENT_NAME_LABEL], name);
        for object in &mut objects {
            let service = object.as_service_mut().unwrap();
            let selector = service.spec.as_ref().unwrap().selector.as_ref().unwrap();
            assert_eq!(selector[DEPLOYMENT_NAME_LABEL], name);
        }
    }
}
