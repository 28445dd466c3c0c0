//! Provisioners shipped with the controller.
//!
//! dockerimage components become a single container, kubernetes/openshift components are
//! taken from their inline manifest, and editor/plugin components are only recorded so the
//! plugin broker init container can resolve them onto the shared claim.

use std::collections::BTreeMap;

use anyhow::{anyhow as ah, bail, Context};
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{
            ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, Pod, PodSpec,
            PodTemplateSpec, ResourceRequirements, Secret, Service, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::api::resource::Quantity,
};
use kube::core::ObjectMeta;
use serde::Deserialize;

use crate::{
    component::{
        ComponentInstanceStatus, ContainerDescription, K8sObject, PluginInitOutput,
        PluginReference, Provisioners,
    },
    config::ControllerConfig,
    crd::{CommandSpec, ComponentSpec, WORKSPACE_ID_LABEL},
    properties::WorkspaceProperties,
};

pub const PROJECTS_ROOT: &str = "/projects";
pub const PLUGIN_BROKER_CONTAINER: &str = "plugin-broker";
const PLUGINS_ROOT: &str = "/plugins";
const BROKER_CONFIG_VOLUME: &str = "plugin-broker-config";
const BROKER_CONFIG_MOUNT: &str = "/broker-config";
const BROKER_CONFIG_FILE: &str = "config.json";
const EXTERNAL_API_ENV: &str = "WORKSPACE_API_EXTERNAL";

#[derive(Debug, Clone)]
pub struct DefaultProvisioners {
    claim_name: String,
    plugin_broker_image: String,
}

impl DefaultProvisioners {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            claim_name: config.claim_name.clone(),
            plugin_broker_image: config.plugin_broker_image.clone(),
        }
    }

    /// Mounts `sub_path` of the workspace's directory on the shared claim at `mount_path`.
    fn claim_mount(
        &self,
        props: &WorkspaceProperties,
        sub_path: &str,
        mount_path: &str,
    ) -> VolumeMount {
        VolumeMount {
            name: self.claim_name.clone(),
            mount_path: mount_path.to_string(),
            sub_path: Some(format!("{}/{}", props.workspace_id, sub_path)),
            ..Default::default()
        }
    }
}

impl Provisioners for DefaultProvisioners {
    fn plugin(
        &self,
        _props: &WorkspaceProperties,
        component: &ComponentSpec,
    ) -> anyhow::Result<Option<ComponentInstanceStatus>> {
        let plugin_reference = (component.id.is_some() || component.reference.is_some()).then(|| {
            PluginReference {
                id: component.id.clone(),
                reference: component.reference.clone(),
            }
        });
        Ok(Some(ComponentInstanceStatus {
            plugin_reference,
            ..Default::default()
        }))
    }

    fn manifest(
        &self,
        props: &WorkspaceProperties,
        component: &ComponentSpec,
    ) -> anyhow::Result<Option<ComponentInstanceStatus>> {
        let content = component.reference_content.as_deref().ok_or_else(|| {
            ah!("kubernetes components must inline their manifest in referenceContent")
        })?;

        let mut pod = PodSpec::default();
        let mut pod_meta = ObjectMeta::default();
        let mut external_objects = Vec::new();
        let mut has_pod = false;

        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_json::Value::deserialize(document)
                .context("referenceContent is not valid yaml")?;
            if value.is_null() {
                continue;
            }
            let kind = value
                .get("kind")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            match kind.as_str() {
                "Pod" => {
                    let p: Pod = serde_json::from_value(value)?;
                    absorb_pod(&mut pod_meta, &mut pod, p.metadata, p.spec);
                    has_pod = true;
                }
                "Deployment" => {
                    let d: Deployment = serde_json::from_value(value)?;
                    let template = d.spec.map(|s| s.template).unwrap_or_default();
                    absorb_pod(
                        &mut pod_meta,
                        &mut pod,
                        template.metadata.unwrap_or_default(),
                        template.spec,
                    );
                    has_pod = true;
                }
                "Service" => {
                    let mut s: Service = serde_json::from_value(value)?;
                    own(props, &mut s.metadata);
                    external_objects.push(K8sObject::Service(s));
                }
                "ConfigMap" => {
                    let mut c: ConfigMap = serde_json::from_value(value)?;
                    own(props, &mut c.metadata);
                    external_objects.push(K8sObject::ConfigMap(c));
                }
                "Secret" => {
                    let mut s: Secret = serde_json::from_value(value)?;
                    own(props, &mut s.metadata);
                    external_objects.push(K8sObject::Secret(s));
                }
                other => bail!("unsupported object kind {other:?} in component manifest"),
            }
        }

        let containers = pod
            .containers
            .iter()
            .map(|c| {
                let ports = c.ports.iter().flatten().map(|p| p.container_port).collect();
                (c.name.clone(), ContainerDescription { ports })
            })
            .collect();

        Ok(Some(ComponentInstanceStatus {
            containers,
            endpoints: component.endpoints.clone(),
            pod_additions: has_pod.then(|| PodTemplateSpec {
                metadata: Some(pod_meta),
                spec: Some(pod),
            }),
            external_objects,
            plugin_reference: None,
        }))
    }

    fn dockerimage(
        &self,
        props: &WorkspaceProperties,
        commands: &[CommandSpec],
        component: &ComponentSpec,
    ) -> anyhow::Result<Option<ComponentInstanceStatus>> {
        let alias = component
            .alias
            .clone()
            .ok_or_else(|| ah!("dockerimage components must have an alias"))?;
        let image = component
            .image
            .clone()
            .ok_or_else(|| ah!("dockerimage component {alias} has no image"))?;

        let ports = component
            .endpoints
            .iter()
            .map(|e| {
                i32::try_from(e.port)
                    .with_context(|| format!("endpoint {} has an invalid port {}", e.name, e.port))
            })
            .collect::<anyhow::Result<Vec<i32>>>()?;

        let mut env: Vec<EnvVar> = component
            .env
            .iter()
            .map(|e| EnvVar {
                name: e.name.clone(),
                value: Some(e.value.clone()),
                ..Default::default()
            })
            .collect();
        if let Some(url) = &props.external_api_url {
            env.push(EnvVar {
                name: EXTERNAL_API_ENV.to_string(),
                value: Some(url.clone()),
                ..Default::default()
            });
        }

        let mut volume_mounts: Vec<VolumeMount> = component
            .volumes
            .iter()
            .map(|v| self.claim_mount(props, &v.name, &v.container_path))
            .collect();
        if component.mount_sources {
            volume_mounts.push(self.claim_mount(props, "projects", PROJECTS_ROOT));
        }

        let resources = component.memory_limit.as_ref().map(|limit| ResourceRequirements {
            limits: Some([("memory".to_string(), Quantity(limit.clone()))].into()),
            ..Default::default()
        });

        // the first exec command aimed at this component decides the working directory
        let working_dir = commands
            .iter()
            .flat_map(|c| &c.actions)
            .filter(|a| a.kind == "exec" && a.component.as_deref() == Some(alias.as_str()))
            .find_map(|a| a.workdir.clone());

        let container = Container {
            name: alias.clone(),
            image: Some(image),
            command: component.command.clone(),
            args: component.args.clone(),
            env: (!env.is_empty()).then_some(env),
            ports: (!ports.is_empty()).then(|| {
                ports
                    .iter()
                    .map(|port| ContainerPort {
                        container_port: *port,
                        ..Default::default()
                    })
                    .collect()
            }),
            resources,
            volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
            working_dir,
            image_pull_policy: Some("IfNotPresent".to_string()),
            ..Default::default()
        };

        Ok(Some(ComponentInstanceStatus {
            containers: [(alias, ContainerDescription { ports })].into(),
            endpoints: component.endpoints.clone(),
            pod_additions: Some(PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            }),
            external_objects: Vec::new(),
            plugin_reference: None,
        }))
    }

    fn plugin_init(
        &self,
        props: &WorkspaceProperties,
        plugins: &[PluginReference],
    ) -> anyhow::Result<PluginInitOutput> {
        if plugins.is_empty() {
            return Ok(PluginInitOutput::default());
        }

        let config_name = format!("{}-plugin-broker", props.workspace_id);
        let mut metadata = ObjectMeta {
            name: Some(config_name.clone()),
            ..Default::default()
        };
        own(props, &mut metadata);
        let config_map = ConfigMap {
            metadata,
            data: Some(
                [(
                    BROKER_CONFIG_FILE.to_string(),
                    serde_json::to_string(plugins)?,
                )]
                .into(),
            ),
            ..Default::default()
        };

        let broker = Container {
            name: PLUGIN_BROKER_CONTAINER.to_string(),
            image: Some(self.plugin_broker_image.clone()),
            args: Some(vec![
                "--config".to_string(),
                format!("{BROKER_CONFIG_MOUNT}/{BROKER_CONFIG_FILE}"),
                "--plugins-dir".to_string(),
                PLUGINS_ROOT.to_string(),
            ]),
            image_pull_policy: Some("Always".to_string()),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: BROKER_CONFIG_VOLUME.to_string(),
                    mount_path: BROKER_CONFIG_MOUNT.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                },
                self.claim_mount(props, "plugins", PLUGINS_ROOT),
            ]),
            termination_message_policy: Some("FallbackToLogsOnError".to_string()),
            ..Default::default()
        };

        Ok(PluginInitOutput {
            init_containers: vec![broker],
            volumes: vec![Volume {
                name: BROKER_CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(config_name),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            objects: vec![K8sObject::ConfigMap(config_map)],
        })
    }
}

/// Places an object in the workspace namespace and labels it with the workspace id.
fn own(props: &WorkspaceProperties, metadata: &mut ObjectMeta) {
    metadata.namespace = Some(props.namespace.clone());
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(WORKSPACE_ID_LABEL.to_string(), props.workspace_id.clone());
}

/// Folds one pod template from a component manifest into the accumulated one.
fn absorb_pod(
    meta: &mut ObjectMeta,
    pod: &mut PodSpec,
    from_meta: ObjectMeta,
    from: Option<PodSpec>,
) {
    if let Some(labels) = from_meta.labels {
        meta.labels.get_or_insert_with(BTreeMap::new).extend(labels);
    }
    if let Some(annotations) = from_meta.annotations {
        meta.annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations);
    }
    let Some(from) = from else {
        return;
    };
    pod.containers.extend(from.containers);
    if let Some(init) = from.init_containers {
        pod.init_containers.get_or_insert_with(Vec::new).extend(init);
    }
    if let Some(volumes) = from.volumes {
        pod.volumes.get_or_insert_with(Vec::new).extend(volumes);
    }
    if let Some(secrets) = from.image_pull_secrets {
        pod.image_pull_secrets
            .get_or_insert_with(Vec::new)
            .extend(secrets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        component::tests::{component, props},
        crd::{CommandAction, ComponentType, Endpoint, EnvSpec, VolumeSpec},
    };

    fn provisioners() -> DefaultProvisioners {
        DefaultProvisioners::new(&ControllerConfig::default())
    }

    fn single_container(status: &ComponentInstanceStatus) -> &Container {
        let pod = status
            .pod_additions
            .as_ref()
            .and_then(|t| t.spec.as_ref())
            .unwrap();
        assert_eq!(pod.containers.len(), 1);
        &pod.containers[0]
    }

    #[test]
    fn dockerimage_becomes_one_container() {
        let mut tools = component(ComponentType::Dockerimage, "tools");
        tools.image = Some("quay.io/example/tools:1".into());
        tools.memory_limit = Some("512Mi".into());
        tools.mount_sources = true;
        tools.env = vec![EnvSpec {
            name: "FOO".into(),
            value: "bar".into(),
        }];
        tools.volumes = vec![VolumeSpec {
            name: "maven".into(),
            container_path: "/root/.m2".into(),
        }];
        tools.endpoints = vec![Endpoint {
            name: "web".into(),
            port: 8080,
            ..Default::default()
        }];
        let commands = vec![CommandSpec {
            name: "build".into(),
            actions: vec![CommandAction {
                kind: "exec".into(),
                component: Some("tools".into()),
                command: Some("make".into()),
                workdir: Some("/projects/app".into()),
            }],
        }];
        let mut props = props();
        props.external_api_url = Some("https://api.example.com".into());

        let status = provisioners()
            .dockerimage(&props, &commands, &tools)
            .unwrap()
            .unwrap();

        assert_eq!(status.containers["tools"].ports, [8080]);
        assert_eq!(status.endpoints.len(), 1);
        let container = single_container(&status);
        assert_eq!(container.name, "tools");
        assert_eq!(container.working_dir.as_deref(), Some("/projects/app"));
        let limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits["memory"], Quantity("512Mi".into()));

        let env: Vec<_> = container.env.iter().flatten().map(|e| e.name.as_str()).collect();
        assert_eq!(env, ["FOO", EXTERNAL_API_ENV]);

        let mounts: Vec<_> = container
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| (m.mount_path.as_str(), m.sub_path.clone().unwrap()))
            .collect();
        let id = &props.workspace_id;
        assert_eq!(
            mounts,
            [
                ("/root/.m2", format!("{id}/maven")),
                (PROJECTS_ROOT, format!("{id}/projects")),
            ]
        );
    }

    #[test]
    fn dockerimage_needs_alias_and_image() {
        let mut nameless = component(ComponentType::Dockerimage, "x");
        nameless.alias = None;
        nameless.image = Some("busybox".into());
        assert!(provisioners().dockerimage(&props(), &[], &nameless).is_err());

        let imageless = component(ComponentType::Dockerimage, "x");
        assert!(provisioners().dockerimage(&props(), &[], &imageless).is_err());
    }

    #[test]
    fn manifest_splits_pods_from_objects() {
        let mut db = component(ComponentType::Kubernetes, "db");
        db.reference_content = Some(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: db
  labels:
    app: db
spec:
  containers:
    - name: postgres
      image: postgres:15
      ports:
        - containerPort: 5432
---
apiVersion: v1
kind: Service
metadata:
  name: db
spec:
  ports:
    - port: 5432
"#
            .into(),
        );
        let props = props();
        let status = provisioners().manifest(&props, &db).unwrap().unwrap();

        assert_eq!(status.containers["postgres"].ports, [5432]);
        let template = status.pod_additions.as_ref().unwrap();
        assert_eq!(
            template.metadata.as_ref().unwrap().labels.as_ref().unwrap()["app"],
            "db"
        );
        assert_eq!(status.external_objects.len(), 1);
        let K8sObject::Service(service) = &status.external_objects[0] else {
            panic!("expected a service");
        };
        assert_eq!(service.metadata.namespace.as_deref(), Some(props.namespace.as_str()));
        assert_eq!(
            service.metadata.labels.as_ref().unwrap()[WORKSPACE_ID_LABEL],
            props.workspace_id
        );
    }

    #[test]
    fn manifest_rejects_unknown_kinds_and_missing_content() {
        let mut odd = component(ComponentType::Openshift, "odd");
        odd.reference_content =
            Some("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: x\n".into());
        assert!(provisioners().manifest(&props(), &odd).is_err());

        let by_reference = component(ComponentType::Kubernetes, "remote");
        assert!(provisioners().manifest(&props(), &by_reference).is_err());
    }

    #[test]
    fn plugins_only_record_their_reference() {
        let mut editor = component(ComponentType::CheEditor, "editor");
        editor.id = Some("eclipse/che-theia/next".into());
        let status = provisioners().plugin(&props(), &editor).unwrap().unwrap();
        assert!(status.pod_additions.is_none());
        assert_eq!(
            status.plugin_reference.unwrap().id.as_deref(),
            Some("eclipse/che-theia/next")
        );
    }

    #[test]
    fn plugin_broker_is_only_added_for_plugins() {
        let empty = provisioners().plugin_init(&props(), &[]).unwrap();
        assert!(empty.init_containers.is_empty());
        assert!(empty.objects.is_empty());

        let plugins = [PluginReference {
            id: Some("eclipse/che-theia/next".into()),
            reference: None,
        }];
        let out = provisioners().plugin_init(&props(), &plugins).unwrap();
        assert_eq!(out.init_containers[0].name, PLUGIN_BROKER_CONTAINER);
        assert_eq!(out.volumes[0].name, BROKER_CONFIG_VOLUME);
        let K8sObject::ConfigMap(config) = &out.objects[0] else {
            panic!("expected a config map");
        };
        let json = &config.data.as_ref().unwrap()[BROKER_CONFIG_FILE];
        assert!(json.contains("eclipse/che-theia/next"));
    }
}
