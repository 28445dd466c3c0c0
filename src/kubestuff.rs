use std::{collections::BTreeMap, fmt::Debug};

use anyhow::anyhow as ah;
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{ConfigMap, Secret, Service},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
    NamespaceResourceScope,
};
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams},
    core::ObjectMeta,
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::{
    component::K8sObject,
    crd::{Workspace, WorkspaceRouting, WORKSPACE_ID_LABEL},
    error::Result,
};

pub const FIELD_MANAGER: &str = "workspace-operator";

/// Server side applies the objects composed for one workspace, owned by that workspace,
/// and prunes the ones it no longer composes.
pub struct Applier {
    client: Client,
    namespace: String,
    workspace_id: String,
    owner: OwnerReference,
}

impl Applier {
    pub fn new(client: Client, workspace: &Workspace, workspace_id: &str) -> Result<Self> {
        let namespace = workspace
            .namespace()
            .ok_or_else(|| ah!("workspace {} has no namespace", workspace.name_any()))?;
        let owner = workspace
            .controller_owner_ref(&())
            .ok_or_else(|| ah!("workspace {} has no uid", workspace.name_any()))?;
        Ok(Self {
            client,
            namespace,
            workspace_id: workspace_id.to_string(),
            owner,
        })
    }

    /// Applies every object as a dry run, then for real.
    pub async fn apply_objects(&self, objects: &[K8sObject]) -> Result<()> {
        for patch_params in patch_params() {
            for object in objects {
                match object {
                    K8sObject::Deployment(d) => {
                        self.apply(d.as_ref().clone(), &patch_params).await?;
                    }
                    K8sObject::Service(s) => {
                        self.apply(s.clone(), &patch_params).await?;
                    }
                    K8sObject::ConfigMap(c) => {
                        self.apply(c.clone(), &patch_params).await?;
                    }
                    K8sObject::Secret(s) => {
                        self.apply(s.clone(), &patch_params).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies the routing descriptor and returns it as stored, status included.
    pub async fn apply_routing(&self, routing: WorkspaceRouting) -> Result<WorkspaceRouting> {
        let [dry_run, forced] = patch_params();
        self.apply(routing.clone(), &dry_run).await?;
        self.apply(routing, &forced).await
    }

    async fn apply<K>(&self, mut resource: K, patch_params: &PatchParams) -> Result<K>
    where
        K: Clone + DeserializeOwned + Serialize + Debug + Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let name = resource
            .meta()
            .name
            .clone()
            .ok_or_else(|| ah!("resource is unnamed"))?;
        adopt(
            resource.meta_mut(),
            &self.namespace,
            &self.workspace_id,
            &self.owner,
        );

        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let applied = api
            .patch(&name, patch_params, &Patch::Apply(&resource))
            .await?;
        debug!(
            kind = %K::kind(&Default::default()),
            name = %name,
            namespace = %self.namespace,
            dry_run = patch_params.dry_run,
            "applied"
        );
        Ok(applied)
    }

    /// Deletes objects of this workspace that `objects` no longer contains.
    ///
    /// Returns how many objects were deleted.
    pub async fn prune(&self, objects: &[K8sObject]) -> Result<usize> {
        let mut pruned = 0;
        pruned += self.prune_kind::<Deployment>(objects).await?;
        pruned += self.prune_kind::<Service>(objects).await?;
        pruned += self.prune_kind::<ConfigMap>(objects).await?;
        pruned += self.prune_kind::<Secret>(objects).await?;
        Ok(pruned)
    }

    async fn prune_kind<K>(&self, objects: &[K8sObject]) -> Result<usize>
    where
        K: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let keep: Vec<&str> = objects
            .iter()
            .filter(|object| object.kind() == kind)
            .filter_map(|object| object.metadata().name.as_deref())
            .collect();

        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let selector = format!("{}={}", WORKSPACE_ID_LABEL, self.workspace_id);
        let list = api.list(&ListParams::default().labels(&selector)).await?;
        let to_delete = stale(list.iter().map(|r| r.meta()), &keep, &self.owner.uid);

        if !to_delete.is_empty() {
            info!(%kind, namespace = %self.namespace, names = ?to_delete, "pruning resources");
        }

        for delete_params in [
            DeleteParams {
                dry_run: true,
                ..Default::default()
            },
            DeleteParams::default(),
        ] {
            for name in &to_delete {
                match api.delete(name, &delete_params).await {
                    Ok(_) => {}
                    // already gone
                    Err(kube::Error::Api(e)) if e.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(to_delete.len())
    }
}

/// Names of the objects controlled by `owner_uid` that are not in `keep`.
fn stale<'a>(
    existing: impl IntoIterator<Item = &'a ObjectMeta>,
    keep: &[&str],
    owner_uid: &str,
) -> Vec<String> {
    existing
        .into_iter()
        .filter(|meta| {
            meta.owner_references
                .iter()
                .flatten()
                .any(|owner| owner.uid == owner_uid)
        })
        .filter_map(|meta| meta.name.as_deref())
        .filter(|name| !keep.iter().any(|kept| kept == name))
        .map(str::to_string)
        .collect()
}

fn patch_params() -> [PatchParams; 2] {
    [
        PatchParams {
            dry_run: true,
            force: false,
            field_manager: Some(FIELD_MANAGER.to_string()),
            field_validation: None,
        },
        PatchParams {
            dry_run: false,
            force: true,
            field_manager: Some(FIELD_MANAGER.to_string()),
            field_validation: None,
        },
    ]
}

/// Places `meta` in `namespace` with `owner` as its only owner, labelled for pruning.
fn adopt(meta: &mut ObjectMeta, namespace: &str, workspace_id: &str, owner: &OwnerReference) {
    meta.namespace = Some(namespace.to_string());
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(WORKSPACE_ID_LABEL.to_string(), workspace_id.to_string());
    meta.owner_references = Some(vec![owner.clone()]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::WorkspaceSpec;

    #[test]
    fn adopted_objects_are_controlled_by_the_workspace() {
        let mut ws = Workspace::new("my-ws", WorkspaceSpec::default());
        ws.metadata.uid = Some("0a1b2c3d-4e5f-6789-abcd-ef0123456789".into());
        let owner = ws.controller_owner_ref(&()).unwrap();

        let mut meta = ObjectMeta {
            name: Some("svc".into()),
            namespace: Some("elsewhere".into()),
            owner_references: Some(vec![OwnerReference::default()]),
            ..Default::default()
        };
        adopt(&mut meta, "user-ns", "workspace0a1b2c3d4e5f6789", &owner);

        assert_eq!(meta.namespace.as_deref(), Some("user-ns"));
        assert_eq!(
            meta.labels.as_ref().unwrap()[WORKSPACE_ID_LABEL],
            "workspace0a1b2c3d4e5f6789"
        );
        let owners = meta.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Workspace");
        assert_eq!(owners[0].name, "my-ws");
        assert_eq!(owners[0].controller, Some(true));
    }

    fn owned(name: &str, owner_uid: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            owner_references: Some(vec![OwnerReference {
                uid: owner_uid.into(),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn objects_no_longer_composed_are_stale() {
        let existing = [
            owned("workspace123.workspace", "ws-uid"),
            owned("workspace123-tools", "ws-uid"),
            owned("workspace123-db", "ws-uid"),
            owned("someone-elses", "other-uid"),
        ];
        let stale = stale(
            &existing,
            &["workspace123.workspace", "workspace123-tools"],
            "ws-uid",
        );
        assert_eq!(stale, ["workspace123-db"]);
    }

    #[test]
    fn stopping_prunes_everything_owned() {
        let existing = [
            owned("workspace123.workspace", "ws-uid"),
            owned("workspace123-plugin-broker", "ws-uid"),
            ObjectMeta {
                name: Some("unowned".into()),
                ..Default::default()
            },
        ];
        let stale = stale(&existing, &[], "ws-uid");
        assert_eq!(stale, ["workspace123.workspace", "workspace123-plugin-broker"]);
    }

    #[test]
    fn dry_run_comes_first() {
        let [first, second] = patch_params();
        assert!(first.dry_run && !first.force);
        assert!(!second.dry_run && second.force);
        assert_eq!(second.field_manager.as_deref(), Some(FIELD_MANAGER));
    }
}
