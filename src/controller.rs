use std::{sync::Arc, time::Duration};

use anyhow::anyhow as ah;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{runtime::controller::Action, Api, Client, ResourceExt};
use tracing::{error, info, warn};

use crate::{
    compose::convert_to_core_objects,
    config::ControllerConfig,
    crd::{RoutingPhase, Workspace, WorkspaceConditionType, WorkspacePhase, WorkspaceRouting},
    error::{Result, WorkspaceError},
    ide_url::sync_ide_url,
    kubestuff::Applier,
    provision::DefaultProvisioners,
    status::{update_workspace_status, Clock, CurrentStatus},
};

const REQUEUE_AFTER: Duration = Duration::from_secs(300);
const RETRY_AFTER: Duration = Duration::from_secs(60);

pub struct Context {
    pub client: Client,
    pub config: ControllerConfig,
    pub provisioners: DefaultProvisioners,
    pub clock: Arc<dyn Clock>,
}

pub async fn reconcile(workspace: Arc<Workspace>, ctx: Arc<Context>) -> Result<Action> {
    let name = workspace.name_any();
    let namespace = workspace
        .namespace()
        .ok_or_else(|| ah!("workspace {name} has no namespace"))?;
    let workspaces: Api<Workspace> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut workspace = workspace.as_ref().clone();

    let composed = match convert_to_core_objects(&workspace, &ctx.config, &ctx.provisioners) {
        Ok(composed) => composed,
        Err(e) => {
            error!(%namespace, %name, error = %e, "failed to compose workspace");
            let failed = CurrentStatus::new(WorkspacePhase::Failed);
            return update_workspace_status(
                &workspaces,
                &mut workspace,
                &failed,
                ctx.clock.as_ref(),
                Err(e),
            )
            .await;
        }
    };
    let props = composed.properties;
    workspace
        .status
        .get_or_insert_with(Default::default)
        .workspace_id = Some(props.workspace_id.clone());

    let applier = Applier::new(ctx.client.clone(), &workspace, &props.workspace_id)?;
    applier.apply_objects(&composed.objects).await?;
    let pruned = applier.prune(&composed.objects).await?;
    let routing = applier.apply_routing(composed.routing).await?;

    let mut pending = Ok(Action::requeue(REQUEUE_AFTER));
    let deployment = if props.started {
        let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
        deployments.get_opt(&props.deployment_name()).await?
    } else {
        None
    };
    let current = current_status(props.started, pruned > 0, &routing, deployment.as_ref());

    if current.conditions.contains(&WorkspaceConditionType::RoutingReady) {
        let exposed = routing
            .status
            .as_ref()
            .map(|status| status.exposed_endpoints.clone())
            .unwrap_or_default();
        if let Err(e) = sync_ide_url(&workspaces, &mut workspace, &exposed).await {
            warn!(%namespace, %name, error = %e, "failed to publish ide url");
            pending = Err(e);
        }
    }

    info!(
        %namespace,
        %name,
        workspace_id = %props.workspace_id,
        phase = ?current.phase,
        "reconciled workspace"
    );
    update_workspace_status(
        &workspaces,
        &mut workspace,
        &current,
        ctx.clock.as_ref(),
        pending,
    )
    .await
}

pub fn error_policy(
    workspace: Arc<Workspace>,
    error: &WorkspaceError,
    _ctx: Arc<Context>,
) -> Action {
    warn!(name = %workspace.name_any(), error = %error, "reconcile failed, retrying");
    Action::requeue(RETRY_AFTER)
}

/// Phase and asserted conditions given what the cluster reports back.
/// `tearing_down` is set when this pass deleted objects.
fn current_status(
    started: bool,
    tearing_down: bool,
    routing: &WorkspaceRouting,
    deployment: Option<&Deployment>,
) -> CurrentStatus {
    if !started {
        let phase = if tearing_down {
            WorkspacePhase::Stopping
        } else {
            WorkspacePhase::Stopped
        };
        return CurrentStatus::new(phase);
    }

    let mut conditions = vec![WorkspaceConditionType::ComponentsReady];
    let routing_ready = routing
        .status
        .as_ref()
        .map_or(false, |status| status.phase == Some(RoutingPhase::Ready));
    if routing_ready {
        conditions.push(WorkspaceConditionType::RoutingReady);
    }
    let deployment_ready = deployment
        .and_then(|d| d.status.as_ref())
        .and_then(|status| status.available_replicas)
        .map_or(false, |available| available >= 1);
    if deployment_ready {
        conditions.push(WorkspaceConditionType::DeploymentReady);
    }

    let phase = if conditions.len() == 3 {
        WorkspacePhase::Running
    } else {
        WorkspacePhase::Starting
    };
    CurrentStatus { phase, conditions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{WorkspaceConditionType::*, WorkspaceRoutingSpec, WorkspaceRoutingStatus};
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn routing(phase: Option<RoutingPhase>) -> WorkspaceRouting {
        let mut routing = WorkspaceRouting::new("workspace123", WorkspaceRoutingSpec::default());
        routing.status = phase.map(|phase| WorkspaceRoutingStatus {
            phase: Some(phase),
            ..Default::default()
        });
        routing
    }

    fn deployment(available: i32) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                available_replicas: Some(available),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn stopped_workspaces_assert_nothing() {
        let status = current_status(false, false, &routing(Some(RoutingPhase::Ready)), None);
        assert_eq!(status, CurrentStatus::new(WorkspacePhase::Stopped));
    }

    #[test]
    fn stopping_while_objects_are_being_deleted() {
        let status = current_status(false, true, &routing(None), Some(&deployment(1)));
        assert_eq!(status, CurrentStatus::new(WorkspacePhase::Stopping));
    }

    #[test]
    fn starting_until_routing_and_deployment_are_ready() {
        let status = current_status(true, false, &routing(None), None);
        assert_eq!(status.phase, WorkspacePhase::Starting);
        assert_eq!(status.conditions, [ComponentsReady]);

        let status = current_status(
            true,
            false,
            &routing(Some(RoutingPhase::Preparing)),
            Some(&deployment(1)),
        );
        assert_eq!(status.phase, WorkspacePhase::Starting);
        assert_eq!(status.conditions, [ComponentsReady, DeploymentReady]);

        let status = current_status(
            true,
            false,
            &routing(Some(RoutingPhase::Ready)),
            Some(&deployment(0)),
        );
        assert_eq!(status.conditions, [ComponentsReady, RoutingReady]);
    }

    #[test]
    fn running_when_everything_is_ready() {
        let status = current_status(
            true,
            false,
            &routing(Some(RoutingPhase::Ready)),
            Some(&deployment(1)),
        );
        assert_eq!(status.phase, WorkspacePhase::Running);
        assert_eq!(status.conditions.len(), 3);
    }
}
