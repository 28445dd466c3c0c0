//! Phase and condition bookkeeping for `Workspace` status.
//!
//! A condition type moves `absent -> True -> Unknown <-> True` and is never removed.
//! Every call stamps all touched conditions with one timestamp taken from the [`Clock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Patch, PatchParams},
    Api,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    crd::{
        ConditionStatus, Workspace, WorkspaceCondition, WorkspaceConditionType, WorkspacePhase,
        WorkspaceStatus,
    },
    error::{Result, WorkspaceError},
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Writes to the status subresource of a workspace.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn patch_status(&self, name: &str, patch: serde_json::Value) -> Result<(), kube::Error>;
}

#[async_trait]
impl StatusWriter for Api<Workspace> {
    async fn patch_status(&self, name: &str, patch: serde_json::Value) -> Result<(), kube::Error> {
        Api::patch_status(
            self,
            name,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// The status a reconcile pass arrived at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentStatus {
    pub phase: WorkspacePhase,
    /// Condition types that currently hold.
    pub conditions: Vec<WorkspaceConditionType>,
}

impl CurrentStatus {
    pub fn new(phase: WorkspacePhase) -> Self {
        Self {
            phase,
            conditions: Vec::new(),
        }
    }
}

/// Applies `desired` to `status` as of `now`.
pub fn apply_status(status: &mut WorkspaceStatus, desired: &CurrentStatus, now: DateTime<Utc>) {
    status.phase = Some(desired.phase);
    let now = Time(now);

    for kind in &desired.conditions {
        let stale = status
            .conditions
            .iter_mut()
            .find(|c| c.kind == *kind && c.last_transition_time < now);
        match stale {
            Some(condition) => {
                condition.last_transition_time = now.clone();
                condition.status = ConditionStatus::True;
            }
            None => status.conditions.push(WorkspaceCondition {
                kind: *kind,
                status: ConditionStatus::True,
                last_transition_time: now.clone(),
            }),
        }
    }

    // anything not touched above is no longer asserted
    for condition in &mut status.conditions {
        if condition.last_transition_time < now {
            condition.last_transition_time = now.clone();
            condition.status = ConditionStatus::Unknown;
        }
    }

    status
        .conditions
        .sort_by(|a, b| b.kind.as_str().cmp(a.kind.as_str()));
}

/// Applies `desired` to the workspace and persists its status.
///
/// `pending` is what the reconcile pass produced so far. It is returned unchanged unless
/// it is `Ok` and the status write fails, in which case the write error is returned.
pub async fn update_workspace_status<T>(
    writer: &impl StatusWriter,
    workspace: &mut Workspace,
    desired: &CurrentStatus,
    clock: &dyn Clock,
    pending: Result<T>,
) -> Result<T> {
    let status = workspace.status.get_or_insert_with(Default::default);
    apply_status(status, desired, clock.now());
    let patch = json!({ "status": status });

    let name = workspace.metadata.name.clone().unwrap_or_default();
    match writer.patch_status(&name, patch).await {
        Ok(()) => {
            info!(workspace = %name, phase = ?desired.phase, "updated workspace status");
            pending
        }
        Err(e) => {
            warn!(workspace = %name, error = %e, "error updating workspace status");
            match pending {
                Ok(_) => Err(WorkspaceError::Persistence(e)),
                Err(earlier) => Err(earlier),
            }
        }
    }
}
