use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Pod template entries whose names must be unique within the workspace deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Container,
    InitContainer,
    Volume,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Container => "container",
            ResourceKind::InitContainer => "init container",
            ResourceKind::Volume => "volume",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("workspace uid {uid:?} is not a valid uuid: {source}")]
    InvalidIdentifier {
        uid: String,
        #[source]
        source: uuid::Error,
    },

    #[error("duplicate {kind} in the workspace definition: {name}")]
    DuplicateResourceName { kind: ResourceKind, name: String },

    #[error("no provisioner output for component {component}")]
    MissingProvisionerOutput { component: String },

    #[error("failed to provision component {component}: {source}")]
    Provisioner {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist workspace status: {0}")]
    Persistence(#[source] kube::Error),

    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;
