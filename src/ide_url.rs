use std::collections::BTreeMap;

use serde_json::json;
use tracing::info;

use crate::{
    crd::{ExposedEndpoint, Workspace, TYPE_ENDPOINT_ATTRIBUTE},
    error::{Result, WorkspaceError},
    status::StatusWriter,
};

const IDE_ENDPOINT_TYPE: &str = "ide";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeUrlSync {
    AlreadyInSync,
    Changed,
}

/// Url of the first endpoint typed `ide`.
///
/// Groups are visited in key order. Which url wins when several endpoints are typed
/// `ide` is not part of the contract.
pub fn ide_url(exposed: &BTreeMap<String, Vec<ExposedEndpoint>>) -> Option<String> {
    exposed
        .values()
        .flatten()
        .find(|endpoint| {
            endpoint.attributes.get(TYPE_ENDPOINT_ATTRIBUTE).map(String::as_str)
                == Some(IDE_ENDPOINT_TYPE)
        })
        .map(|endpoint| endpoint.url.clone())
}

/// Publishes the ide url on the workspace status when it differs from the stored one.
pub async fn sync_ide_url(
    writer: &impl StatusWriter,
    workspace: &mut Workspace,
    exposed: &BTreeMap<String, Vec<ExposedEndpoint>>,
) -> Result<IdeUrlSync> {
    let url = ide_url(exposed);
    let status = workspace.status.get_or_insert_with(Default::default);
    if status.ide_url == url {
        return Ok(IdeUrlSync::AlreadyInSync);
    }
    let previous = std::mem::replace(&mut status.ide_url, url.clone());

    let name = workspace.metadata.name.clone().unwrap_or_default();
    info!(workspace = %name, ide_url = ?url, "publishing ide url");
    if let Err(e) = writer
        .patch_status(&name, json!({ "status": { "ideUrl": url } }))
        .await
    {
        // later status writes must not publish a url that was never stored
        if let Some(status) = workspace.status.as_mut() {
            status.ide_url = previous;
        }
        return Err(WorkspaceError::Persistence(e));
    }
    Ok(IdeUrlSync::Changed)
}
