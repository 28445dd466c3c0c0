//! Validating admission for `pods/exec`.
//!
//! Workspace pods may only be exec'd into by the user that created the workspace. Pods
//! without the workspace id label are none of our business and are always allowed.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, DynamicObject},
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    Client,
};
use tracing::{debug, error, info};

use crate::crd::{WORKSPACE_CREATOR_ANNOTATION, WORKSPACE_ID_LABEL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecDecision {
    Allowed(String),
    Denied(String),
    /// The decision could not be made; `code` is an http status.
    Errored { code: u16, message: String },
}

/// Decides whether `requester` (a user uid) may exec into `pod`.
pub fn decide(pod: &Pod, requester: Option<&str>) -> ExecDecision {
    let is_workspace_pod = pod
        .metadata
        .labels
        .as_ref()
        .map_or(false, |labels| labels.contains_key(WORKSPACE_ID_LABEL));
    if !is_workspace_pod {
        return ExecDecision::Allowed("not a workspace pod".to_string());
    }

    let creator = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(WORKSPACE_CREATOR_ANNOTATION));
    match creator {
        None => ExecDecision::Denied("workspace pod carries no creator information".to_string()),
        Some(creator) if Some(creator.as_str()) != requester => ExecDecision::Denied(
            "only the workspace creator may exec into workspace pods".to_string(),
        ),
        Some(_) => ExecDecision::Allowed("requester is the workspace creator".to_string()),
    }
}

pub async fn authorize_exec(
    pods: &Api<Pod>,
    pod_name: &str,
    requester: Option<&str>,
) -> ExecDecision {
    decide_fetched(pods.get(pod_name).await, pod_name, requester)
}

/// Like [`decide`], but for a pod lookup that may have failed.
fn decide_fetched(
    fetched: Result<Pod, kube::Error>,
    pod_name: &str,
    requester: Option<&str>,
) -> ExecDecision {
    match fetched {
        Ok(pod) => decide(&pod, requester),
        Err(e) => {
            error!(pod = %pod_name, error = %e, "failed to fetch pod for exec admission");
            ExecDecision::Errored {
                code: 500,
                message: e.to_string(),
            }
        }
    }
}

impl ExecDecision {
    pub fn into_response(self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let response = AdmissionResponse::from(request);
        match self {
            ExecDecision::Allowed(reason) => {
                let mut response = response;
                response.result.message = reason;
                response
            }
            ExecDecision::Denied(reason) => response.deny(reason),
            ExecDecision::Errored { code, message } => {
                let mut response = response.deny(message);
                response.result.code = code;
                response
            }
        }
    }
}

#[derive(Clone)]
pub struct WebhookState {
    pub kube: Client,
}

pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate/exec", post(validate_exec_handler))
        .with_state(state)
}

async fn validate_exec_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let namespace = request.namespace.clone().unwrap_or_default();
    let requester = request.user_info.uid.as_deref();
    let pods: Api<Pod> = Api::namespaced(state.kube.clone(), &namespace);
    let decision = authorize_exec(&pods, &request.name, requester).await;
    match &decision {
        ExecDecision::Allowed(reason) => {
            debug!(pod = %request.name, namespace = %namespace, %reason, "exec allowed")
        }
        ExecDecision::Denied(reason) => {
            info!(pod = %request.name, namespace = %namespace, %reason, "exec denied")
        }
        ExecDecision::Errored { .. } => {}
    }
    Json(decision.into_response(&request).into_review())
}
