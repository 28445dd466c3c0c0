use std::collections::BTreeMap;

use kube::core::ObjectMeta;

use crate::{
    component::ComponentInstanceStatus,
    crd::{
        Endpoint, ServiceDescription, WorkspaceRouting, WorkspaceRoutingSpec,
        PUBLIC_ENDPOINT_ATTRIBUTE,
    },
    deployment::pod_selector,
    properties::WorkspaceProperties,
};

/// Builds the routing descriptor for the exposure component.
///
/// Endpoints are grouped under the container declaring their port. Services are keyed by
/// container name across all components, so when two components declare a container
/// with the same name the later one's routing replaces the earlier one's.
pub fn build_workspace_routing(
    props: &WorkspaceProperties,
    ingress_global_domain: &str,
    statuses: &[ComponentInstanceStatus],
) -> WorkspaceRouting {
    let mut services = BTreeMap::new();
    for status in statuses {
        for (container_name, container) in &status.containers {
            let endpoints: Vec<Endpoint> = container
                .ports
                .iter()
                .flat_map(|port| {
                    status
                        .endpoints
                        .iter()
                        .filter(move |endpoint| endpoint.port == i64::from(*port))
                })
                .map(|endpoint| {
                    let mut endpoint = endpoint.clone();
                    // public is the default
                    endpoint
                        .attributes
                        .entry(PUBLIC_ENDPOINT_ATTRIBUTE.to_string())
                        .or_insert_with(|| "true".to_string());
                    endpoint
                })
                .collect();
            if !endpoints.is_empty() {
                services.insert(
                    container_name.clone(),
                    ServiceDescription {
                        service_name: props.service_name(container_name),
                        endpoints,
                    },
                );
            }
        }
    }
    routing(props, ingress_global_domain, services)
}

/// Descriptor for a workspace that is not running: nothing is exposed.
pub fn stopped_workspace_routing(
    props: &WorkspaceProperties,
    ingress_global_domain: &str,
) -> WorkspaceRouting {
    let mut ret = routing(props, ingress_global_domain, BTreeMap::new());
    ret.spec.exposed = false;
    ret
}

fn routing(
    props: &WorkspaceProperties,
    ingress_global_domain: &str,
    services: BTreeMap<String, ServiceDescription>,
) -> WorkspaceRouting {
    WorkspaceRouting {
        metadata: ObjectMeta {
            name: Some(props.workspace_id.clone()),
            namespace: Some(props.namespace.clone()),
            labels: Some(pod_selector(props)),
            ..Default::default()
        },
        spec: WorkspaceRoutingSpec {
            exposed: props.started,
            routing_class: props.routing_class.clone(),
            ingress_global_domain: ingress_global_domain.to_string(),
            workspace_pod_selector: pod_selector(props),
            services,
        },
        status: None,
    }
}
