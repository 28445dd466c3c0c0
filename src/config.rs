use std::{fmt::Debug, fmt::Formatter, str::FromStr};

use clap::Parser;

pub const DEFAULT_CLAIM_NAME: &str = "claim-workspace";
pub const DEFAULT_PRECREATE_IMAGE: &str = "registry.access.redhat.com/ubi8/ubi-minimal";
pub const DEFAULT_PLUGIN_BROKER_IMAGE: &str = "quay.io/eclipse/che-plugin-broker:v3.4.0";

#[derive(Parser, Debug, Clone)]
pub struct ControllerConfig {
    /// Domain under which the exposure component creates ingresses/routes for workspace endpoints.
    #[clap(long, env = "WORKSPACE_INGRESS_DOMAIN", default_value = "")]
    pub ingress_global_domain: String,

    /// Service account used by workspace pods. Token automount is disabled when unset.
    #[clap(long, env = "WORKSPACE_SERVICE_ACCOUNT")]
    pub service_account: Option<String>,

    /// Name of the per-namespace persistent volume claim shared by all workspaces.
    #[clap(long, env = "WORKSPACE_PVC_NAME", default_value = DEFAULT_CLAIM_NAME)]
    pub claim_name: String,

    /// Image used to create per-workspace directories on the shared claim.
    #[clap(long, env = "WORKSPACE_PRECREATE_IMAGE", default_value = DEFAULT_PRECREATE_IMAGE)]
    pub precreate_image: String,

    /// Image of the broker that resolves editor and plugin components.
    #[clap(long, env = "WORKSPACE_PLUGIN_BROKER_IMAGE", default_value = DEFAULT_PLUGIN_BROKER_IMAGE)]
    pub plugin_broker_image: String,

    /// Externally reachable URL of the workspace API, handed to workspace containers.
    #[clap(long, env = "WORKSPACE_EXTERNAL_API_URL")]
    pub external_api_url: Option<String>,

    /// Only watch workspaces in this namespace. Watches all namespaces when unset.
    #[clap(short, long, env = "WORKSPACE_NAMESPACE")]
    pub namespace: Option<KubeNamespace>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ingress_global_domain: String::new(),
            service_account: None,
            claim_name: DEFAULT_CLAIM_NAME.to_string(),
            precreate_image: DEFAULT_PRECREATE_IMAGE.to_string(),
            plugin_broker_image: DEFAULT_PLUGIN_BROKER_IMAGE.to_string(),
            external_api_url: None,
            namespace: None,
        }
    }
}

/// Valid custom namespaces:
///   must not be empty, use "default" instead
///   contain at most 63 characters
///   contain only lowercase alphanumeric characters or '-'
///   start with an alphanumeric character
///   end with an alphanumeric character
///   should not start with 'kube-'
#[derive(Clone, PartialEq, Eq)]
pub struct KubeNamespace(String);

impl KubeNamespace {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for KubeNamespace {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        anyhow::ensure!(!s.is_empty(), "namespace cannot be an empty string");
        anyhow::ensure!(s.len() <= 63, "namespace must be <= 63 characters");
        anyhow::ensure!(
            s.chars().all(|c| alnum(c) || c == '-'),
            "namespace must contain only lowercase alphanumeric characters or '-'"
        );
        anyhow::ensure!(
            s.starts_with(alnum),
            "namespace must start with an alphanumeric character"
        );
        anyhow::ensure!(
            s.ends_with(alnum),
            "namespace must end with an alphanumeric character"
        );
        anyhow::ensure!(
            !s.starts_with("kube-"),
            "namespace should not start with 'kube-'"
        );
        Ok(Self(s.to_string()))
    }
}

impl Debug for KubeNamespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
