use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    runtime::{controller::Controller, watcher},
    Api, Client, CustomResourceExt,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use workspace_operator::{
    config::ControllerConfig,
    controller::{error_policy, reconcile, Context},
    crd::{Workspace, WorkspaceRouting},
    provision::DefaultProvisioners,
    status::SystemClock,
};

#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Output the yaml crds (custom resource descriptions) for this operator then exit.
    #[clap(long)]
    crd: bool,

    #[clap(flatten)]
    config: ControllerConfig,
}

/// Watched api for `K`, limited to the configured namespace when there is one.
fn api<K>(client: &Client, config: &ControllerConfig) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match &config.namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace.as_str()),
        None => Api::all(client.clone()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = Opts::parse();
    if opts.crd {
        serde_yaml::to_writer(std::io::stdout(), &Workspace::crd())?;
        println!("---");
        serde_yaml::to_writer(std::io::stdout(), &WorkspaceRouting::crd())?;
        return Ok(());
    }

    let client = Client::try_default().await?;
    let config = opts.config;
    let workspaces = api::<Workspace>(&client, &config);
    let deployments = api::<Deployment>(&client, &config);
    let routings = api::<WorkspaceRouting>(&client, &config);
    info!(namespace = ?config.namespace, "starting workspace controller");

    let context = Arc::new(Context {
        client,
        provisioners: DefaultProvisioners::new(&config),
        config,
        clock: Arc::new(SystemClock),
    });
    Controller::new(workspaces, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .owns(routings, watcher::Config::default())
        .run(reconcile, error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok((workspace, _)) => info!(name = %workspace.name, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        })
        .await;
    Ok(())
}
