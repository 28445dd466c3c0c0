use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use kube::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;
use workspace_operator::exec_gate::{webhook_router, WebhookState};

const DEFAULT_CERT: &str = "/tmp/k8s-webhook-server/serving-certs/tls.crt";
const DEFAULT_KEY: &str = "/tmp/k8s-webhook-server/serving-certs/tls.key";

#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Address the admission endpoint listens on.
    #[clap(long, env = "WORKSPACE_WEBHOOK_ADDR", default_value = "0.0.0.0:8443")]
    addr: SocketAddr,

    /// PEM encoded serving certificate.
    #[clap(long, env = "WORKSPACE_WEBHOOK_CERT", default_value = DEFAULT_CERT)]
    tls_cert: PathBuf,

    /// PEM encoded private key of the serving certificate.
    #[clap(long, env = "WORKSPACE_WEBHOOK_KEY", default_value = DEFAULT_KEY)]
    tls_key: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = Opts::parse();
    let client = Client::try_default().await?;
    let tls_config = RustlsConfig::from_pem_file(&opts.tls_cert, &opts.tls_key)
        .await
        .with_context(|| format!("loading tls config from {}", opts.tls_cert.display()))?;

    let app = webhook_router(Arc::new(WebhookState { kube: client }));
    info!(addr = %opts.addr, "serving exec admission webhook");
    axum_server::bind_rustls(opts.addr, tls_config)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
