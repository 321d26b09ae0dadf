//! eks-operator-rs Entry Point
//!
//! Starts the Kubernetes controller and optional REST API server.

use std::sync::Arc;

use clap::Parser;
use eks_operator_rs::{controller, Error};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Kubernetes operator for AWS EKS cluster configs.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to a kubeconfig file. Defaults to in-cluster config, falling
    /// back to `~/.kube/config` when not running inside a pod.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let otel_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();

    if otel_enabled {
        let otel_layer = eks_operator_rs::telemetry::init_telemetry(&registry);
        registry.with(otel_layer).init();
        info!("OpenTelemetry tracing initialized");
    } else {
        registry.init();
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }

    info!(
        "Starting eks-operator-rs v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = match cli.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(&path)
                .map_err(|e| Error::ConfigError(format!("reading kubeconfig {path}: {e}")))?;
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                .await
                .map_err(|e| Error::ConfigError(format!("building config from {path}: {e}")))?;
            kube::Client::try_from(config).map_err(Error::KubeError)?
        }
        None => kube::Client::try_default().await.map_err(Error::KubeError)?,
    };

    info!("Connected to Kubernetes cluster");

    let state = Arc::new(controller::ControllerState {
        client: client.clone(),
    });

    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = eks_operator_rs::rest_api::run_server(api_state).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    let result = controller::run_controller(state).await;

    eks_operator_rs::telemetry::shutdown_telemetry();

    result
}
