//! Klusterlet Works controller - hub-side lifecycle of klusterlet ManifestWorks

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use klusterlet_works::bundle::import_secret_name;
use klusterlet_works::config::ControllerConfig;
use klusterlet_works::controller::{error_policy, reconcile, Context};
use klusterlet_works::crd::{ManagedCluster, ManifestWork};

/// Klusterlet Works - creates and retires the klusterlet ManifestWorks of managed clusters
#[derive(Parser, Debug)]
#[command(name = "klusterlet-works", version, about, long_about = None)]
struct Cli {
    /// Print the ManifestWork CRD and exit
    #[arg(long)]
    crd: bool,

    /// Log as JSON lines
    #[arg(long, env = "KLUSTERLET_WORKS_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches ManagedClusters, their ManifestWorks and import secrets.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Seconds between addon convergence checks during teardown
    #[arg(long, env = "KLUSTERLET_WORKS_CONVERGENCE_DELAY_SECS", default_value = "10")]
    convergence_delay_secs: u64,

    /// Seconds before retrying a failed reconcile
    #[arg(long, env = "KLUSTERLET_WORKS_ERROR_REQUEUE_SECS", default_value = "5")]
    error_requeue_secs: u64,

    /// Server-side watch timeout in seconds
    #[arg(long, env = "KLUSTERLET_WORKS_WATCH_TIMEOUT_SECS", default_value = "25")]
    watch_timeout_secs: u64,
}

impl ControllerArgs {
    fn config(&self) -> ControllerConfig {
        ControllerConfig::from_secs(
            self.convergence_delay_secs,
            self.error_requeue_secs,
            self.watch_timeout_secs,
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    if cli.crd {
        let crd = serde_yaml::to_string(&ManifestWork::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args.config()).await,
        None => run_controller(ControllerConfig::default()).await,
    }
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!(?config, "klusterlet works controller starting");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let clusters: Api<ManagedCluster> = Api::all(client.clone());
    let works: Api<ManifestWork> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());

    let ctx = Arc::new(Context::builder(client).config(config).build());
    let watcher_config = WatcherConfig::default().timeout(config.watch_timeout_secs());

    // works and import secrets live in the namespace named after their cluster
    Controller::new(clusters, watcher_config.clone())
        .watches(works, watcher_config.clone(), |work: ManifestWork| {
            work.namespace()
                .map(|ns| ObjectRef::<ManagedCluster>::new(&ns))
        })
        .watches(secrets, watcher_config, |secret: Secret| {
            let ns = secret.namespace()?;
            (secret.name_any() == import_secret_name(&ns))
                .then(|| ObjectRef::<ManagedCluster>::new(&ns))
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "ManagedCluster reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "ManagedCluster reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("klusterlet works controller shutting down");
    Ok(())
}
