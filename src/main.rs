use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use matchserver::cluster::{ClusterApi, InMemoryCluster, KubeCluster};
use matchserver::config::{ClusterBackend, Config};
use matchserver::orchestrator::provisioner::{ProvisionSettings, Provisioner, StaticNodeAddress};
use matchserver::orchestrator::Orchestrator;
use matchserver::state::AppState;

/// Command-line overrides; everything else comes from the environment.
#[derive(Parser)]
#[command(version, about = "Pairs players and runs a game pod per match")]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Control plane backend: kubernetes or memory (overrides CLUSTER_BACKEND)
    #[arg(long)]
    cluster: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matchserver=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref backend) = cli.cluster {
        config.backend = ClusterBackend::parse(backend);
    }
    print_banner(&config);

    let cluster: Arc<dyn ClusterApi> = match config.backend {
        ClusterBackend::Kubernetes => Arc::new(
            KubeCluster::from_config(&config.kube).expect("failed to build Kubernetes client"),
        ),
        ClusterBackend::Memory => {
            tracing::warn!("using in-memory cluster; game pods are simulated");
            Arc::new(InMemoryCluster::new())
        }
    };

    let provisioner = Provisioner::new(
        cluster,
        Arc::new(StaticNodeAddress(config.node_host.clone())),
        ProvisionSettings::from(&config.game),
    );

    let state = AppState {
        orchestrator: Orchestrator::new(provisioner),
        cluster_backend: config.backend.clone(),
    };

    let app = matchserver::routes::router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind");

    let actual_port = listener
        .local_addr()
        .expect("failed to get local address")
        .port();
    eprintln!("  \x1b[32m→ listening on 0.0.0.0:{actual_port}\x1b[0m");
    eprintln!();

    axum::serve(listener, app).await.expect("server error");
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");

    eprintln!();
    eprintln!("  \x1b[1;36mmatchserver\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mport\x1b[0m         {}", config.port);
    eprintln!("  \x1b[2mcluster\x1b[0m      {}", config.backend.as_str());
    if config.backend == ClusterBackend::Kubernetes {
        eprintln!("  \x1b[2mapi server\x1b[0m   {}", config.kube.api_url);
        eprintln!("  \x1b[2mnamespace\x1b[0m    {}", config.kube.namespace);
        if let Some(ref ca) = config.kube.ca_cert {
            eprintln!("  \x1b[2mca bundle\x1b[0m    {}", ca.display());
        }
    }
    eprintln!("  \x1b[2mgame image\x1b[0m   {}", config.game.image);
    eprintln!("  \x1b[2mnode host\x1b[0m    {}", config.node_host);
    eprintln!(
        "  \x1b[2mready wait\x1b[0m   {}s",
        config.game.ready_timeout_secs
    );
    eprintln!();
}
