//! Benchnet Coordinator -- control-plane message router.
//!
//! Usage:
//!   benchnet-coordinator                                # defaults
//!   benchnet-coordinator --port 12300 --namespace N1
//!   benchnet-coordinator --coordinators N2=pc2.lab:12300,N3=pc3.lab

use clap::Parser;
use tokio::sync::broadcast;

use benchnet_coordinator::config::{CoordinatorConfig, PeerEntry};
use benchnet_coordinator::{CoordinatorError, CoordinatorServer};
use benchnet_protocol::COORDINATOR_PORT;

#[derive(Parser)]
#[command(name = "benchnet-coordinator", about = "Benchnet control-plane coordinator")]
struct Cli {
    /// Port of the routed control socket
    #[arg(long, default_value_t = COORDINATOR_PORT)]
    port: u16,

    /// Namespace hosted by this Coordinator (default: host name)
    #[arg(long)]
    namespace: Option<String>,

    /// Peer Coordinators to sign in at, as namespace=host:port,...
    #[arg(long, value_delimiter = ',')]
    coordinators: Vec<String>,

    /// Host name advertised to peers (default: host name)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "benchnet_coordinator=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = CoordinatorConfig::default();
    config.port = cli.port;
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    for raw in &cli.coordinators {
        match PeerEntry::parse(raw) {
            Ok(entry) => config.peers.push(entry),
            Err(error) => {
                eprintln!("invalid --coordinators entry: {error}");
                std::process::exit(2);
            }
        }
    }

    let server = match CoordinatorServer::bind(config).await {
        Ok(server) => server,
        Err(error) => {
            tracing::error!(%error, "startup failed");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut run = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(server.run(shutdown))
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if signal.is_err() {
                tracing::error!("signal handler failed");
                std::process::exit(2);
            }
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(());
            let _ = (&mut run).await;
        }
        finished = &mut run => {
            match finished {
                Ok(Ok(())) => {} // shut down via RPC
                Ok(Err(error @ CoordinatorError::Bind { .. })) => {
                    tracing::error!(%error, "startup failed");
                    std::process::exit(1);
                }
                Ok(Err(error)) => {
                    tracing::error!(%error, "fatal runtime error");
                    std::process::exit(2);
                }
                Err(join_error) => {
                    tracing::error!(%join_error, "router task failed");
                    std::process::exit(2);
                }
            }
        }
    }
}
