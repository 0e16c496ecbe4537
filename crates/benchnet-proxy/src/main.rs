//! Benchnet proxy binary.
//!
//! One instance relays the measurement stream (11100 -> 11099); a second on
//! the log ports (11098 -> 11097) carries the log stream.

use clap::Parser;
use tokio::sync::broadcast;

use benchnet_protocol::{PROXY_EGRESS_PORT, PROXY_INGRESS_PORT};
use benchnet_proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "benchnet-proxy", about = "Benchnet data-plane proxy")]
struct Cli {
    /// Port publishers send to
    #[arg(long, default_value_t = PROXY_INGRESS_PORT)]
    ingress_port: u16,

    /// Port subscribers receive from
    #[arg(long, default_value_t = PROXY_EGRESS_PORT)]
    egress_port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "benchnet_proxy=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let server = match ProxyServer::bind(cli.ingress_port, cli.egress_port).await {
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
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(%error, "fatal runtime error");
                    std::process::exit(2);
                }
                Err(join_error) => {
                    tracing::error!(%join_error, "proxy task failed");
                    std::process::exit(2);
                }
            }
        }
    }
}
