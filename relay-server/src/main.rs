use std::{net::SocketAddr, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use eyre::Context as _;
use relay_gateway::{
    RelayGatewayBuilder, config::RelayGatewayConfig, message_log::NatsMessageLog,
};
use tokio_util::sync::CancellationToken;

/// The configuration for the relay server.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`.
#[derive(Parser, Debug)]
struct RelayServerConfig {
    /// Port the HTTP server binds to, on all interfaces.
    #[clap(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Max wait time for in-flight sessions during shutdown.
    #[clap(
        long,
        env = "RELAY_SHUTDOWN_GRACE",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    shutdown_grace: Duration,

    /// The gateway config
    #[clap(flatten)]
    gateway: RelayGatewayConfig,
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_server=debug,relay_gateway=debug,info".into()),
        )
        .init();
    relay_gateway::metrics::describe_metrics();

    let config = RelayServerConfig::parse();
    match start_server(config).await {
        Ok(()) => {
            tracing::info!("good night!");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            // we don't want to double print the error therefore we just return FAILURE
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn start_server(config: RelayServerConfig) -> eyre::Result<()> {
    tracing::info!("starting relay gateway with config: {config:#?}");

    let log = NatsMessageLog::connect(&config.gateway.nats_url)
        .await
        .context("while connecting to the message log")?;
    let router = RelayGatewayBuilder::new(config.gateway, Arc::new(log)).build();

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("while binding the listener")?;
    tracing::info!("listening on {bind_addr}...");

    let cancellation_token = CancellationToken::new();
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            shutdown_signal().await;
            cancellation_token.cancel();
        }
    });
    let server = tokio::spawn({
        let axum_cancel_token = cancellation_token.clone();
        async move {
            let axum_shutdown_signal = axum_cancel_token.clone();
            let axum_result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { axum_shutdown_signal.cancelled().await })
                .await;
            tracing::info!("axum server shutdown");
            if let Err(err) = axum_result {
                tracing::error!("got error from axum: {err:?}");
            }
            // we cancel the token in case axum encountered an error to shutdown the service
            axum_cancel_token.cancel();
        }
    });

    cancellation_token.cancelled().await;
    tracing::info!(
        "waiting for open sessions (max wait time {:?})..",
        config.shutdown_grace
    );
    match tokio::time::timeout(config.shutdown_grace, server).await {
        Ok(_) => tracing::info!("successfully finished shutdown in time"),
        Err(_) => tracing::warn!("could not finish shutdown in time"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("can install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("can install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        () = ctrl_c => {},
        _ = terminate => {},
    }
}
