use clap::Parser;
use discovery_server::config::{Cli, ServerOptions, SERVER_VERSION};
use discovery_server::errors::AppResult;
use discovery_server::{enable_default_tracing, App};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    enable_default_tracing();

    info!("discovery-server {}", SERVER_VERSION);

    let listen_addr = cli.listen_addr.clone();
    let options = ServerOptions::from(cli);
    if options.discogs_token.is_none() {
        info!("no Discogs token configured; Discogs enrichment will degrade gracefully");
    }
    if options.lastfm_api_key.is_none() {
        info!("no last.fm key configured; last.fm enrichment will degrade gracefully");
    }

    let app = App::new(options).await?;

    app.refresher.start()?;

    let addr = listen_addr.parse().expect("invalid listen address");
    info!(%addr, "server starting");
    let server = axum::Server::bind(&addr)
        .serve(app.router.clone().into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        warn!(error = %err, "server exited with an error");
    }

    app.refresher.stop().await?;
    info!("server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
