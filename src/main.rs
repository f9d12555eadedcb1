use anyhow::Context;
use clap::Parser;
use docqa::{api, auth::BearerAuth, config, logging, processing::AnswerService};
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;

/// Answer questions about a document over HTTP.
#[derive(Debug, Parser)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Port to listen on; overrides `SERVER_PORT`.
    #[arg(long)]
    port: Option<u16>,
    /// Dotenv file to load instead of `.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::init_config(cli.env_file.as_deref()).context("Invalid configuration")?;
    logging::init_tracing();
    config.log_summary();

    let service = AnswerService::new(config).context("Failed to initialize answer service")?;
    let max_document_bytes = usize::try_from(config.document_max_bytes).unwrap_or(usize::MAX);
    let app = api::create_router(
        Arc::new(service),
        BearerAuth::new(&config.auth_token),
        max_document_bytes,
    );

    let (listener, port) = bind_listener(cli.port.or(config.server_port))
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn bind_listener(requested: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = requested {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8000..=8099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8000-8099",
    ))
}
