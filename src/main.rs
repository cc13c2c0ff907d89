use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use datahub::features::sources::SourceRegistry;
use datahub::{build_router, AppConfig, AppState};

fn parse_port_from_args() -> Option<u16> {
    parse_port(std::env::args())
}

fn parse_port(mut args: impl Iterator<Item = String>) -> Option<u16> {
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = AppConfig::load()?;
    if let Some(port) = parse_port_from_args() {
        config.port = port;
    }
    info!(
        "Starting datahub server ({:?}, features: {:?})",
        config.environment, config.features
    );

    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .connect_timeout(config.http_connect_timeout)
        .build()?;

    let sources = match config.sources_path.as_deref() {
        Some(path) => match SourceRegistry::load(path).await {
            Ok(registry) => registry,
            Err(e) => {
                warn!("Failed to load api sources: {:#}. Continuing with an empty registry.", e);
                SourceRegistry::empty()
            }
        },
        None => {
            info!("No api source seed configured");
            SourceRegistry::empty()
        }
    };

    let port = config.port;
    let state = Arc::new(AppState::new(config, http_client).with_sources(sources));
    info!("Parsers available: {:?}", state.parsers.available_parsers());

    let app = build_router(state);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("Datahub server listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received, draining connections");
}

#[cfg(test)]
mod tests {
    use super::parse_port;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn port_flag_accepts_both_forms() {
        assert_eq!(parse_port(args(&["datahub", "--port", "8080"])), Some(8080));
        assert_eq!(parse_port(args(&["datahub", "--port=9090"])), Some(9090));
        assert_eq!(parse_port(args(&["datahub", "--port"])), None);
        assert_eq!(parse_port(args(&["datahub", "--port", "x", "--port=7000"])), Some(7000));
    }
}
