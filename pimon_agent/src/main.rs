//! pimon_agent: streams host metrics and app logs to browser dashboards.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use pimon_agent::config::{parse_args, AgentConfig, USAGE};
use pimon_agent::metrics::SysinfoSource;
use pimon_agent::relay::LogRelay;
use pimon_agent::sampler::MetricsTicker;
use pimon_agent::server::router;
use pimon_agent::{AppState, EventBus};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = parse_args(env::args()).with_context(|| USAGE.to_string())?;
    if parsed.help {
        eprintln!("{USAGE}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::resolve(parsed, |key| env::var(key).ok())?;

    let bus = Arc::new(EventBus::with_buffer(config.subscriber_buffer));
    let relay = LogRelay::spawn(bus.clone(), config.app.clone());
    let mut state = AppState::new(bus.clone(), relay.clone());
    state.keep_alive = config.keep_alive;
    state.static_dir = config.static_dir.clone();

    let ticker = MetricsTicker::new(bus.clone(), Arc::new(SysinfoSource::new()))
        .with_period(config.interval)
        .with_timeout(config.snapshot_timeout)
        .with_cache(state.last_json.clone())
        .spawn();

    if relay.command().is_some() {
        relay.restart().await;
    }

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("pimon agent running at http://{}", listener.local_addr()?);

    let shutdown_bus = bus.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutting down");
            ticker.abort();
            // Ends open event streams so the server can drain.
            shutdown_bus.close();
        })
        .await?;

    relay.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
