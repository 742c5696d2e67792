//! Agent HTTP daemon: submit runs, observe progress, fetch reports.

mod routes;
mod state;
mod ws;

use std::net::SocketAddr;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use mender::config::AgentConfig;
use mender::logging;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "mender-server", version, about = "HTTP daemon for the mender agent")]
struct Args {
    /// Address to bind the server to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on (overrides the PORT env var).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AgentConfig::from_env()?;
    logging::init_with_file(&config.log_dir)?;

    let port = args.port.or_else(read_port_env).unwrap_or(3000);
    let cors = cors_layer();
    let state = AppState::new(config);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{port}", args.bind).parse()?;
    info!(addr = %addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn read_port_env() -> Option<u16> {
    std::env::var("PORT").ok()?.trim().parse().ok()
}

/// CORS scoped to `FRONTEND_URL` when set, permissive otherwise.
fn cors_layer() -> CorsLayer {
    match std::env::var("FRONTEND_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|origin| origin.trim().parse::<HeaderValue>().ok())
    {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}
