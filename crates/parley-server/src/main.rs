use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use parley_gateway::{Router, SessionRegistry};
use parley_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "5555".into())
        .parse()?;

    // Shared state
    let store = Store::new();
    let registry = SessionRegistry::new();
    let router = Router::new(store, registry);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Parley server listening on {}", addr);

    parley_gateway::serve(listener, router).await
}
