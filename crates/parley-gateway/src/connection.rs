//! TCP accept loop and per-connection lifecycle.
//!
//! Each connection gets a reader loop on its own task plus a dedicated
//! writer task fed by an unbounded channel, so slow peers never block the
//! handlers that fan events out.

use std::net::SocketAddr;

use anyhow::Result;
use socket2::SockRef;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use parley_types::Envelope;

use crate::router::{ConnState, Router};

/// Accept connections forever, one task per connection. A failed connection
/// only takes down its own task.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(%addr, "connection accepted");
                let router = router.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, router).await {
                        warn!(%addr, "connection error: {e:#}");
                    }
                });
            }
            Err(e) => {
                error!("accept failed: {e}");
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, router: Router) -> Result<()> {
    SockRef::from(&stream).set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let writer_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if writer
                .write_all(envelope.to_line().as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut conn = ConnState::new(tx);
    let mut lines = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        match lines.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                router.handle_line(&mut conn, line).await;
            }
            Err(e) => {
                debug!(%addr, "read error: {e}");
                break;
            }
        }
    }

    writer_task.abort();
    match conn.user() {
        Some(user) => {
            router.registry().unbind(user.id, conn.conn_id).await;
            info!(%addr, user_id = user.id, "disconnected");
        }
        None => debug!(%addr, "disconnected before login"),
    }
    Ok(())
}
