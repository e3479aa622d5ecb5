//! Accept loop for the HTTP listener.
//!
//! Every connection runs in a task owned by a [`JoinSet`], so a shutdown that
//! overruns its grace period can abort them all before the caller moves on
//! to closing the resource layer.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How the connections ended once the listener stopped accepting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drain {
    /// Every in-flight connection finished within the grace period.
    Complete,
    /// The grace period ran out; this many connections were aborted.
    Abandoned(usize),
}

/// Serves `router` on `listener` until a grace period arrives on `shutdown`.
///
/// The listener is dropped as soon as shutdown is requested, so new
/// connections are refused while the existing ones drain.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: oneshot::Receiver<Duration>,
) -> Drain {
    let (drain_tx, drain_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    let grace = loop {
        tokio::select! {
            // A dropped sender means nobody can wait for us; stop at once.
            grace = &mut shutdown => break grace.unwrap_or(Duration::ZERO),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(stream, peer, router.clone(), drain_rx.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "accept_failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    drop(listener);
    let _ = drain_tx.send(true);
    if !connections.is_empty() {
        info!(in_flight = connections.len(), ?grace, "draining_connections");
    }

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    match drained {
        Ok(()) => Drain::Complete,
        Err(_) => {
            let abandoned = connections.len();
            // Waits until every aborted task (and its socket) is dropped.
            connections.shutdown().await;
            Drain::Abandoned(abandoned)
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    mut drain: watch::Receiver<bool>,
) {
    let service = TowerToHyperService::new(router);
    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(%peer, error = %e, "connection_error");
                }
                break;
            }
            _ = drain.wait_for(|d| *d), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}
