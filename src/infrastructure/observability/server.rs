//! Scrape endpoint: `GET /metrics` renders whatever the configured gatherer returns.
//!
//! Families sharing a name are merged before rendering, so the output stays a valid
//! exposition even when several sources report the same family.

use crate::domain::ports::Gatherer;
use crate::infrastructure::core::Shutdown;
use crate::infrastructure::exposition::{TEXT_CONTENT_TYPE, merge_families, render_text};
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub const METRICS_PATH: &str = "/metrics";

/// Bind `addr` and serve until shutdown
pub async fn serve_metrics(
    addr: SocketAddr,
    gatherer: Arc<dyn Gatherer>,
    shutdown: Shutdown,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on {}", addr))?;
    serve_on(listener, gatherer, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_on(
    listener: TcpListener,
    gatherer: Arc<dyn Gatherer>,
    mut shutdown: Shutdown,
) -> Result<()> {
    info!(
        "Metrics endpoint listening on http://{}{}",
        listener.local_addr()?,
        METRICS_PATH
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Metrics endpoint: connection from {}", peer);
                    let gatherer = gatherer.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, gatherer).await {
                            warn!("Metrics connection error: {}", e);
                        }
                    });
                }
                Err(e) => warn!("Metrics accept error: {}", e),
            }
        }
    }

    info!("Metrics endpoint stopped");
    Ok(())
}

async fn serve_connection(stream: TcpStream, gatherer: Arc<dyn Gatherer>) -> Result<(), hyper::Error> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let gatherer = gatherer.clone();
        async move { Ok::<_, hyper::Error>(handle_request(req, gatherer).await) }
    });
    http1::Builder::new().serve_connection(io, service).await
}

async fn handle_request(req: Request<Incoming>, gatherer: Arc<dyn Gatherer>) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != METRICS_PATH {
        return plain(StatusCode::NOT_FOUND, "not found\n".to_string());
    }

    match gatherer.gather().await {
        Ok(families) => {
            let body = render_text(&merge_families(families));
            Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, TEXT_CONTENT_TYPE)
                .body(Full::new(Bytes::from(body)))
                .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
        }
        Err(e) => {
            warn!("Metrics endpoint: gather failed: {}", e);
            plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error gathering metrics: {}\n", e),
            )
        }
    }
}

fn plain(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
