//! Prometheus `/metrics` endpoint.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

/// Serve `registry` on `0.0.0.0:port` until the task is dropped.
pub async fn start_metrics_server(registry: Arc<Registry>, port: u16) -> std::io::Result<()> {
    use hyper::{server::conn::http1, service::service_fn};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let registry = Arc::clone(&registry);

        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(Arc::clone(&registry), req));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server error: {:?}", err);
            }
        });
    }
}

async fn metrics_handler(
    registry: Arc<Registry>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() != "/metrics" {
        let mut response = Response::new(Full::new(Bytes::from_static(b"not found")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Ok(response);
    }
    Ok(Response::new(Full::new(Bytes::from(render(&registry)))))
}

/// Text exposition of everything in `registry`.
pub fn render(registry: &Registry) -> Vec<u8> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    buffer
}
