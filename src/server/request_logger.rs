use crate::auth::SessionHandle;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, time::Instant};
use tracing::info;

/// Structured request/response logging for `/auth` and `/health`
pub async fn request_response_logger(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    if !(path.starts_with("/auth") || path.starts_with("/health")) {
        return next.run(req).await;
    }

    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let user = req
        .extensions()
        .get::<SessionHandle>()
        .and_then(|handle| handle.session.as_ref())
        .map(|session| session.user_id.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    info!(
        method = %method,
        path = %path,
        ip = %ip,
        user = %user,
        "HTTP request"
    );

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();

    info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        latency_ms = %duration.as_millis(),
        "HTTP response"
    );

    response
}
