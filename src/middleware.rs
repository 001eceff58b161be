//! Per-request tracking middleware and the exposition handler
//!
//! Each request either passes through untouched (excluded path), completes
//! and is measured, or aborts on a downstream panic. The panic is contained
//! here: it is converted into a structured value before any metric or
//! response logic runs, the client gets a 500, metric emission for that
//! request is skipped, and the server keeps serving.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use http_body::Body as _;

use crate::monitor::{
    METRIC_REQUEST_BODY_TOTAL, METRIC_REQUEST_DURATION, METRIC_REQUEST_TOTAL,
    METRIC_REQUEST_UV_TOTAL, METRIC_RESPONSE_BODY_TOTAL, METRIC_SLOW_REQUEST_TOTAL,
    METRIC_URI_REQUEST_TOTAL, Monitor,
};

/// Tracking middleware, installed globally by `Monitor::attach`.
pub async fn track(
    State(monitor): State<Arc<Monitor>>,
    request: Request,
    next: Next,
) -> Response {
    if monitor.is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let start = Instant::now();
    // Request context must be captured before the chain consumes the request.
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let method = request.method().to_string();
    let client = client_addr(&request);
    let request_bytes = request_content_length(&request);

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => {
            record(
                &monitor,
                &route,
                &method,
                client.as_deref(),
                request_bytes,
                &response,
                start,
            );
            response
        }
        Err(panic) => {
            tracing::error!(
                route = %route,
                method = %method,
                panic = panic_message(panic.as_ref()),
                "request handler panicked; responding 500, metrics skipped"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Prometheus exposition handler, mounted at the configured metric path.
pub async fn exposition(State(monitor): State<Arc<Monitor>>) -> (StatusCode, String) {
    match monitor.gather() {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => {
            tracing::error!(error = %e, "failed to gather metrics for exposition");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to gather metrics: {e}"),
            )
        }
    }
}

/// Emit all per-request metrics for a completed (non-aborted) request.
fn record(
    monitor: &Monitor,
    route: &str,
    method: &str,
    client: Option<&str>,
    request_bytes: u64,
    response: &Response,
    start: Instant,
) {
    let status = response.status().as_u16().to_string();

    inc(monitor, METRIC_REQUEST_TOTAL, &[]);

    if let Some(client) = client {
        // check_and_add is atomic, so a client racing its own first two
        // requests is counted once. A filter false positive can skip a
        // genuinely new client; it can never count one twice.
        if monitor.filter().check_and_add(client) {
            inc(monitor, METRIC_REQUEST_UV_TOTAL, &[]);
        }
    }

    inc(monitor, METRIC_URI_REQUEST_TOTAL, &[route, method, &status]);

    if request_bytes > 0 {
        add(
            monitor,
            METRIC_REQUEST_BODY_TOTAL,
            &[route, method, &status],
            request_bytes as f64,
        );
    }

    let response_bytes = response.body().size_hint().exact().unwrap_or(0);
    if response_bytes > 0 {
        add(
            monitor,
            METRIC_RESPONSE_BODY_TOTAL,
            &[],
            response_bytes as f64,
        );
    }

    let elapsed = start.elapsed().as_secs_f64();
    observe(monitor, METRIC_REQUEST_DURATION, &[route], elapsed);

    if monitor.is_slow(elapsed) {
        inc(monitor, METRIC_SLOW_REQUEST_TOTAL, &[route, method, &status]);
    }
}

fn inc(monitor: &Monitor, name: &str, base: &[&str]) {
    let values = monitor.metric_values(base);
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    if let Err(e) = monitor.get_metric(name).and_then(|m| m.inc(&refs)) {
        tracing::warn!(metric = name, error = %e, "metric update failed");
    }
}

fn add(monitor: &Monitor, name: &str, base: &[&str], value: f64) {
    let values = monitor.metric_values(base);
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    if let Err(e) = monitor.get_metric(name).and_then(|m| m.add(&refs, value)) {
        tracing::warn!(metric = name, error = %e, "metric update failed");
    }
}

fn observe(monitor: &Monitor, name: &str, base: &[&str], value: f64) {
    let values = monitor.metric_values(base);
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    if let Err(e) = monitor
        .get_metric(name)
        .and_then(|m| m.observe(&refs, value))
    {
        tracing::warn!(metric = name, error = %e, "metric update failed");
    }
}

/// Client identity for unique-visitor counting: proxy headers first, then
/// the peer address.
fn client_addr(request: &Request) -> Option<String> {
    let header_ip = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
}

fn request_content_length(request: &Request) -> u64 {
    request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .or_else(|| request.body().size_hint().exact())
        .unwrap_or(0)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
