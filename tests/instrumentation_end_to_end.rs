//! End-to-end instrumentation tests
//!
//! Builds a monitor from a TOML configuration, attaches it to a router, and
//! verifies the full pipeline: config-driven settings, traffic counting,
//! custom metric registration, and the scrape endpoint output.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use reqmon::config::Config;
use reqmon::{MetricSpec, Monitor, MonitorBuilder};
use std::sync::Arc;
use tower::ServiceExt;

fn monitor_from_toml(toml: &str) -> Arc<Monitor> {
    let config = Config::from_str(toml).expect("config parses");
    config.validate().expect("config validates");
    Arc::new(MonitorBuilder::from_config(&config).build())
}

fn app(monitor: &Arc<Monitor>) -> Router {
    let router = Router::new().route("/ping", get(|| async { "pong" }));
    monitor.attach(router).expect("attach")
}

async fn hit(app: &Router, uri: &str, client: &str) -> StatusCode {
    let request = Request::builder()
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .expect("request builds");
    app.clone()
        .oneshot(request)
        .await
        .expect("infallible service")
        .status()
}

async fn scrape(app: &Router, path: &str) -> String {
    let request = Request::builder()
        .uri(path)
        .body(Body::empty())
        .expect("request builds");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("infallible service");
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(body.to_vec()).expect("utf-8")
}

#[tokio::test]
async fn test_config_driven_monitor_serves_scrapes_on_custom_path() {
    let monitor = monitor_from_toml(
        r#"
        [monitor]
        metric_path = "/internal/metrics"
        exclude_paths = ["/internal/metrics"]

        [monitor.metadata]
        app = "shop"
        "#,
    );
    let app = app(&monitor);

    assert_eq!(hit(&app, "/ping", "203.0.113.1").await, StatusCode::OK);
    assert_eq!(hit(&app, "/ping", "203.0.113.2").await, StatusCode::OK);

    let text = scrape(&app, "/internal/metrics").await;
    assert!(text.contains("request_total{app=\"shop\"} 2"));
    assert!(text.contains("request_uv_total{app=\"shop\"} 2"));
    assert!(text.contains("# TYPE request_duration histogram"));
}

#[tokio::test]
async fn test_custom_metrics_appear_in_scrape_output() {
    let monitor = monitor_from_toml("[monitor]\nexclude_paths = [\"/metrics\"]\n");
    let app = app(&monitor);

    monitor
        .add_metric(MetricSpec::gauge(
            "active_sessions",
            "Currently active sessions.",
            vec![],
        ))
        .expect("gauge registers");
    monitor
        .add_metric(MetricSpec::summary(
            "checkout_latency",
            "Checkout latency in seconds.",
            vec!["uri".to_string()],
            vec![0.5, 0.9],
        ))
        .expect("summary registers");

    monitor
        .get_metric("active_sessions")
        .expect("gauge present")
        .add(&[], 3.0)
        .expect("gauge add");
    monitor
        .get_metric("checkout_latency")
        .expect("summary present")
        .observe(&["/checkout"], 0.42)
        .expect("summary observe");

    let text = scrape(&app, "/metrics").await;
    assert!(text.contains("# TYPE active_sessions gauge"));
    assert!(text.contains("active_sessions 3"));
    assert!(text.contains("# TYPE checkout_latency summary"));
    assert!(text.contains("checkout_latency_count{uri=\"/checkout\"} 1"));
}

#[tokio::test]
async fn test_scrape_traffic_is_excluded_from_its_own_counters() {
    let monitor = monitor_from_toml("[monitor]\nexclude_paths = [\"/metrics\"]\n");
    let app = app(&monitor);

    hit(&app, "/ping", "203.0.113.1").await;
    let first = scrape(&app, "/metrics").await;
    let second = scrape(&app, "/metrics").await;
    assert_eq!(first, second, "scraping must not move any counter");
}
