//! Reqmon demo HTTP server
//!
//! Starts an Axum web server with the request instrumentation middleware
//! attached and a sample route to generate traffic against.

use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use reqmon::cli::{Cli, Command, generate_config_template};
use reqmon::config::Config;
use reqmon::monitor::{Monitor, MonitorBuilder};
use reqmon::telemetry;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        match output {
            Some(path) => std::fs::write(&path, generate_config_template())?,
            None => print!("{}", generate_config_template()),
        }
        return Ok(());
    }

    // A missing config file falls back to defaults; a broken one is an error.
    let config = if std::path::Path::new(&cli.config).exists() {
        Config::from_file(&cli.config)?
    } else {
        Config::default()
    };
    config.validate()?;

    telemetry::init(&config.observability.log_level);

    let monitor = Monitor::global(MonitorBuilder::from_config(&config));

    let app = Router::new().route("/product/{id}", get(product));
    let app = monitor.attach(app)?.layer(TraceLayer::new_for_http());

    // validate() has already checked the host parses.
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Metrics available at http://{}{}", addr, monitor.metric_path());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn product(Path(id): Path<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "productId": id }))
}
