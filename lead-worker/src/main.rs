//! Receive queued CRM leads over HTTP and sync them to the marketing API.
use axum::Router;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use lead_worker::app_context::AppContext;
use lead_worker::config::Config;
use lead_worker::handlers::add_routes;
use lead_worker::metrics::{serve, setup_metrics_routes};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;
    let context = AppContext::new(&config)
        .await
        .wrap_err("failed to initialize app context")?;

    let app = add_routes(
        Router::new(),
        context.pipeline.clone(),
        context.config.max_body_size,
    );
    let app = setup_metrics_routes(app).wrap_err("failed to install metrics recorder")?;

    let bind = config.bind();
    info!(
        bind = %bind,
        raw_bucket = %config.raw_bucket,
        processed_bucket = %config.processed_bucket,
        "listening"
    );
    serve(app, &bind)
        .await
        .wrap_err("failed to start serving lead worker")?;

    Ok(())
}
